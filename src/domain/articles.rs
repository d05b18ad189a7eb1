//! Articles, listing filters, and sort orders.
//!
//! Every listing is ordered by a sort field with the article id as a unique
//! tiebreaker, so `(sort value, id)` identifies a stable position that keyset
//! pagination can resume from.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;

const MAX_TITLE_LEN: usize = 512;
const MAX_TAGS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub url: String,
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Article {
    /// Value of the given sort field for this article.
    pub fn sort_value(&self, field: SortField) -> SortValue {
        match field {
            SortField::PublishedAt => SortValue::Time(self.published_at),
            SortField::CreatedAt => SortValue::Time(self.created_at),
            SortField::UpdatedAt => SortValue::Time(self.updated_at),
            SortField::Title => SortValue::Text(self.title.clone()),
        }
    }

    pub fn keyset(&self, field: SortField) -> Keyset {
        Keyset {
            value: self.sort_value(field),
            id: self.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub source: String,
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

impl NewArticle {
    /// Trims text fields, normalizes tags, and rejects empty required fields.
    pub fn validated(mut self) -> Result<Self, DomainError> {
        self.title = self.title.trim().to_string();
        self.source = self.source.trim().to_string();
        self.url = self.url.trim().to_string();
        self.tags = normalize_tags(self.tags);

        if self.title.is_empty() {
            return Err(DomainError::validation("title must not be empty"));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::validation("title is too long"));
        }
        if self.source.is_empty() {
            return Err(DomainError::validation("source must not be empty"));
        }
        if self.url.is_empty() {
            return Err(DomainError::validation("url must not be empty"));
        }
        if self.tags.len() > MAX_TAGS {
            return Err(DomainError::validation("too many tags"));
        }
        Ok(self)
    }

    pub fn into_article(self, id: Uuid, now: OffsetDateTime) -> Article {
        Article {
            id,
            title: self.title,
            summary: self.summary,
            source: self.source,
            url: self.url,
            tags: self.tags,
            published_at: self.published_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
}

impl ArticleUpdate {
    pub fn validated(mut self) -> Result<Self, DomainError> {
        if let Some(title) = self.title.as_mut() {
            *title = title.trim().to_string();
            if title.is_empty() {
                return Err(DomainError::validation("title must not be empty"));
            }
        }
        if let Some(source) = self.source.as_mut() {
            *source = source.trim().to_string();
            if source.is_empty() {
                return Err(DomainError::validation("source must not be empty"));
            }
        }
        self.tags = self.tags.map(normalize_tags);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.summary.is_none()
            && self.source.is_none()
            && self.url.is_none()
            && self.tags.is_none()
            && self.published_at.is_none()
    }

    pub fn apply(self, article: &mut Article, now: OffsetDateTime) {
        if let Some(title) = self.title {
            article.title = title;
        }
        if let Some(summary) = self.summary {
            article.summary = summary;
        }
        if let Some(source) = self.source {
            article.source = source;
        }
        if let Some(url) = self.url {
            article.url = url;
        }
        if let Some(tags) = self.tags {
            article.tags = tags;
        }
        if let Some(published_at) = self.published_at {
            article.published_at = published_at;
        }
        article.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// Listing filter. All set criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFilter {
    pub source: Option<String>,
    /// Every listed tag must be present on the article.
    pub tags: Vec<String>,
    /// Case-insensitive substring over title and summary.
    pub search: Option<String>,
    pub favorited_by: Option<Uuid>,
}

impl ArticleFilter {
    /// Canonical form: trimmed, blank criteria dropped, tags lowercased,
    /// sorted, and deduplicated.
    pub fn normalized(self) -> Self {
        Self {
            source: non_blank(self.source),
            tags: normalize_tags(self.tags),
            search: non_blank(self.search),
            favorited_by: self.favorited_by,
        }
    }

    /// Content criteria only; `favorited_by` is resolved by the store.
    pub fn matches(&self, article: &Article) -> bool {
        if let Some(source) = &self.source
            && article.source != *source
        {
            return false;
        }
        if !self
            .tags
            .iter()
            .all(|tag| article.tags.iter().any(|t| t == tag))
        {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            return article.title.to_lowercase().contains(&needle)
                || article.summary.to_lowercase().contains(&needle);
        }
        true
    }
}

pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .iter()
        .map(|tag| normalize_tag(tag))
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    PublishedAt,
    CreatedAt,
    UpdatedAt,
    Title,
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            SortField::PublishedAt => "published_at",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Title => "title",
        }
    }

    pub fn is_temporal(self) -> bool {
        !matches!(self, SortField::Title)
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "published_at" => Ok(SortField::PublishedAt),
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "title" => Ok(SortField::Title),
            other => Err(DomainError::UnknownSortField(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(DomainError::UnknownSortDirection(other.to_string())),
        }
    }
}

/// Sort field plus direction. Defaults to newest published first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::PublishedAt,
            direction: SortDirection::Desc,
        }
    }
}

impl SortSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Parses optional query values. A missing direction defaults to
    /// ascending for titles and descending for timestamps.
    pub fn parse(field: Option<&str>, direction: Option<&str>) -> Result<Self, DomainError> {
        let field = match field.map(str::trim).filter(|f| !f.is_empty()) {
            Some(raw) => raw.parse()?,
            None => SortField::PublishedAt,
        };
        let direction = match direction.map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => raw.parse()?,
            None if field.is_temporal() => SortDirection::Desc,
            None => SortDirection::Asc,
        };
        Ok(Self { field, direction })
    }

    pub fn reversed(self) -> Self {
        Self {
            field: self.field,
            direction: self.direction.reverse(),
        }
    }

    /// Total order of two articles under this sort, id as tiebreaker.
    pub fn compare(self, a: &Article, b: &Article) -> Ordering {
        let ordering = a
            .sort_value(self.field)
            .cmp(&b.sort_value(self.field))
            .then_with(|| a.id.cmp(&b.id));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SortValue {
    Time(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Text(String),
}

impl SortValue {
    pub fn fits(&self, field: SortField) -> bool {
        match self {
            SortValue::Time(_) => field.is_temporal(),
            SortValue::Text(_) => !field.is_temporal(),
        }
    }
}

/// A `(sort value, id)` position within an ordered listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    pub value: SortValue,
    pub id: Uuid,
}

impl Keyset {
    /// True when `article` comes strictly after this position under `sort`.
    pub fn precedes(&self, article: &Article, sort: SortSpec) -> bool {
        let ordering = article
            .sort_value(sort.field)
            .cmp(&self.value)
            .then_with(|| article.id.cmp(&self.id));
        match sort.direction {
            SortDirection::Asc => ordering == Ordering::Greater,
            SortDirection::Desc => ordering == Ordering::Less,
        }
    }
}
