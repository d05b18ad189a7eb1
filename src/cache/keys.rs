//! Cache key definitions.
//!
//! A key is `{prefix}:{namespace}[:{scope}]:{digest}` where the digest is
//! derived from the canonical rendering of the query parameters. Parameters
//! are sorted by name, so insertion order never changes the key, and
//! `None` values or empty lists are omitted entirely.
//!
//! Producers and the invalidator share the helpers at the bottom of this
//! file, so a cached entry and the eviction that targets it always agree on
//! the key shape.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::articles::{ArticleFilter, SortSpec};

use super::error::CacheError;

/// Number of hex characters kept from the SHA-256 of the canonical params.
pub const DIGEST_LEN: usize = 32;

/// Logical grouping of keys. Invalidation sweeps whole namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    #[serde(rename = "articles.list")]
    ArticleList,
    #[serde(rename = "articles.detail")]
    ArticleDetail,
    #[serde(rename = "tags.cloud")]
    TagCloud,
    #[serde(rename = "favorites.list")]
    FavoriteList,
    #[serde(rename = "favorites.lookup")]
    FavoriteLookup,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::ArticleList,
        Namespace::ArticleDetail,
        Namespace::TagCloud,
        Namespace::FavoriteList,
        Namespace::FavoriteLookup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::ArticleList => "articles.list",
            Namespace::ArticleDetail => "articles.detail",
            Namespace::TagCloud => "tags.cloud",
            Namespace::FavoriteList => "favorites.list",
            Namespace::FavoriteLookup => "favorites.lookup",
        }
    }

    /// Namespaces whose entries belong to a single user.
    pub fn is_user_scoped(self) -> bool {
        matches!(self, Namespace::FavoriteList | Namespace::FavoriteLookup)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s.trim())
            .ok_or_else(|| CacheError::UnknownNamespace(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Bool(bool),
    List(Vec<String>),
}

impl ParamValue {
    fn is_empty(&self) -> bool {
        matches!(self, ParamValue::List(items) if items.is_empty())
    }

    fn render(&self, out: &mut String) {
        match self {
            ParamValue::Str(value) => escape_into(value, out),
            ParamValue::Int(value) => out.push_str(&value.to_string()),
            ParamValue::UInt(value) => out.push_str(&value.to_string()),
            ParamValue::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
            ParamValue::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    escape_into(item, out);
                }
            }
        }
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::UInt(u64::from(value))
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::UInt(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<Uuid> for ParamValue {
    fn from(value: Uuid) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        ParamValue::List(value)
    }
}

/// Parameters that identify one cached result. Order-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: BTreeMap<String, ParamValue>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let value = value.into();
        let name: String = name.into();
        if value.is_empty() {
            self.entries.remove(&name);
        } else {
            self.entries.insert(name, value);
        }
    }

    /// `None` behaves as if the parameter was never set.
    pub fn insert_opt<V: Into<ParamValue>>(&mut self, name: impl Into<String>, value: Option<V>) {
        let name: String = name.into();
        match value {
            Some(value) => self.insert(name, value),
            None => {
                self.entries.remove(&name);
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_opt<V: Into<ParamValue>>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        self.insert_opt(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `k=v:k=v` with names sorted and reserved characters escaped.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (idx, (name, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                out.push(':');
            }
            escape_into(name, &mut out);
            out.push('=');
            value.render(&mut out);
        }
        out
    }

    /// Truncated SHA-256 of the canonical rendering.
    pub fn digest(&self) -> String {
        digest_of(&self.canonical())
    }
}

fn digest_of(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_LEN);
    digest
}

/// Percent-escapes the characters that carry structure in a canonical key.
fn escape_into(raw: &str, out: &mut String) {
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '=' => out.push_str("%3D"),
            ',' => out.push_str("%2C"),
            _ => out.push(ch),
        }
    }
}

/// A fully rendered storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: Namespace,
    rendered: String,
}

impl CacheKey {
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// A glob over storage keys: a whole namespace or one user's slice of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPattern {
    namespace: Namespace,
    scope: Option<String>,
    rendered: String,
}

impl KeyPattern {
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn is_namespace_wide(&self) -> bool {
        self.scope.is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Renders keys and patterns under a deployment-wide prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyBuilder {
    prefix: String,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_KEY_PREFIX)
    }
}

impl CacheKeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut rendered = String::new();
        escape_into(&prefix_or_default(prefix.into()), &mut rendered);
        Self { prefix: rendered }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespace-wide key. Rejects user-scoped namespaces.
    pub fn build(&self, namespace: Namespace, params: &QueryParams) -> Result<CacheKey, CacheError> {
        if namespace.is_user_scoped() {
            return Err(CacheError::ScopeRequired(namespace));
        }
        Ok(self.render(namespace, None, params))
    }

    pub fn build_scoped(&self, namespace: Namespace, user_id: Uuid, params: &QueryParams) -> CacheKey {
        self.render(namespace, Some(&user_scope(user_id)), params)
    }

    /// Matches every key under `namespace`, scoped or not.
    pub fn namespace_pattern(&self, namespace: Namespace) -> KeyPattern {
        KeyPattern {
            namespace,
            scope: None,
            rendered: format!("{}:{}:*", self.prefix, namespace.as_str()),
        }
    }

    /// Matches only the keys of `user_id` under `namespace`.
    pub fn user_pattern(&self, namespace: Namespace, user_id: Uuid) -> KeyPattern {
        let scope = user_scope(user_id);
        KeyPattern {
            namespace,
            rendered: format!("{}:{}:{}:*", self.prefix, namespace.as_str(), scope),
            scope: Some(scope),
        }
    }

    fn render(&self, namespace: Namespace, scope: Option<&str>, params: &QueryParams) -> CacheKey {
        let mut canonical = String::from(namespace.as_str());
        if !params.is_empty() {
            canonical.push(':');
            canonical.push_str(&params.canonical());
        }
        let digest = digest_of(&canonical);
        let rendered = match scope {
            Some(scope) => format!("{}:{}:{}:{}", self.prefix, namespace.as_str(), scope, digest),
            None => format!("{}:{}:{}", self.prefix, namespace.as_str(), digest),
        };
        CacheKey {
            namespace,
            rendered,
        }
    }

    /// Listing key: filter, sort, and the already-normalized page request.
    /// Favorites listings land in the owner's scope.
    pub fn listing(
        &self,
        filter: &ArticleFilter,
        sort: SortSpec,
        window: &ListingWindow<'_>,
    ) -> CacheKey {
        let params = listing_params(filter, sort)
            .with("limit", window.limit)
            .with_opt("page", window.page)
            .with_opt("after", window.after)
            .with_opt("before", window.before);
        match filter.favorited_by {
            Some(user_id) => self.build_scoped(Namespace::FavoriteList, user_id, &params),
            None => self.render(Namespace::ArticleList, None, &params),
        }
    }

    pub fn article_detail(&self, id: Uuid) -> CacheKey {
        self.render(Namespace::ArticleDetail, None, &QueryParams::new().with("id", id))
    }

    pub fn tag_cloud(&self) -> CacheKey {
        self.render(Namespace::TagCloud, None, &QueryParams::new())
    }

    /// `ids` must already be sorted and deduplicated.
    pub fn favorite_lookup(&self, user_id: Uuid, ids: &[Uuid]) -> CacheKey {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.build_scoped(
            Namespace::FavoriteLookup,
            user_id,
            &QueryParams::new().with("ids", ids),
        )
    }
}

/// Page coordinates that participate in a listing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingWindow<'a> {
    pub limit: u32,
    pub page: Option<u32>,
    pub after: Option<&'a str>,
    pub before: Option<&'a str>,
}

/// Filter and sort parameters shared by listing keys and cursor fingerprints.
pub fn listing_params(filter: &ArticleFilter, sort: SortSpec) -> QueryParams {
    QueryParams::new()
        .with_opt("source", filter.source.clone())
        .with("tags", filter.tags.clone())
        .with_opt("q", filter.search.clone())
        .with_opt("favorited_by", filter.favorited_by)
        .with("sort", sort.field.as_str())
        .with("dir", sort.direction.as_str())
}

fn user_scope(user_id: Uuid) -> String {
    format!("user={}", user_id.simple())
}

fn prefix_or_default(prefix: String) -> String {
    let trimmed = prefix.trim().trim_end_matches(':');
    if trimmed.is_empty() {
        super::config::DEFAULT_KEY_PREFIX.to_string()
    } else {
        trimmed.to_string()
    }
}
