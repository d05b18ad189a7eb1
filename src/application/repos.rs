use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::articles::{
    Article, ArticleFilter, ArticleUpdate, Keyset, NewArticle, SortSpec, TagCount,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl StoreError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Transient failures a client may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Persistence(_) | StoreError::Timeout)
    }
}

/// Which slice of an ordered listing to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeWindow {
    /// Skip this many rows.
    Offset(u64),
    /// Rows strictly after this position in the requested sort.
    After(Keyset),
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Number of articles matching `filter`.
    async fn count(&self, filter: &ArticleFilter) -> Result<u64, StoreError>;

    /// Up to `limit` articles in `sort` order, `(field, id)` ascending or
    /// descending together.
    async fn find_range(
        &self,
        filter: &ArticleFilter,
        sort: SortSpec,
        window: &RangeWindow,
        limit: u32,
    ) -> Result<Vec<Article>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>, StoreError>;

    /// Subset of `ids` that `user_id` has favorited.
    async fn favorited_among(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError>;

    /// Tags with article counts, most used first.
    async fn tag_counts(&self) -> Result<Vec<TagCount>, StoreError>;
}

#[async_trait]
pub trait ArticleWriteRepo: Send + Sync {
    async fn insert_article(&self, article: NewArticle) -> Result<Article, StoreError>;

    async fn update_article(&self, id: Uuid, update: ArticleUpdate) -> Result<Article, StoreError>;

    /// Returns whether the article existed.
    async fn delete_article(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn import_articles(&self, articles: Vec<NewArticle>) -> Result<u64, StoreError>;

    /// Renames `from` to `to` on every article carrying it. Returns the
    /// number of articles touched.
    async fn rename_tag(&self, from: &str, to: &str) -> Result<u64, StoreError>;

    /// Returns whether the favorite state changed.
    async fn set_favorite(
        &self,
        user_id: Uuid,
        article_id: Uuid,
        favorite: bool,
    ) -> Result<bool, StoreError>;
}
