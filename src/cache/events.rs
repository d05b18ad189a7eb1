//! Write-side events that make cached data stale.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A committed mutation. Emitted after the store write succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationEvent {
    ArticleCreated,
    ArticleUpdated { article_id: Uuid },
    ArticleDeleted { article_id: Uuid },
    BulkImport,
    TagChanged,
    FavoriteChanged { user_id: Uuid },
}

impl MutationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MutationEvent::ArticleCreated => "article_created",
            MutationEvent::ArticleUpdated { .. } => "article_updated",
            MutationEvent::ArticleDeleted { .. } => "article_deleted",
            MutationEvent::BulkImport => "bulk_import",
            MutationEvent::TagChanged => "tag_changed",
            MutationEvent::FavoriteChanged { .. } => "favorite_changed",
        }
    }
}

impl fmt::Display for MutationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationEvent::ArticleUpdated { article_id }
            | MutationEvent::ArticleDeleted { article_id } => {
                write!(f, "{}({article_id})", self.kind())
            }
            MutationEvent::FavoriteChanged { user_id } => write!(f, "{}({user_id})", self.kind()),
            _ => f.write_str(self.kind()),
        }
    }
}
