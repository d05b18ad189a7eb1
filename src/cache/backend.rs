//! Storage backends behind a cache tier.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::CacheError;

/// Where a backend keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process; invisible to other instances.
    Memory,
    /// Shared by every instance pointing at the same server.
    Redis,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, BackendKind::Memory)
    }
}

/// A serialized value plus the bookkeeping needed to expire it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// JSON encoding of the cached value.
    pub payload: String,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn new(payload: String, ttl: Duration) -> Self {
        Self {
            payload,
            stored_at: OffsetDateTime::now_utc(),
            ttl_seconds: ttl.as_secs().max(1),
        }
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        self.stored_at.saturating_add(time::Duration::seconds(ttl))
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

/// Raw key/value storage used by [`super::tier::CacheTier`].
///
/// Backends return errors verbatim; the tier owns timeouts, stats, and the
/// fail-open policy. `keys` takes a glob where `*` matches any run of
/// characters.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes a batch of keys and returns how many were present.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}
