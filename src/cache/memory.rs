//! In-process LRU backend.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use globset::Glob;
use lru::LruCache;
use time::OffsetDateTime;
use tracing::warn;

use super::backend::{BackendKind, CacheBackend, CacheEntry};
use super::error::CacheError;

const SOURCE: &str = "cache::memory";

/// Bounded LRU map with per-entry expiry checked on read.
pub struct MemoryBackend {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    target_module = SOURCE,
                    result = "poisoned_recovered",
                    "Recovered from poisoned memory tier lock"
                );
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.lock("get");
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.clone())),
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.lock("set").put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock("delete").pop(key).is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = self.lock("delete_many");
        Ok(keys.iter().filter(|key| entries.pop(*key).is_some()).count() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self
            .lock("exists")
            .peek(key)
            .is_some_and(|entry| !entry.is_expired()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let matcher = Glob::new(pattern)
            .map_err(|err| CacheError::Pattern {
                pattern: pattern.to_string(),
                message: err.to_string(),
            })?
            .compile_matcher();
        let now = OffsetDateTime::now_utc();
        Ok(self
            .lock("keys")
            .iter()
            .filter(|(key, entry)| !entry.is_expired_at(now) && matcher.is_match(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn backend(capacity: usize) -> MemoryBackend {
        MemoryBackend::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn entry(payload: &str) -> CacheEntry {
        CacheEntry::new(payload.to_string(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let backend = backend(4);
        let stale = CacheEntry {
            stored_at: OffsetDateTime::now_utc() - time::Duration::seconds(120),
            ..entry("old")
        };
        backend.set("k", stale).await.unwrap();

        assert!(!backend.exists("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let backend = backend(2);
        backend.set("a", entry("1")).await.unwrap();
        backend.set("b", entry("2")).await.unwrap();
        backend.get("a").await.unwrap();
        backend.set("c", entry("3")).await.unwrap();

        assert!(backend.exists("a").await.unwrap());
        assert!(!backend.exists("b").await.unwrap());
        assert!(backend.exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn keys_filters_by_glob() {
        let backend = backend(8);
        backend.set("nd:articles.list:aaa", entry("1")).await.unwrap();
        backend.set("nd:articles.list:bbb", entry("2")).await.unwrap();
        backend.set("nd:tags.cloud:ccc", entry("3")).await.unwrap();

        let mut keys = backend.keys("nd:articles.list:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["nd:articles.list:aaa", "nd:articles.list:bbb"]);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let backend = backend(2);
        backend.set("a", entry("1")).await.unwrap();
        assert!(backend.delete("a").await.unwrap());
        assert!(!backend.delete("a").await.unwrap());
    }
}
