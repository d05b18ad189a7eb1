//! A single cache tier: one backend with a default TTL, an operation
//! timeout, and its own counters.
//!
//! Tiers fail open. A backend error or timeout is logged, counted, and then
//! reported to the caller as a miss (reads) or `false` (writes), so the
//! request proceeds as if the tier were empty.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::backend::{BackendKind, CacheBackend, CacheEntry};
use super::error::CacheError;
use super::stats::{CacheStats, StatsSnapshot};

pub(crate) const METRIC_CACHE_HIT: &str = "newsdeck_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "newsdeck_cache_miss_total";
pub(crate) const METRIC_CACHE_ERROR: &str = "newsdeck_cache_error_total";

pub const DEFAULT_SWEEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CacheTier {
    name: String,
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    timeout: Duration,
    sweep_timeout: Duration,
    stats: CacheStats,
}

impl std::fmt::Debug for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTier")
            .field("name", &self.name)
            .field("kind", &self.backend.kind())
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .field("sweep_timeout", &self.sweep_timeout)
            .finish()
    }
}

impl CacheTier {
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn CacheBackend>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            ttl,
            timeout,
            sweep_timeout: DEFAULT_SWEEP_TIMEOUT.max(timeout),
            stats: CacheStats::new(),
        }
    }

    /// Budget for pattern scans and batched deletes. Never shorter than
    /// the per-operation timeout.
    pub fn with_sweep_timeout(mut self, sweep_timeout: Duration) -> Self {
        self.sweep_timeout = sweep_timeout.max(self.timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) -> StatsSnapshot {
        self.stats.reset()
    }

    /// Raw entry lookup; counts a hit or a miss.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        match self.guarded("get", key, self.timeout, self.backend.get(key)).await {
            Ok(Some(entry)) => {
                self.stats.record_hit();
                counter!(METRIC_CACHE_HIT, "tier" => self.name.clone()).increment(1);
                Some(entry)
            }
            Ok(None) => {
                self.stats.record_miss();
                counter!(METRIC_CACHE_MISS, "tier" => self.name.clone()).increment(1);
                None
            }
            Err(_) => None,
        }
    }

    /// Typed lookup. An entry that no longer decodes is dropped and read
    /// as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.get_entry(key).await?;
        match serde_json::from_str(&entry.payload) {
            Ok(value) => Some(value),
            Err(err) => {
                self.record_error("decode", key, &CacheError::from(err));
                let _ = self.try_delete(key).await;
                None
            }
        }
    }

    /// Stores `value` for `ttl`, or the tier default. Returns whether the
    /// write landed.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_string(value) {
            Ok(payload) => self.put(key, payload, ttl).await,
            Err(err) => {
                self.record_error("encode", key, &CacheError::from(err));
                false
            }
        }
    }

    /// Stores an already-encoded payload.
    pub async fn put(&self, key: &str, payload: String, ttl: Option<Duration>) -> bool {
        let entry = CacheEntry::new(payload, ttl.unwrap_or(self.ttl));
        let stored = self
            .guarded("set", key, self.timeout, self.backend.set(key, entry))
            .await
            .is_ok();
        if stored {
            debug!(tier = %self.name, key, "Cache entry stored");
        }
        stored
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.try_delete(key).await.unwrap_or(false)
    }

    /// Like [`Self::delete`] but surfaces the failure for callers that
    /// aggregate eviction errors.
    pub async fn try_delete(&self, key: &str) -> Result<bool, CacheError> {
        self.guarded("delete", key, self.timeout, self.backend.delete(key))
            .await
    }

    /// Removes every key in one batch under the sweep budget. Returns how
    /// many entries the backend actually dropped.
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let label = keys.first().map(String::as_str).unwrap_or_default();
        self.guarded(
            "delete_many",
            label,
            self.sweep_timeout,
            self.backend.delete_many(keys),
        )
        .await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.guarded("exists", key, self.timeout, self.backend.exists(key))
            .await
            .unwrap_or(false)
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.guarded("keys", pattern, self.sweep_timeout, self.backend.keys(pattern))
            .await
    }

    /// Returns the cached value or runs `fetcher` and caches its result.
    /// Fetch errors are returned untouched and nothing is cached.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetcher: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = fetcher().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    async fn guarded<T>(
        &self,
        op: &'static str,
        key: &str,
        budget: Duration,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        let result = match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout { op, after: budget }),
        };
        if let Err(err) = &result {
            self.record_error(op, key, err);
        }
        result
    }

    fn record_error(&self, op: &'static str, key: &str, err: &CacheError) {
        self.stats.record_error();
        counter!(METRIC_CACHE_ERROR, "tier" => self.name.clone(), "op" => op).increment(1);
        warn!(
            tier = %self.name,
            op,
            key,
            error_kind = err.kind(),
            error = %err,
            "Cache tier operation failed; treating as empty"
        );
    }
}
