//! Ordered stack of cache tiers, fastest first.
//!
//! Reads walk the tiers in order and copy a hit into every faster tier that
//! missed. Writes and deletes fan out to all tiers concurrently. The stack
//! keeps one aggregate set of counters on top of the per-tier ones: a read
//! is a hit if any tier served it and a miss only when all of them missed.
//!
//! Each namespace carries a generation number that the invalidator advances
//! before it evicts. A fill that observed an older generation before its
//! fetch is discarded, so a fetch racing a commit cannot re-cache the
//! pre-commit value after the eviction ran.

use std::future::Future;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::CacheEntry;
use super::error::CacheError;
use super::flight::FlightGroup;
use super::keys::{CacheKey, Namespace};
use super::stats::{CacheStats, StatsSnapshot};
use super::tier::CacheTier;

pub(crate) const METRIC_CACHE_PROMOTION: &str = "newsdeck_cache_promotion_total";
pub(crate) const METRIC_CACHE_FETCH_MS: &str = "newsdeck_cache_fetch_ms";

/// How a value reached the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// The cache was not consulted.
    #[default]
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub status: CacheStatus,
    /// Name of the tier that served a hit.
    pub served_by: Option<String>,
}

impl<T> Cached<T> {
    pub fn bypass(value: T) -> Self {
        Self {
            value,
            status: CacheStatus::Bypass,
            served_by: None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Cached<U> {
        Cached {
            value: f(self.value),
            status: self.status,
            served_by: self.served_by,
        }
    }
}

/// Which tiers an eviction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierScope {
    All,
    /// In-process tiers only; used when applying evictions broadcast by
    /// another instance that already cleared the shared tiers.
    LocalOnly,
}

/// Result of one eviction against one tier.
#[derive(Debug)]
pub struct TierEviction {
    pub tier: String,
    /// Key or pattern that was evicted.
    pub target: String,
    pub outcome: Result<u64, CacheError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub name: String,
    pub backend: String,
    pub ttl_seconds: u64,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub hit_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayeredStats {
    pub aggregate: StatsSnapshot,
    pub hit_ratio: f64,
    pub tiers: Vec<TierStats>,
}

#[derive(Debug)]
pub struct LayeredCache {
    tiers: Vec<CacheTier>,
    stats: CacheStats,
    flights: Option<FlightGroup>,
    generations: DashMap<Namespace, u64>,
}

impl LayeredCache {
    /// Tiers must be ordered fastest first.
    pub fn new(tiers: Vec<CacheTier>) -> Result<Self, CacheError> {
        if tiers.is_empty() {
            return Err(CacheError::config("a layered cache needs at least one tier"));
        }
        for (idx, tier) in tiers.iter().enumerate() {
            if tiers[..idx].iter().any(|other| other.name() == tier.name()) {
                return Err(CacheError::config(format!(
                    "duplicate tier name `{}`",
                    tier.name()
                )));
            }
        }
        Ok(Self {
            tiers,
            stats: CacheStats::new(),
            flights: None,
            generations: DashMap::new(),
        })
    }

    /// Coalesce concurrent misses on the same key into one fetch.
    pub fn with_single_flight(mut self) -> Self {
        self.flights = Some(FlightGroup::new());
        self
    }

    pub fn tiers(&self) -> &[CacheTier] {
        &self.tiers
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<Cached<T>> {
        let found = self.read(key).await;
        self.record_lookup(found.is_some());
        found
    }

    /// Writes to every tier using each tier's own TTL. Returns how many
    /// tiers accepted the write.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> usize {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                self.stats.record_error();
                warn!(key = %key, error = %err, "Failed to encode cache value; skipping write");
                return 0;
            }
        };
        self.put_all(key.as_str(), &payload).await
    }

    pub fn generation(&self, namespace: Namespace) -> u64 {
        self.generations
            .get(&namespace)
            .map(|generation| *generation)
            .unwrap_or(0)
    }

    /// Marks every fill that started before this call as stale.
    pub fn advance_generation(&self, namespaces: impl IntoIterator<Item = Namespace>) {
        for namespace in namespaces {
            *self.generations.entry(namespace).or_insert(0) += 1;
        }
    }

    /// Writes `value` only if the key's namespace is still at `observed`.
    /// A write that lands while an invalidation advances the generation is
    /// removed again. Returns how many tiers kept the value.
    pub async fn set_if_current<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        observed: u64,
    ) -> usize {
        let namespace = key.namespace();
        if self.generation(namespace) != observed {
            debug!(key = %key, "Namespace invalidated during fetch; skipping cache fill");
            return 0;
        }
        let stored = self.set(key, value).await;
        if self.generation(namespace) != observed {
            debug!(key = %key, "Namespace invalidated during cache fill; dropping entry");
            self.delete(key).await;
            return 0;
        }
        stored
    }

    /// Removes `key` from every tier. Returns whether any tier held it.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        join_all(self.tiers.iter().map(|tier| tier.delete(key.as_str())))
            .await
            .into_iter()
            .any(|removed| removed)
    }

    /// Cache-aside read. On a full miss the fetcher runs and its result is
    /// written to every tier unless the namespace was invalidated while it
    /// ran. Fetch errors propagate and are not cached.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.read(key).await {
            self.record_lookup(true);
            return Ok(hit);
        }

        let _flight = match &self.flights {
            Some(group) => {
                let guard = group.acquire(key.as_str()).await;
                // Another caller may have filled the key while we queued.
                if let Some(hit) = self.read(key).await {
                    self.record_lookup(true);
                    return Ok(hit);
                }
                Some(guard)
            }
            None => None,
        };

        self.record_lookup(false);
        let observed = self.generation(key.namespace());
        let started = Instant::now();
        let value = fetcher().await?;
        histogram!(METRIC_CACHE_FETCH_MS, "namespace" => key.namespace().as_str())
            .record(started.elapsed().as_secs_f64() * 1000.0);
        self.set_if_current(key, &value, observed).await;

        Ok(Cached {
            value,
            status: CacheStatus::Miss,
            served_by: None,
        })
    }

    /// Deletes raw storage keys. One result per key and tier.
    pub async fn evict_keys<'k, I>(&self, keys: I, scope: TierScope) -> Vec<TierEviction>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut results = Vec::new();
        for key in keys {
            let outcomes = join_all(
                self.scoped(scope)
                    .map(|tier| async move { (tier, tier.try_delete(key).await) }),
            )
            .await;
            results.extend(outcomes.into_iter().map(|(tier, outcome)| TierEviction {
                tier: tier.name().to_string(),
                target: key.to_string(),
                outcome: outcome.map(u64::from),
            }));
        }
        results
    }

    /// Deletes every key matching `pattern`. One result per tier; a failure
    /// in one tier does not stop the others. Scans and the batched delete
    /// run under each tier's sweep budget.
    pub async fn evict_pattern(&self, pattern: &str, scope: TierScope) -> Vec<TierEviction> {
        join_all(self.scoped(scope).map(|tier| async move {
            let outcome = match tier.keys(pattern).await {
                Ok(keys) => tier.delete_many(&keys).await,
                Err(err) => Err(err),
            };
            TierEviction {
                tier: tier.name().to_string(),
                target: pattern.to_string(),
                outcome,
            }
        }))
        .await
    }

    pub fn stats(&self) -> LayeredStats {
        let own = self.stats.snapshot();
        let tiers: Vec<TierStats> = self
            .tiers
            .iter()
            .map(|tier| {
                let stats = tier.stats();
                TierStats {
                    name: tier.name().to_string(),
                    backend: tier.kind().as_str().to_string(),
                    ttl_seconds: tier.ttl().as_secs(),
                    hit_ratio: stats.hit_ratio(),
                    stats,
                }
            })
            .collect();
        let aggregate = StatsSnapshot {
            hits: own.hits,
            misses: own.misses,
            errors: own.errors + tiers.iter().map(|t| t.stats.errors).sum::<u64>(),
        };
        LayeredStats {
            hit_ratio: aggregate.hit_ratio(),
            aggregate,
            tiers,
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        for tier in &self.tiers {
            tier.reset_stats();
        }
    }

    fn scoped(&self, scope: TierScope) -> impl Iterator<Item = &CacheTier> {
        self.tiers
            .iter()
            .filter(move |tier| scope == TierScope::All || tier.kind().is_local())
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
    }

    /// Walks the tiers and promotes a hit into the faster ones. Does not
    /// touch the aggregate hit/miss counters.
    async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<Cached<T>> {
        let (idx, entry) = self.lookup(key.as_str()).await?;
        match serde_json::from_str::<T>(&entry.payload) {
            Ok(value) => {
                if idx > 0 {
                    self.promote(key.as_str(), idx, &entry).await;
                }
                Some(Cached {
                    value,
                    status: CacheStatus::Hit,
                    served_by: Some(self.tiers[idx].name().to_string()),
                })
            }
            Err(err) => {
                self.stats.record_error();
                warn!(key = %key, tier = self.tiers[idx].name(), error = %err, "Dropping undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    async fn lookup(&self, key: &str) -> Option<(usize, CacheEntry)> {
        for (idx, tier) in self.tiers.iter().enumerate() {
            if let Some(entry) = tier.get_entry(key).await {
                return Some((idx, entry));
            }
        }
        None
    }

    async fn promote(&self, key: &str, found_at: usize, entry: &CacheEntry) {
        let written = join_all(
            self.tiers[..found_at]
                .iter()
                .map(|tier| async move { (tier, tier.put(key, entry.payload.clone(), None).await) }),
        )
        .await;
        for (tier, stored) in written {
            if stored {
                counter!(METRIC_CACHE_PROMOTION, "tier" => tier.name().to_string()).increment(1);
            }
        }
        debug!(key, from = self.tiers[found_at].name(), "Promoted cache entry into faster tiers");
    }

    async fn put_all(&self, key: &str, payload: &str) -> usize {
        join_all(
            self.tiers
                .iter()
                .map(|tier| tier.put(key, payload.to_string(), None)),
        )
        .await
        .into_iter()
        .filter(|stored| *stored)
        .count()
    }
}
