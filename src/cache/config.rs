//! Cache configuration.
//!
//! Describes the tier stack (fastest first) and how each tier is backed.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::Deserialize;
use tracing::{info, warn};

use super::backend::{BackendKind, CacheBackend};
use super::error::CacheError;
use super::layered::LayeredCache;
use super::memory::MemoryBackend;
use super::redis_store::RedisBackend;
use super::tier::CacheTier;

pub const DEFAULT_KEY_PREFIX: &str = "newsdeck";
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_MEMORY_TIMEOUT_MS: u64 = 50;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 250;
const DEFAULT_SWEEP_TIMEOUT_MS: u64 = 5_000;

/// One entry of the tier stack.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub backend: BackendKind,
    pub ttl_seconds: u64,
    /// Entry bound for memory tiers; ignored by Redis.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Per-operation timeout; defaults by backend kind.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Budget for pattern scans and batched deletes during invalidation.
    #[serde(default)]
    pub sweep_timeout_ms: Option<u64>,
}

fn default_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

impl TierConfig {
    pub fn memory(name: &str, ttl_seconds: u64, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            backend: BackendKind::Memory,
            ttl_seconds,
            capacity,
            timeout_ms: None,
            sweep_timeout_ms: None,
        }
    }

    pub fn redis(name: &str, ttl_seconds: u64) -> Self {
        Self {
            name: name.to_string(),
            backend: BackendKind::Redis,
            ttl_seconds,
            capacity: DEFAULT_MEMORY_CAPACITY,
            timeout_ms: None,
            sweep_timeout_ms: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds.max(1))
    }

    pub fn timeout(&self) -> Duration {
        let fallback = match self.backend {
            BackendKind::Memory => DEFAULT_MEMORY_TIMEOUT_MS,
            BackendKind::Redis => DEFAULT_REMOTE_TIMEOUT_MS,
        };
        Duration::from_millis(self.timeout_ms.unwrap_or(fallback).max(1))
    }

    /// Never shorter than the per-operation timeout.
    pub fn sweep_timeout(&self) -> Duration {
        let millis = self.sweep_timeout_ms.unwrap_or(DEFAULT_SWEEP_TIMEOUT_MS);
        Duration::from_millis(millis.max(1)).max(self.timeout())
    }

    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub key_prefix: String,
    pub single_flight: bool,
    pub tiers: Vec<TierConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            single_flight: true,
            tiers: vec![
                TierConfig::memory("hot", 900, 2_048),
                TierConfig::memory("warm", 1_800, 20_000),
                TierConfig::redis("shared", 7_200),
            ],
        }
    }
}

impl CacheConfig {
    /// Builds the tier stack. Redis tiers are skipped with a warning when no
    /// connection is available, so a single instance can run memory-only.
    pub fn build(&self, redis: Option<&ConnectionManager>) -> Result<Option<LayeredCache>, CacheError> {
        if !self.enabled {
            info!("Layered cache disabled by configuration");
            return Ok(None);
        }

        let mut tiers = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let backend: Arc<dyn CacheBackend> = match tier.backend {
                BackendKind::Memory => Arc::new(MemoryBackend::new(tier.capacity_non_zero())),
                BackendKind::Redis => match redis {
                    Some(conn) => Arc::new(RedisBackend::new(conn.clone())),
                    None => {
                        warn!(tier = %tier.name, "No redis connection configured; skipping tier");
                        continue;
                    }
                },
            };
            tiers.push(
                CacheTier::new(tier.name.clone(), backend, tier.ttl(), tier.timeout())
                    .with_sweep_timeout(tier.sweep_timeout()),
            );
        }

        if tiers.is_empty() {
            warn!("No usable cache tiers; running without a cache");
            return Ok(None);
        }

        let cache = LayeredCache::new(tiers)?;
        info!(
            tiers = ?cache.tiers().iter().map(|t| t.name()).collect::<Vec<_>>(),
            single_flight = self.single_flight,
            "Layered cache ready"
        );
        Ok(Some(if self.single_flight {
            cache.with_single_flight()
        } else {
            cache
        }))
    }

    pub fn needs_redis(&self) -> bool {
        self.enabled
            && self
                .tiers
                .iter()
                .any(|tier| tier.backend == BackendKind::Redis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_tiers_are_skipped_without_connection() {
        let cache = CacheConfig::default().build(None).unwrap().unwrap();
        let names: Vec<_> = cache.tiers().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["hot", "warm"]);
    }

    #[test]
    fn disabled_cache_builds_nothing() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(config.build(None).unwrap().is_none());
    }

    #[test]
    fn timeouts_default_by_backend() {
        assert_eq!(TierConfig::memory("a", 1, 1).timeout(), Duration::from_millis(50));
        assert_eq!(TierConfig::redis("b", 1).timeout(), Duration::from_millis(250));
        assert_eq!(TierConfig::memory("c", 0, 0).capacity_non_zero().get(), 1);
    }

    #[test]
    fn sweeps_get_a_wider_budget() {
        let redis = TierConfig::redis("shared", 60);
        assert_eq!(redis.sweep_timeout(), Duration::from_secs(5));

        let slow = TierConfig {
            timeout_ms: Some(8_000),
            sweep_timeout_ms: Some(100),
            ..TierConfig::memory("hot", 60, 10)
        };
        assert_eq!(slow.sweep_timeout(), Duration::from_secs(8));
    }
}
