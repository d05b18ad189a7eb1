//! Layered cache system.
//!
//! An ordered stack of tiers (in-process LRU, then shared Redis) sits in
//! front of the article store:
//!
//! - **Keys**: deterministic, namespaced, and digest-based ([`CacheKeyBuilder`])
//! - **Tiers**: one backend each, with TTL, timeout, and fail-open stats ([`CacheTier`])
//! - **Orchestrator**: read-through with promotion and optional single-flight ([`LayeredCache`])
//! - **Invalidation**: mutation events mapped to key and namespace evictions ([`CacheInvalidator`])
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! key_prefix = "newsdeck"
//! single_flight = true
//!
//! [[cache.tiers]]
//! name = "hot"
//! backend = "memory"
//! ttl_seconds = 900
//! capacity = 2048
//! ```

mod backend;
mod broadcast;
mod config;
mod error;
mod events;
mod flight;
mod invalidator;
mod keys;
mod layered;
mod memory;
mod planner;
mod redis_store;
mod stats;
mod tier;

pub use backend::{BackendKind, CacheBackend, CacheEntry};
pub use broadcast::{
    DEFAULT_CHANNEL, EvictionBroadcaster, EvictionMessage, EvictionSubscriber, RedisBroadcaster,
};
pub use config::{CacheConfig, DEFAULT_KEY_PREFIX, TierConfig};
pub use error::CacheError;
pub use events::MutationEvent;
pub use flight::{FlightGroup, FlightGuard};
pub use invalidator::{CacheInvalidator, InvalidationError, InvalidationReport};
pub use keys::{
    CacheKey, CacheKeyBuilder, DIGEST_LEN, KeyPattern, ListingWindow, Namespace, ParamValue,
    QueryParams, listing_params,
};
pub use layered::{
    CacheStatus, Cached, LayeredCache, LayeredStats, TierEviction, TierScope, TierStats,
};
pub use memory::MemoryBackend;
pub use planner::EvictionPlan;
pub use redis_store::RedisBackend;
pub use stats::{CacheStats, StatsSnapshot};
pub use tier::{CacheTier, DEFAULT_SWEEP_TIMEOUT};
