//! Hit, miss, and error counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free counters shared by every caller of a tier or orchestrator.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Zeroes the counters and returns what they held.
    pub fn reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.swap(0, Ordering::Relaxed),
            misses: self.misses.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl StatsSnapshot {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups served from cache, `0.0` before the first lookup.
    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_returns_previous_counts() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_error();

        let before = stats.reset();
        assert_eq!(
            before,
            StatsSnapshot {
                hits: 2,
                misses: 1,
                errors: 1
            }
        );
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn hit_ratio_handles_empty_window() {
        assert_eq!(StatsSnapshot::default().hit_ratio(), 0.0);
        let snap = StatsSnapshot {
            hits: 3,
            misses: 1,
            errors: 0,
        };
        assert!((snap.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
