//! Per-key request coalescing.
//!
//! Concurrent misses on the same key queue on one async mutex, so only the
//! first caller reaches the store while the rest re-read the cache once it
//! is filled.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct FlightGroup {
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the slot of `key`. Holding the returned guard makes the
    /// caller the only one working on that key.
    pub async fn acquire(&self, key: &str) -> FlightGuard<'_> {
        let slot = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = slot.lock_owned().await;
        FlightGuard {
            group: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }
}

pub struct FlightGuard<'a> {
    group: &'a FlightGroup,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still holds the slot once nobody is queued on it.
        self.group
            .inflight
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}
