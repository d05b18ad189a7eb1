//! Maps committed mutations to cache evictions and executes them.
//!
//! Invalidation never fails the mutation that triggered it. Every target is
//! attempted on every tier; failures are collected into the returned
//! [`InvalidationReport`] and logged, and the rest of the plan still runs.
//!
//! The fill generation of every touched namespace advances before the first
//! delete, so in-flight fetches that started earlier never land.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broadcast::{EvictionBroadcaster, EvictionMessage};
use super::error::CacheError;
use super::events::MutationEvent;
use super::keys::{CacheKeyBuilder, Namespace};
use super::layered::{LayeredCache, TierEviction, TierScope};
use super::planner::EvictionPlan;

pub(crate) const METRIC_INVALIDATION_EVICTED: &str = "newsdeck_invalidation_evicted_total";
pub(crate) const METRIC_INVALIDATION_ERROR: &str = "newsdeck_invalidation_error_total";

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error("failed to evict `{target}` from tier `{tier}`: {source}")]
    Eviction {
        tier: String,
        target: String,
        #[source]
        source: CacheError,
    },
    #[error("failed to broadcast eviction plan: {0}")]
    Broadcast(#[source] CacheError),
}

/// Outcome of one invalidation pass.
#[derive(Debug, Default)]
pub struct InvalidationReport {
    /// Entries removed, summed over tiers.
    pub evicted: u64,
    /// Keys plus patterns in the executed plan.
    pub targets: usize,
    pub broadcast: bool,
    pub errors: Vec<InvalidationError>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn absorb(&mut self, namespace: Option<Namespace>, evictions: Vec<TierEviction>) {
        for eviction in evictions {
            match eviction.outcome {
                Ok(removed) => {
                    self.evicted += removed;
                    if removed > 0 {
                        let label = namespace.map_or("remote", Namespace::as_str);
                        counter!(METRIC_INVALIDATION_EVICTED, "namespace" => label).increment(removed);
                    }
                }
                Err(source) => {
                    counter!(METRIC_INVALIDATION_ERROR).increment(1);
                    self.errors.push(InvalidationError::Eviction {
                        tier: eviction.tier,
                        target: eviction.target,
                        source,
                    });
                }
            }
        }
    }
}

pub struct CacheInvalidator {
    cache: Arc<LayeredCache>,
    keys: CacheKeyBuilder,
    broadcaster: Option<Arc<dyn EvictionBroadcaster>>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<LayeredCache>, keys: CacheKeyBuilder) -> Self {
        Self {
            cache,
            keys,
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn EvictionBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    pub async fn on_article_created(&self) -> InvalidationReport {
        self.handle(MutationEvent::ArticleCreated).await
    }

    pub async fn on_article_updated(&self, article_id: Uuid) -> InvalidationReport {
        self.handle(MutationEvent::ArticleUpdated { article_id })
            .await
    }

    pub async fn on_article_deleted(&self, article_id: Uuid) -> InvalidationReport {
        self.handle(MutationEvent::ArticleDeleted { article_id })
            .await
    }

    pub async fn on_bulk_import(&self) -> InvalidationReport {
        self.handle(MutationEvent::BulkImport).await
    }

    pub async fn on_tag_changed(&self) -> InvalidationReport {
        self.handle(MutationEvent::TagChanged).await
    }

    pub async fn on_favorite_changed(&self, user_id: Uuid) -> InvalidationReport {
        self.handle(MutationEvent::FavoriteChanged { user_id })
            .await
    }

    pub async fn handle(&self, event: MutationEvent) -> InvalidationReport {
        self.handle_batch([event]).await
    }

    /// Merges the events into one plan before executing it.
    pub async fn handle_batch(
        &self,
        events: impl IntoIterator<Item = MutationEvent>,
    ) -> InvalidationReport {
        let events: Vec<MutationEvent> = events.into_iter().collect();
        let plan = EvictionPlan::from_events(&self.keys, events.iter().copied());
        debug!(
            events = ?events.iter().map(ToString::to_string).collect::<Vec<_>>(),
            %plan,
            "Executing eviction plan"
        );
        self.execute(&plan).await
    }

    /// Drops every entry of `namespace` on all tiers.
    pub async fn purge_namespace(&self, namespace: Namespace) -> InvalidationReport {
        let plan = EvictionPlan::purge(&self.keys, namespace);
        self.execute(&plan).await
    }

    pub async fn execute(&self, plan: &EvictionPlan) -> InvalidationReport {
        let mut report = InvalidationReport {
            targets: plan.keys().count() + plan.patterns().count(),
            ..Default::default()
        };
        if plan.is_empty() {
            return report;
        }
        self.cache.advance_generation(plan.namespaces());

        let key_runs = plan.keys().map(|key| async move {
            let evictions = self
                .cache
                .evict_keys([key.as_str()], TierScope::All)
                .await;
            (key.namespace(), evictions)
        });
        let pattern_runs = plan.patterns().map(|pattern| async move {
            let evictions = self
                .cache
                .evict_pattern(pattern.as_str(), TierScope::All)
                .await;
            (pattern.namespace(), evictions)
        });

        for (namespace, evictions) in join_all(key_runs).await {
            report.absorb(Some(namespace), evictions);
        }
        for (namespace, evictions) in join_all(pattern_runs).await {
            report.absorb(Some(namespace), evictions);
        }

        if let Some(broadcaster) = &self.broadcaster {
            let message = EvictionMessage::from_plan(broadcaster.origin(), plan);
            match broadcaster.publish(&message).await {
                Ok(()) => report.broadcast = true,
                Err(err) => {
                    counter!(METRIC_INVALIDATION_ERROR).increment(1);
                    report.errors.push(InvalidationError::Broadcast(err));
                }
            }
        }

        log_report(plan, &report);
        report
    }

    /// Replays a peer's plan against in-process tiers. Messages this
    /// instance published itself are ignored.
    pub async fn apply_remote(&self, message: &EvictionMessage) -> InvalidationReport {
        let mut report = InvalidationReport {
            targets: message.keys.len() + message.patterns.len(),
            ..Default::default()
        };
        if self
            .broadcaster
            .as_ref()
            .is_some_and(|b| b.origin() == message.origin)
        {
            return report;
        }

        if message.namespaces.is_empty() {
            self.cache.advance_generation(Namespace::ALL);
        } else {
            self.cache
                .advance_generation(message.namespaces.iter().copied());
        }
        let evictions = self
            .cache
            .evict_keys(message.keys.iter().map(String::as_str), TierScope::LocalOnly)
            .await;
        report.absorb(None, evictions);
        for pattern in &message.patterns {
            let evictions = self
                .cache
                .evict_pattern(pattern, TierScope::LocalOnly)
                .await;
            report.absorb(None, evictions);
        }

        debug!(
            message_id = %message.message_id,
            origin = %message.origin,
            evicted = report.evicted,
            errors = report.errors.len(),
            "Applied remote eviction plan"
        );
        report
    }
}

fn log_report(plan: &EvictionPlan, report: &InvalidationReport) {
    let namespaces: Vec<&str> = plan.namespaces().into_iter().map(Namespace::as_str).collect();
    if report.is_clean() {
        info!(
            ?namespaces,
            targets = report.targets,
            evicted = report.evicted,
            broadcast = report.broadcast,
            "Cache invalidation complete"
        );
    } else {
        for err in &report.errors {
            warn!(error = %err, "Cache eviction failed");
        }
        warn!(
            ?namespaces,
            targets = report.targets,
            evicted = report.evicted,
            failures = report.errors.len(),
            "Cache invalidation completed with failures; affected entries expire by TTL"
        );
    }
}
