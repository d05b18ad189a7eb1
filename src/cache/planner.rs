//! Eviction plan generation.
//!
//! Maps mutation events to the keys and patterns they make stale and
//! merges several events into one deduplicated plan. Precision is traded
//! for correctness: when a mutation could change which items appear in a
//! listing, or their order, the whole namespace is swept.

use std::collections::BTreeSet;
use std::fmt;

use super::events::MutationEvent;
use super::keys::{CacheKey, CacheKeyBuilder, KeyPattern, Namespace};

/// Namespaces whose entries embed article content.
const ARTICLE_DERIVED: [Namespace; 4] = [
    Namespace::ArticleList,
    Namespace::ArticleDetail,
    Namespace::TagCloud,
    Namespace::FavoriteList,
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    keys: BTreeSet<CacheKey>,
    patterns: BTreeSet<KeyPattern>,
    swept: BTreeSet<Namespace>,
}

impl fmt::Display for EvictionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EvictionPlan {{ keys: {}, patterns: {}, swept: [",
            self.keys.len(),
            self.patterns.len()
        )?;
        for (idx, ns) in self.swept.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(ns.as_str())?;
        }
        f.write_str("] }")
    }
}

impl EvictionPlan {
    /// Merge events into one plan. Keys already covered by a
    /// namespace-wide sweep are dropped.
    pub fn from_events(
        keys: &CacheKeyBuilder,
        events: impl IntoIterator<Item = MutationEvent>,
    ) -> Self {
        let mut plan = Self::default();
        for event in events {
            plan.add_event(keys, event);
        }
        plan.compact();
        plan
    }

    /// Sweep one namespace entirely.
    pub fn purge(keys: &CacheKeyBuilder, namespace: Namespace) -> Self {
        let mut plan = Self::default();
        plan.sweep(keys.namespace_pattern(namespace));
        plan
    }

    fn add_event(&mut self, keys: &CacheKeyBuilder, event: MutationEvent) {
        match event {
            MutationEvent::ArticleCreated => {
                self.sweep(keys.namespace_pattern(Namespace::ArticleList));
                self.sweep(keys.namespace_pattern(Namespace::TagCloud));
            }
            MutationEvent::ArticleUpdated { article_id } => {
                self.evict(keys.article_detail(article_id));
                self.sweep(keys.namespace_pattern(Namespace::ArticleList));
                self.sweep(keys.namespace_pattern(Namespace::TagCloud));
                self.sweep(keys.namespace_pattern(Namespace::FavoriteList));
            }
            MutationEvent::ArticleDeleted { article_id } => {
                self.evict(keys.article_detail(article_id));
                self.sweep(keys.namespace_pattern(Namespace::ArticleList));
                self.sweep(keys.namespace_pattern(Namespace::TagCloud));
                self.sweep(keys.namespace_pattern(Namespace::FavoriteList));
                self.sweep(keys.namespace_pattern(Namespace::FavoriteLookup));
            }
            MutationEvent::BulkImport => {
                for ns in ARTICLE_DERIVED {
                    self.sweep(keys.namespace_pattern(ns));
                }
            }
            MutationEvent::TagChanged => {
                for ns in ARTICLE_DERIVED {
                    self.sweep(keys.namespace_pattern(ns));
                }
            }
            MutationEvent::FavoriteChanged { user_id } => {
                self.sweep(keys.user_pattern(Namespace::FavoriteList, user_id));
                self.sweep(keys.user_pattern(Namespace::FavoriteLookup, user_id));
            }
        }
    }

    fn evict(&mut self, key: CacheKey) {
        self.keys.insert(key);
    }

    fn sweep(&mut self, pattern: KeyPattern) {
        if pattern.is_namespace_wide() {
            self.swept.insert(pattern.namespace());
        }
        self.patterns.insert(pattern);
    }

    fn compact(&mut self) {
        let swept = &self.swept;
        self.keys.retain(|key| !swept.contains(&key.namespace()));
        // A user-scoped pattern is redundant next to its namespace-wide sweep.
        self.patterns
            .retain(|pattern| pattern.is_namespace_wide() || !swept.contains(&pattern.namespace()));
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.keys.iter()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &KeyPattern> {
        self.patterns.iter()
    }

    /// Namespaces touched by this plan.
    pub fn namespaces(&self) -> BTreeSet<Namespace> {
        self.keys
            .iter()
            .map(CacheKey::namespace)
            .chain(self.patterns.iter().map(KeyPattern::namespace))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }
}
