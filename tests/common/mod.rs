#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::macros::datetime;
use uuid::Uuid;

use newsdeck::application::commands::ArticleCommandService;
use newsdeck::application::listing::ArticleListingService;
use newsdeck::application::pagination::{PageLimits, PaginationResolver};
use newsdeck::cache::{
    BackendKind, CacheBackend, CacheEntry, CacheError, CacheInvalidator, CacheKeyBuilder,
    CacheTier, LayeredCache, MemoryBackend,
};
use newsdeck::domain::articles::Article;
use newsdeck::infra::memory_store::InMemoryArticleStore;

pub const PREFIX: &str = "test";

const HEALTHY: u8 = 0;
const FAILING: u8 = 1;
const STALLED: u8 = 2;

/// A memory backend that can be switched into failing or stalling on
/// every operation, and counts the calls it receives.
pub struct FlakyBackend {
    inner: MemoryBackend,
    kind: BackendKind,
    mode: AtomicU8,
    calls: AtomicUsize,
    keys_delay_ms: AtomicU64,
}

impl FlakyBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            inner: MemoryBackend::new(NonZeroUsize::new(1_024).unwrap()),
            kind,
            mode: AtomicU8::new(HEALTHY),
            calls: AtomicUsize::new(0),
            keys_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn fail(&self) {
        self.mode.store(FAILING, Ordering::SeqCst);
    }

    pub fn stall(&self) {
        self.mode.store(STALLED, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.mode.store(HEALTHY, Ordering::SeqCst);
    }

    /// Makes every pattern scan take `delay`, like a SCAN over a large
    /// keyspace.
    pub fn slow_keys(&self, delay: Duration) {
        self.keys_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            FAILING => Err(CacheError::backend("flaky", "connection refused")),
            STALLED => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.gate().await?;
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.gate().await?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.gate().await?;
        self.inner.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.gate().await?;
        let delay = self.keys_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.keys(pattern).await
    }
}

pub fn memory_tier(name: &str) -> CacheTier {
    CacheTier::new(
        name,
        Arc::new(MemoryBackend::new(NonZeroUsize::new(1_024).unwrap())),
        Duration::from_secs(300),
        Duration::from_millis(50),
    )
}

pub fn flaky_tier(name: &str, backend: Arc<FlakyBackend>) -> CacheTier {
    CacheTier::new(
        name,
        backend,
        Duration::from_secs(300),
        Duration::from_millis(50),
    )
}

/// Article `n` of a feed whose publish times rise one hour per article.
pub fn article(n: u32) -> Article {
    let published_at = datetime!(2024-06-01 00:00 UTC) + time::Duration::hours(n.into());
    Article {
        id: Uuid::from_u128(u128::from(n)),
        title: format!("Headline {n:03}"),
        summary: format!("Summary for story {n}"),
        source: if n % 2 == 0 { "wire" } else { "blog" }.to_string(),
        url: format!("https://news.example/{n}"),
        tags: if n % 3 == 0 {
            vec!["rust".to_string()]
        } else {
            vec!["general".to_string()]
        },
        published_at,
        created_at: published_at,
        updated_at: published_at,
    }
}

pub fn articles(count: u32) -> Vec<Article> {
    (1..=count).map(article).collect()
}

/// Services over an in-memory store and a two-tier memory cache.
pub struct Harness {
    pub store: Arc<InMemoryArticleStore>,
    pub cache: Arc<LayeredCache>,
    pub invalidator: Arc<CacheInvalidator>,
    pub listing: Arc<ArticleListingService>,
    pub commands: Arc<ArticleCommandService>,
    pub keys: CacheKeyBuilder,
}

impl Harness {
    pub fn new(seed: Vec<Article>) -> Self {
        Self::with_tiers(seed, vec![memory_tier("hot"), memory_tier("warm")])
    }

    pub fn with_tiers(seed: Vec<Article>, tiers: Vec<CacheTier>) -> Self {
        let store = Arc::new(InMemoryArticleStore::with_articles(seed));
        let cache = Arc::new(LayeredCache::new(tiers).unwrap().with_single_flight());
        let keys = CacheKeyBuilder::new(PREFIX);
        let invalidator = Arc::new(CacheInvalidator::new(cache.clone(), keys.clone()));
        let resolver = PaginationResolver::new(store.clone(), PageLimits::default());
        let listing = Arc::new(ArticleListingService::new(
            store.clone(),
            resolver,
            Some(cache.clone()),
            keys.clone(),
        ));
        let commands = Arc::new(ArticleCommandService::new(
            store.clone(),
            Some(invalidator.clone()),
        ));
        Self {
            store,
            cache,
            invalidator,
            listing,
            commands,
            keys,
        }
    }
}
