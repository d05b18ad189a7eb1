//! Process-local article store. Backs `serve --store memory` and the test
//! suites; ordering and filtering match the Postgres store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{ArticleStore, ArticleWriteRepo, RangeWindow, StoreError};
use crate::domain::articles::{
    Article, ArticleFilter, ArticleUpdate, NewArticle, SortSpec, TagCount,
};

#[derive(Default)]
struct State {
    articles: HashMap<Uuid, Article>,
    favorites: HashMap<Uuid, BTreeSet<Uuid>>,
}

#[derive(Default)]
pub struct InMemoryArticleStore {
    state: RwLock<State>,
    reads: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(articles: impl IntoIterator<Item = Article>) -> Self {
        let state = State {
            articles: articles.into_iter().map(|a| (a.id, a)).collect(),
            favorites: HashMap::new(),
        };
        Self {
            state: RwLock::new(state),
            ..Self::default()
        }
    }

    /// Number of listing, count, detail, and tag queries served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// While set, every call fails with a retryable error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.articles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Timeout);
        }
        Ok(())
    }

    fn read_query(&self) -> Result<(), StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl State {
    fn matching<'a>(&'a self, filter: &'a ArticleFilter) -> impl Iterator<Item = &'a Article> + 'a {
        let favorites = filter
            .favorited_by
            .map(|user| self.favorites.get(&user));
        self.articles.values().filter(move |article| {
            let favorited = match favorites {
                None => true,
                Some(None) => false,
                Some(Some(set)) => set.contains(&article.id),
            };
            favorited && filter.matches(article)
        })
    }
}

#[async_trait]
impl ArticleStore for InMemoryArticleStore {
    async fn count(&self, filter: &ArticleFilter) -> Result<u64, StoreError> {
        self.read_query()?;
        let state = self.state.read().await;
        Ok(state.matching(filter).count() as u64)
    }

    async fn find_range(
        &self,
        filter: &ArticleFilter,
        sort: SortSpec,
        window: &RangeWindow,
        limit: u32,
    ) -> Result<Vec<Article>, StoreError> {
        self.read_query()?;
        let state = self.state.read().await;
        let mut rows: Vec<&Article> = state.matching(filter).collect();
        rows.sort_by(|a, b| sort.compare(a, b));

        let limit = limit as usize;
        let page = match window {
            RangeWindow::Offset(skip) => rows
                .into_iter()
                .skip(usize::try_from(*skip).unwrap_or(usize::MAX))
                .take(limit)
                .cloned()
                .collect(),
            RangeWindow::After(position) => rows
                .into_iter()
                .filter(|article| position.precedes(article, sort))
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(page)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>, StoreError> {
        self.read_query()?;
        Ok(self.state.read().await.articles.get(&id).cloned())
    }

    async fn favorited_among(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        self.read_query()?;
        let state = self.state.read().await;
        let Some(favorites) = state.favorites.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .copied()
            .filter(|id| favorites.contains(id))
            .collect())
    }

    async fn tag_counts(&self) -> Result<Vec<TagCount>, StoreError> {
        self.read_query()?;
        let state = self.state.read().await;
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for tag in state.articles.values().flat_map(|a| a.tags.iter()) {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        Ok(tags)
    }
}

#[async_trait]
impl ArticleWriteRepo for InMemoryArticleStore {
    async fn insert_article(&self, article: NewArticle) -> Result<Article, StoreError> {
        self.check()?;
        let article = article.into_article(Uuid::new_v4(), OffsetDateTime::now_utc());
        self.state
            .write()
            .await
            .articles
            .insert(article.id, article.clone());
        Ok(article)
    }

    async fn update_article(&self, id: Uuid, update: ArticleUpdate) -> Result<Article, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let article = state.articles.get_mut(&id).ok_or(StoreError::NotFound)?;
        update.apply(article, OffsetDateTime::now_utc());
        Ok(article.clone())
    }

    async fn delete_article(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let existed = state.articles.remove(&id).is_some();
        if existed {
            for favorites in state.favorites.values_mut() {
                favorites.remove(&id);
            }
        }
        Ok(existed)
    }

    async fn import_articles(&self, articles: Vec<NewArticle>) -> Result<u64, StoreError> {
        self.check()?;
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write().await;
        let mut imported = 0;
        for article in articles {
            let article = article.into_article(Uuid::new_v4(), now);
            state.articles.insert(article.id, article);
            imported += 1;
        }
        Ok(imported)
    }

    async fn rename_tag(&self, from: &str, to: &str) -> Result<u64, StoreError> {
        self.check()?;
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write().await;
        let mut touched = 0;
        for article in state.articles.values_mut() {
            if !article.tags.iter().any(|t| t == from) {
                continue;
            }
            for tag in article.tags.iter_mut().filter(|t| *t == from) {
                *tag = to.to_string();
            }
            article.tags.sort();
            article.tags.dedup();
            article.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }

    async fn set_favorite(
        &self,
        user_id: Uuid,
        article_id: Uuid,
        favorite: bool,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.articles.contains_key(&article_id) {
            return Err(StoreError::NotFound);
        }
        let favorites = state.favorites.entry(user_id).or_default();
        Ok(if favorite {
            favorites.insert(article_id)
        } else {
            favorites.remove(&article_id)
        })
    }
}
