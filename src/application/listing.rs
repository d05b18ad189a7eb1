//! Read side: paginated listings, article detail, favorites, and the tag
//! cloud, each served through the layered cache when one is configured.

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::pagination::{PageRequest, PageResponse, PaginationResolver};
use crate::application::repos::ArticleStore;
use crate::cache::{CacheKeyBuilder, CacheStatus, Cached, LayeredCache, ListingWindow};
use crate::domain::articles::{Article, ArticleFilter, SortSpec, TagCount};

const MAX_LOOKUP_IDS: usize = 200;

pub struct ArticleListingService {
    store: Arc<dyn ArticleStore>,
    resolver: PaginationResolver,
    cache: Option<Arc<LayeredCache>>,
    keys: CacheKeyBuilder,
}

impl ArticleListingService {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        resolver: PaginationResolver,
        cache: Option<Arc<LayeredCache>>,
        keys: CacheKeyBuilder,
    ) -> Self {
        Self {
            store,
            resolver,
            cache,
            keys,
        }
    }

    /// One page of articles. The response's `meta.cache` reports whether
    /// the page came from the cache.
    #[instrument(skip(self, request), fields(sort = %sort.field, dir = %sort.direction))]
    pub async fn list(
        &self,
        filter: ArticleFilter,
        sort: SortSpec,
        request: PageRequest,
    ) -> Result<PageResponse<Article>, AppError> {
        let filter = filter.normalized();
        let request = self.resolver.normalize(request);

        let Some(cache) = &self.cache else {
            let mut page = self.resolver.paginate(&filter, sort, &request).await?;
            page.meta.cache = CacheStatus::Bypass;
            return Ok(page);
        };

        let window = ListingWindow {
            limit: self.resolver.limits().clamp(request.limit),
            page: request.page,
            after: request.after.as_deref(),
            before: request.before.as_deref(),
        };
        let key = self.keys.listing(&filter, sort, &window);
        let cached = cache
            .get_or_set(&key, || self.resolver.paginate(&filter, sort, &request))
            .await?;

        let mut page = cached.value;
        page.meta.cache = cached.status;
        Ok(page)
    }

    /// The favorites of `user_id`, newest first unless `sort` says otherwise.
    pub async fn favorites(
        &self,
        user_id: Uuid,
        sort: SortSpec,
        request: PageRequest,
    ) -> Result<PageResponse<Article>, AppError> {
        let filter = ArticleFilter {
            favorited_by: Some(user_id),
            ..Default::default()
        };
        self.list(filter, sort, request).await
    }

    /// Not-found results are never cached, so an article created later
    /// under a previously requested id is visible immediately.
    pub async fn get_article(&self, id: Uuid) -> Result<Cached<Article>, AppError> {
        let Some(cache) = &self.cache else {
            return match self.store.find_by_id(id).await? {
                Some(article) => Ok(Cached::bypass(article)),
                None => Err(AppError::NotFound),
            };
        };

        let key = self.keys.article_detail(id);
        if let Some(hit) = cache.get::<Article>(&key).await {
            return Ok(hit);
        }
        let observed = cache.generation(key.namespace());
        let article = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(AppError::NotFound)?;
        cache.set_if_current(&key, &article, observed).await;
        Ok(Cached {
            value: article,
            status: CacheStatus::Miss,
            served_by: None,
        })
    }

    /// Which of `ids` the user has favorited, in ascending id order.
    pub async fn favorite_flags(
        &self,
        user_id: Uuid,
        mut ids: Vec<Uuid>,
    ) -> Result<Cached<Vec<Uuid>>, AppError> {
        ids.sort();
        ids.dedup();
        if ids.len() > MAX_LOOKUP_IDS {
            return Err(AppError::validation(format!(
                "at most {MAX_LOOKUP_IDS} ids may be looked up at once"
            )));
        }
        if ids.is_empty() {
            return Ok(Cached::bypass(Vec::new()));
        }

        let fetch = || async {
            let mut favorited = self.store.favorited_among(user_id, &ids).await?;
            favorited.sort();
            Ok::<_, AppError>(favorited)
        };
        match &self.cache {
            Some(cache) => {
                let key = self.keys.favorite_lookup(user_id, &ids);
                cache.get_or_set(&key, fetch).await
            }
            None => fetch().await.map(Cached::bypass),
        }
    }

    pub async fn tag_cloud(&self) -> Result<Cached<Vec<TagCount>>, AppError> {
        match &self.cache {
            Some(cache) => {
                let key = self.keys.tag_cloud();
                cache
                    .get_or_set(&key, || async {
                        self.store.tag_counts().await.map_err(AppError::from)
                    })
                    .await
            }
            None => Ok(Cached::bypass(self.store.tag_counts().await?)),
        }
    }
}
