//! Write side. Each command commits to the store first and only then
//! invalidates. A read that fetched before the commit may still be filling
//! the cache at that point; the invalidation advances the namespace
//! generation so that fill is discarded. Invalidation failures are logged
//! and never fail the command.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::ArticleWriteRepo;
use crate::cache::{CacheInvalidator, MutationEvent};
use crate::domain::articles::{Article, ArticleUpdate, NewArticle, normalize_tag};

pub struct ArticleCommandService {
    repo: Arc<dyn ArticleWriteRepo>,
    invalidator: Option<Arc<CacheInvalidator>>,
}

impl ArticleCommandService {
    pub fn new(repo: Arc<dyn ArticleWriteRepo>, invalidator: Option<Arc<CacheInvalidator>>) -> Self {
        Self { repo, invalidator }
    }

    #[instrument(skip(self, article), fields(title = %article.title))]
    pub async fn create(&self, article: NewArticle) -> Result<Article, AppError> {
        let article = self.repo.insert_article(article.validated()?).await?;
        self.invalidate(MutationEvent::ArticleCreated).await;
        Ok(article)
    }

    #[instrument(skip(self, update))]
    pub async fn update(&self, id: Uuid, update: ArticleUpdate) -> Result<Article, AppError> {
        let update = update.validated()?;
        if update.is_empty() {
            return Err(AppError::validation("update must change at least one field"));
        }
        let article = self
            .repo
            .update_article(id, update)
            .await?;
        self.invalidate(MutationEvent::ArticleUpdated { article_id: id })
            .await;
        Ok(article)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        if !self.repo.delete_article(id).await? {
            return Err(AppError::NotFound);
        }
        self.invalidate(MutationEvent::ArticleDeleted { article_id: id })
            .await;
        Ok(())
    }

    #[instrument(skip(self, articles), fields(count = articles.len()))]
    pub async fn import(&self, articles: Vec<NewArticle>) -> Result<u64, AppError> {
        let articles = articles
            .into_iter()
            .map(NewArticle::validated)
            .collect::<Result<Vec<_>, _>>()?;
        if articles.is_empty() {
            return Ok(0);
        }
        let imported = self.repo.import_articles(articles).await?;
        self.invalidate(MutationEvent::BulkImport).await;
        Ok(imported)
    }

    #[instrument(skip(self))]
    pub async fn rename_tag(&self, from: &str, to: &str) -> Result<u64, AppError> {
        let (from, to) = (normalize_tag(from), normalize_tag(to));
        if from.is_empty() || to.is_empty() {
            return Err(AppError::validation("tag names must not be empty"));
        }
        if from == to {
            return Ok(0);
        }
        let touched = self.repo.rename_tag(&from, &to).await?;
        if touched > 0 {
            self.invalidate(MutationEvent::TagChanged).await;
        }
        Ok(touched)
    }

    #[instrument(skip(self))]
    pub async fn set_favorite(
        &self,
        user_id: Uuid,
        article_id: Uuid,
        favorite: bool,
    ) -> Result<bool, AppError> {
        let changed = self
            .repo
            .set_favorite(user_id, article_id, favorite)
            .await?;
        if changed {
            self.invalidate(MutationEvent::FavoriteChanged { user_id })
                .await;
        }
        Ok(changed)
    }

    async fn invalidate(&self, event: MutationEvent) {
        let Some(invalidator) = &self.invalidator else {
            return;
        };
        let report = invalidator.handle(event).await;
        if !report.is_clean() {
            info!(
                %event,
                failures = report.errors.len(),
                "Mutation committed; some cache entries will expire by TTL instead"
            );
        }
    }
}
