use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::pagination::{PageRequest, PageResponse};
use crate::cache::Cached;
use crate::domain::articles::{Article, ArticleFilter, ArticleUpdate, NewArticle, SortSpec};

use super::{HttpState, with_cache_status, with_pagination_mode};

pub const CACHE_TIER_HEADER: &str = "x-cache-tier";

/// Query string shared by article and favorites listings. `tag` takes a
/// comma separated list; `cursor` is accepted as an alias of `after`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub source: Option<String>,
    pub tag: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    pub after: Option<String>,
    pub cursor: Option<String>,
    pub before: Option<String>,
}

impl ListQuery {
    pub(super) fn sort(&self) -> Result<SortSpec, AppError> {
        Ok(SortSpec::parse(self.sort.as_deref(), self.dir.as_deref())?)
    }

    pub(super) fn filter(&self) -> ArticleFilter {
        ArticleFilter {
            source: self.source.clone(),
            tags: self
                .tag
                .as_deref()
                .map(|raw| raw.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            search: self.q.clone(),
            favorited_by: None,
        }
    }

    pub(super) fn page_request(self) -> PageRequest {
        PageRequest {
            limit: self.limit,
            page: self.page,
            after: self.after.or(self.cursor),
            before: self.before,
        }
    }
}

pub(super) fn page_response(page: PageResponse<Article>) -> Response {
    let (mode, cache) = (page.meta.mode, page.meta.cache);
    let response = Json(page).into_response();
    with_cache_status(with_pagination_mode(response, mode), cache)
}

pub(super) fn cached_response<T: Serialize>(cached: Cached<T>) -> Response {
    let mut response = Json(cached.value).into_response();
    if let Some(tier) = cached.served_by
        && let Ok(value) = HeaderValue::from_str(&tier)
    {
        response.headers_mut().insert(CACHE_TIER_HEADER, value);
    }
    with_cache_status(response, cached.status)
}

pub async fn list_articles(
    State(state): State<HttpState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let sort = query.sort()?;
    let filter = query.filter();
    let page = state
        .listing
        .list(filter, sort, query.page_request())
        .await?;
    Ok(page_response(page))
}

pub async fn get_article(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let article = state.listing.get_article(id).await?;
    Ok(cached_response(article))
}

pub async fn create_article(
    State(state): State<HttpState>,
    Json(payload): Json<NewArticle>,
) -> Result<impl IntoResponse, AppError> {
    let article = state.commands.create(payload).await?;
    Ok((StatusCode::CREATED, Json(article)))
}

pub async fn update_article(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ArticleUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let article = state.commands.update(id, payload).await?;
    Ok(Json(article))
}

pub async fn delete_article(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.commands.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: u64,
}

pub async fn import_articles(
    State(state): State<HttpState>,
    Json(payload): Json<Vec<NewArticle>>,
) -> Result<impl IntoResponse, AppError> {
    let imported = state.commands.import(payload).await?;
    Ok(Json(ImportResponse { imported }))
}

pub async fn tag_cloud(State(state): State<HttpState>) -> Result<Response, AppError> {
    let tags = state.listing.tag_cloud().await?;
    Ok(cached_response(tags))
}

#[derive(Debug, Deserialize)]
pub struct RenameTagRequest {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct RenameTagResponse {
    pub renamed: u64,
}

pub async fn rename_tag(
    State(state): State<HttpState>,
    Json(payload): Json<RenameTagRequest>,
) -> Result<impl IntoResponse, AppError> {
    let renamed = state
        .commands
        .rename_tag(&payload.from, &payload.to)
        .await?;
    Ok(Json(RenameTagResponse { renamed }))
}
