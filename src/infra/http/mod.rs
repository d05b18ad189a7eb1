//! HTTP surface: article listings, favorites, writes, and cache administration.

mod articles;
mod cache_admin;
mod favorites;
mod middleware;

pub use articles::CACHE_TIER_HEADER;
pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use sqlx::Error as SqlxError;

use crate::application::commands::ArticleCommandService;
use crate::application::error::ErrorReport;
use crate::application::listing::ArticleListingService;
use crate::application::pagination::PaginationMode;
use crate::cache::{CacheInvalidator, CacheStatus, LayeredCache};
use crate::infra::db::PostgresArticleStore;

pub const CACHE_HEADER: &str = "x-cache";
pub const PAGINATION_MODE_HEADER: &str = "x-pagination-mode";

#[derive(Clone)]
pub struct HttpState {
    pub listing: Arc<ArticleListingService>,
    pub commands: Arc<ArticleCommandService>,
    pub cache: Option<Arc<LayeredCache>>,
    pub invalidator: Option<Arc<CacheInvalidator>>,
    /// Checked by `/health` when articles live in Postgres.
    pub db: Option<Arc<PostgresArticleStore>>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/articles",
            get(articles::list_articles).post(articles::create_article),
        )
        .route("/articles/import", post(articles::import_articles))
        .route(
            "/articles/{id}",
            get(articles::get_article)
                .patch(articles::update_article)
                .delete(articles::delete_article),
        )
        .route("/tags", get(articles::tag_cloud))
        .route("/tags/rename", post(articles::rename_tag))
        .route("/users/{user_id}/favorites", get(favorites::list_favorites))
        .route(
            "/users/{user_id}/favorites/lookup",
            get(favorites::lookup_favorites),
        )
        .route(
            "/users/{user_id}/favorites/{article_id}",
            put(favorites::add_favorite).delete(favorites::remove_favorite),
        )
        .route("/admin/cache/stats", get(cache_admin::stats))
        .route("/admin/cache/stats/reset", post(cache_admin::reset_stats))
        .route("/admin/cache/purge", post(cache_admin::purge))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

async fn health(State(state): State<HttpState>) -> Response {
    match &state.db {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

fn with_cache_status(mut response: Response, status: CacheStatus) -> Response {
    response
        .headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(status.as_str()));
    response
}

fn with_pagination_mode(mut response: Response, mode: PaginationMode) -> Response {
    response
        .headers_mut()
        .insert(PAGINATION_MODE_HEADER, HeaderValue::from_static(mode.as_str()));
    response
}
