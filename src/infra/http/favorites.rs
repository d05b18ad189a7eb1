use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::error::AppError;

use super::HttpState;
use super::articles::{ListQuery, cached_response, page_response};

pub async fn list_favorites(
    State(state): State<HttpState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let sort = query.sort()?;
    let page = state
        .listing
        .favorites(user_id, sort, query.page_request())
        .await?;
    Ok(page_response(page))
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    /// Comma separated article ids.
    pub ids: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub favorited: Vec<Uuid>,
}

pub async fn lookup_favorites(
    State(state): State<HttpState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<LookupQuery>,
) -> Result<Response, AppError> {
    let ids = parse_ids(query.ids.as_deref().unwrap_or_default())?;
    let favorited = state.listing.favorite_flags(user_id, ids).await?;
    Ok(cached_response(
        favorited.map(|favorited| LookupResponse { favorited }),
    ))
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub favorited: bool,
    pub changed: bool,
}

pub async fn add_favorite(
    State(state): State<HttpState>,
    Path((user_id, article_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let changed = state
        .commands
        .set_favorite(user_id, article_id, true)
        .await?;
    Ok(Json(FavoriteResponse {
        favorited: true,
        changed,
    }))
}

pub async fn remove_favorite(
    State(state): State<HttpState>,
    Path((user_id, article_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let changed = state
        .commands
        .set_favorite(user_id, article_id, false)
        .await?;
    Ok(Json(FavoriteResponse {
        favorited: false,
        changed,
    }))
}

fn parse_ids(raw: &str) -> Result<Vec<Uuid>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            Uuid::parse_str(part)
                .map_err(|_| AppError::validation(format!("`{part}` is not a valid article id")))
        })
        .collect()
}
