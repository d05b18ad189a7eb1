use axum::{
    Json,
    extract::State,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::application::error::AppError;
use crate::cache::{LayeredStats, Namespace};

use super::HttpState;

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub enabled: bool,
    #[serde(flatten)]
    pub stats: Option<LayeredStats>,
}

pub async fn stats(State(state): State<HttpState>) -> impl IntoResponse {
    Json(CacheStatsResponse {
        enabled: state.cache.is_some(),
        stats: state.cache.as_ref().map(|cache| cache.stats()),
    })
}

/// Zeroes the counters and returns the values they held.
pub async fn reset_stats(State(state): State<HttpState>) -> impl IntoResponse {
    let stats = state.cache.as_ref().map(|cache| {
        let before = cache.stats();
        cache.reset_stats();
        before
    });
    Json(CacheStatsResponse {
        enabled: state.cache.is_some(),
        stats,
    })
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub namespace: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub namespace: Namespace,
    pub evicted: u64,
    pub broadcast: bool,
    pub errors: Vec<String>,
}

pub async fn purge(
    State(state): State<HttpState>,
    Json(payload): Json<PurgeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let namespace: Namespace = payload.namespace.parse()?;
    let Some(invalidator) = &state.invalidator else {
        return Ok(Json(PurgeResponse {
            namespace,
            evicted: 0,
            broadcast: false,
            errors: Vec::new(),
        }));
    };

    let report = invalidator.purge_namespace(namespace).await;
    Ok(Json(PurgeResponse {
        namespace,
        evicted: report.evicted,
        broadcast: report.broadcast,
        errors: report.errors.iter().map(ToString::to_string).collect(),
    }))
}
