use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn cache_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.ctx.cache.stats().await?;
    Ok(Json(json!({
        "total_entries": stats.total_entries,
        "hits": stats.total_hits,
        "misses": stats.total_misses,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_top")]
    pub n: usize,
}

fn default_top() -> usize {
    10
}

pub async fn cache_stats_detailed(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.ctx.cache.stats().await?;
    let top = state.ctx.cache.top_entries(query.n).await?;
    Ok(Json(json!({
        "total_entries": stats.total_entries,
        "hits": stats.total_hits,
        "misses": stats.total_misses,
        "top_entries": top,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
}

pub async fn cache_delete(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.ctx.cache.clear(query.provider.as_deref()).await?;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn cache_cleanup(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.ctx.cache.sweep_expired().await?;
    Ok(Json(json!({ "removed": removed })))
}
