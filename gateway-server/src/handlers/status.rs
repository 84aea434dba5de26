use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use gateway_store::RequestFilter;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.ctx.store.stats().await?;
    Ok(Json(serde_json::to_value(stats).unwrap()))
}

pub async fn providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let router = &state.ctx.router;
    Json(json!({
        "providers": router.all_providers(),
        "default_provider": router.default_provider(),
    }))
}

pub async fn provider_groups(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.ctx.router.provider_groups()))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub provider: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

fn parse_status(s: &str) -> Option<gateway_core::model::RequestStatus> {
    use gateway_core::model::RequestStatus::*;
    match s {
        "queued" => Some(Queued),
        "processing" => Some(Processing),
        "completed" => Some(Completed),
        "failed" => Some(Failed),
        "cancelled" => Some(Cancelled),
        "timeout" => Some(Timeout),
        _ => None,
    }
}

pub async fn requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let filter = RequestFilter {
        status: query.status.as_deref().and_then(parse_status),
        provider: query.provider,
    };
    let rows = state
        .ctx
        .store
        .list_requests(filter, gateway_store::SortOrder::Desc, query.limit, query.offset)
        .await?;
    Ok(Json(json!(rows)))
}

pub async fn queue(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.ctx.queue.stats().await;
    Json(json!({
        "queue_depth": stats.queue_depth,
        "processing_count": stats.processing_count,
        "max_concurrent": stats.max_concurrent,
        "by_provider": stats.by_provider,
    }))
}

pub async fn stream_tail(State(state): State<AppState>, Path(request_id): Path<Uuid>) -> Json<serde_json::Value> {
    let entries = state.ctx.stream.tail(request_id).await;
    Json(json!(entries))
}

pub async fn stream_full(State(state): State<AppState>, Path(request_id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state.ctx.store.stream_entries(request_id).await?;
    Ok(Json(json!(entries)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

pub async fn streams(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state.ctx.store.search_thinking(&query.q).await?;
    Ok(Json(json!(entries)))
}
