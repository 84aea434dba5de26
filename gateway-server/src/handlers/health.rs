use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let statuses = state.ctx.health.all_status().await;
    let healthy = statuses.iter().all(|s| s.status != gateway_core::model::ProviderStatus::Unavailable);
    Json(json!({ "healthy": healthy, "providers": statuses }))
}

pub async fn test_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.ctx.health.check_now(None).await;
    Json(json!({ "checked": true }))
}

pub async fn test_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let statuses = state.ctx.health.all_status().await;
    Json(json!(statuses))
}

pub async fn test_full(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.ctx.health.check_now(None).await;
    let statuses = state.ctx.health.all_status().await;
    let queue = state.ctx.queue.stats().await;
    let backpressure = state.ctx.backpressure.state();
    Json(json!({
        "providers": statuses,
        "queue": { "depth": queue.queue_depth, "processing": queue.processing_count },
        "backpressure": backpressure,
    }))
}

pub async fn health_checker_status(State(state): State<AppState>, Path(provider): Path<String>) -> Json<serde_json::Value> {
    let status = state.ctx.health.status(&provider).await;
    Json(json!(status))
}

pub async fn health_checker_all(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.ctx.health.all_status().await))
}
