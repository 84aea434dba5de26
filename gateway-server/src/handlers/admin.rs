use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn disable_provider(State(state): State<AppState>, Path(provider): Path<String>) -> Json<serde_json::Value> {
    state.ctx.health.force_disable(&provider).await;
    Json(json!({ "provider": provider, "status": "disabled" }))
}

pub async fn enable_provider(State(state): State<AppState>, Path(provider): Path<String>) -> Json<serde_json::Value> {
    state.ctx.health.force_enable(&provider).await;
    Json(json!({ "provider": provider, "status": "enabled" }))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKey {
    pub name: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "gw_live".to_string()
}

pub async fn create_api_key(
    State(state): State<AppState>,
    Json(body): Json<CreateApiKey>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (id, plaintext) = state.auth.keys.create(body.name, &body.prefix).await?;
    Ok(Json(json!({ "id": id, "key": plaintext })))
}

pub async fn list_api_keys(State(state): State<AppState>) -> Json<serde_json::Value> {
    let keys = state.auth.keys.list().await;
    let redacted: Vec<_> = keys
        .into_iter()
        .map(|k| {
            json!({
                "id": k.id,
                "name": k.name,
                "prefix": k.prefix,
                "enabled": k.enabled,
                "created_at": k.created_at,
                "last_used_at": k.last_used_at,
            })
        })
        .collect();
    Json(json!(redacted))
}

pub async fn delete_api_key(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.keys.delete(id).await?;
    Ok(Json(json!({ "id": id, "status": "deleted" })))
}

pub async fn enable_api_key(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.keys.enable(id).await?;
    Ok(Json(json!({ "id": id, "status": "enabled" })))
}

pub async fn disable_api_key(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.keys.disable(id).await?;
    Ok(Json(json!({ "id": id, "status": "disabled" })))
}
