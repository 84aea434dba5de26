use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use gateway_discussion::export::{render, ExportFormat};
use gateway_discussion::templates::DiscussionTemplate;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartDiscussion {
    pub topic: String,
    pub providers: Vec<String>,
}

pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartDiscussion>,
) -> Json<serde_json::Value> {
    let session_id = state.ctx.discussion.start(body.topic, body.providers).await;
    Json(json!({ "session_id": session_id }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .ctx
        .store
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("discussion {session_id} not found")))?;
    Ok(Json(json!(session)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let messages = state.ctx.store.get_messages(session_id, None, None).await?;
    Ok(Json(json!(messages)))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state
        .ctx
        .store
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("discussion {session_id} not found")))?;
    session.status = gateway_core::model::DiscussionStatus::Failed;
    state.ctx.store.update_session(session).await?;
    Ok(Json(json!({ "session_id": session_id, "status": "deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct ContinueDiscussion {
    pub follow_up_topic: String,
}

pub async fn continue_discussion(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<ContinueDiscussion>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.ctx.discussion.continue_session(session_id, body.follow_up_topic).await {
        Some(new_id) => Ok(Json(json!({ "session_id": new_id, "parent_session_id": session_id }))),
        None => Err(ApiError::BadRequest(format!(
            "discussion {session_id} has no completed summary to continue from"
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "md".to_string()
}

pub async fn export(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let session = state
        .ctx
        .store
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("discussion {session_id} not found")))?;
    let messages = state.ctx.store.get_messages(session_id, None, None).await?;
    let format = ExportFormat::from_str(&query.format)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown export format {}", query.format)))?;
    let content_type = match format {
        ExportFormat::Markdown => "text/markdown",
        ExportFormat::Json => "application/json",
        ExportFormat::Html => "text/html",
    };
    let body = render(&session, &messages, format);
    Ok(([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response())
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(template): Json<DiscussionTemplate>,
) -> Json<serde_json::Value> {
    state.templates.create(template.clone()).await;
    Json(json!(template))
}

pub async fn list_templates(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.templates.list().await))
}

pub async fn get_template(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .templates
        .get(&name)
        .await
        .map(|t| Json(json!(t)))
        .ok_or_else(|| ApiError::NotFound(format!("template {name} not found")))
}

pub async fn delete_template(State(state): State<AppState>, Path(name): Path<String>) -> Json<serde_json::Value> {
    let deleted = state.templates.delete(&name).await;
    Json(json!({ "name": name, "deleted": deleted }))
}
