use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use gateway_core::model::{BackendType, RequestStatus, Response};
use gateway_engine::new_request_with_timeout;

use crate::error::ApiError;
use crate::poll::poll_until_terminal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub message: String,
    pub provider: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub timeout_s: Option<u64>,
    #[serde(default)]
    pub cache_bypass: bool,
    pub aggregation_strategy: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    #[serde(default)]
    pub wait: bool,
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AskAccepted {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub cached: bool,
    pub parallel: bool,
    pub agent: Option<String>,
}

fn wait_timeout(query: &WaitQuery, request_timeout_s: Option<u64>) -> Duration {
    Duration::from_secs(query.timeout.or(request_timeout_s).unwrap_or(30))
}

pub async fn ask(
    State(state): State<AppState>,
    Query(query): Query<WaitQuery>,
    Json(body): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = &state.ctx;
    let parallel = body.provider.as_deref().map(|p| p.starts_with('@')).unwrap_or(false);

    if !parallel && !body.cache_bypass {
        let provider = body.provider.clone().unwrap_or_else(|| ctx.router.default_provider().to_string());
        if let Some(hit) = ctx.cache.get(&provider, &body.message).await? {
            let request = new_request_with_timeout(
                body.message.clone(),
                body.provider.clone(),
                body.priority,
                BackendType::Single,
                body.timeout_s.unwrap_or(30),
            );
            let request_id = request.id;
            ctx.store.create_request(request).await?;
            ctx.store.update_request_status(request_id, RequestStatus::Processing).await?;
            ctx.store.update_request_status(request_id, RequestStatus::Completed).await?;
            ctx.store
                .save_response(Response {
                    request_id,
                    provider: provider.clone(),
                    content: hit.response.clone(),
                    latency_ms: 0,
                    cost_usd: 0.0,
                    input_tokens: 0,
                    output_tokens: 0,
                    cache_hit: true,
                    retries: 0,
                    status: RequestStatus::Completed,
                    error: None,
                    thinking: None,
                    raw_output: None,
                    metadata: HashMap::new(),
                    completed_at: chrono::Utc::now(),
                })
                .await?;
            return Ok(Json(json!({
                "request_id": request_id,
                "status": "completed",
                "cached": true,
                "parallel": false,
                "agent": body.agent,
                "content": hit.response,
                "latency_ms": 0,
            }))
            .into_response());
        }
    }

    let mut request = new_request_with_timeout(
        body.message.clone(),
        body.provider.clone(),
        body.priority,
        if parallel { BackendType::Parallel } else { BackendType::Single },
        body.timeout_s.unwrap_or(30),
    );
    if parallel {
        request.metadata.insert("parallel".into(), serde_json::Value::Bool(true));
    }
    if let Some(strategy) = &body.aggregation_strategy {
        request
            .metadata
            .insert("aggregation_strategy".into(), serde_json::Value::String(strategy.clone()));
    }
    if let Some(agent) = &body.agent {
        request.metadata.insert("agent".into(), serde_json::Value::String(agent.clone()));
    }

    let request_id = request.id;
    ctx.store.create_request(request.clone()).await?;
    ctx.broadcast(gateway_core::GatewayEvent::RequestSubmitted { request_id });
    if !ctx.queue.enqueue(request).await {
        return Err(ApiError::Internal("queue is at capacity".into()));
    }

    if query.wait {
        let timeout = wait_timeout(&query, body.timeout_s);
        let finished = poll_until_terminal(ctx.store.as_ref(), request_id, timeout).await?;
        return Ok(reply_body(ctx, request_id, finished).await?.into_response());
    }

    Ok(Json(AskAccepted {
        request_id,
        status: RequestStatus::Queued,
        cached: false,
        parallel,
        agent: body.agent,
    })
    .into_response())
}

async fn reply_body(
    ctx: &gateway_engine::AppContext,
    request_id: Uuid,
    request: Option<gateway_core::model::Request>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(request) = request else {
        return Err(ApiError::NotFound(format!("request {request_id} not found")));
    };
    let response = ctx.store.get_response(request_id).await?;
    Ok(Json(json!({
        "request_id": request_id,
        "status": request.status,
        "response": response,
    })))
}

pub async fn get_reply(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Query(query): Query<WaitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = &state.ctx;
    let request = if query.wait {
        let timeout = wait_timeout(&query, None);
        poll_until_terminal(ctx.store.as_ref(), request_id, timeout).await?
    } else {
        ctx.store.get_request(request_id).await?
    };
    reply_body(ctx, request_id, request).await
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = &state.ctx;
    let still_queued = ctx.queue.cancel(request_id).await;
    let request = ctx
        .store
        .get_request(request_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("request {request_id} not found")))?;

    if still_queued || !request.status.is_terminal() {
        ctx.store.update_request_status(request_id, RequestStatus::Cancelled).await?;
        ctx.broadcast(gateway_core::GatewayEvent::RequestCancelled { request_id });
    }
    Ok(Json(json!({ "request_id": request_id, "status": "cancelled" })))
}

pub async fn ask_stream(
    State(state): State<AppState>,
    Json(body): Json<AskRequest>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let ctx = state.ctx.clone();
    let provider = body
        .provider
        .clone()
        .unwrap_or_else(|| ctx.router.default_provider().to_string());

    let stream = async_stream::stream! {
        let request_id = Uuid::new_v4();
        ctx.stream.start(request_id, &provider).await;

        let backend = ctx.backends.get(&provider).cloned();
        let Some(backend) = backend else {
            let frame = ctx.stream.complete(request_id, false).await;
            yield Ok(Event::default().data(frame.to_sse_line()));
            return;
        };

        match backend.call(&body.message).await {
            Ok(output) => {
                let chunk = ctx.stream.push_chunk(request_id, output.content).await;
                yield Ok(Event::default().data(chunk.to_sse_line()));
                let done = ctx.stream.complete(request_id, true).await;
                yield Ok(Event::default().data(done.to_sse_line()));
            }
            Err(e) => {
                let chunk = ctx.stream.push_chunk(request_id, e.to_string()).await;
                yield Ok(Event::default().data(chunk.to_sse_line()));
                let done = ctx.stream.complete(request_id, false).await;
                yield Ok(Event::default().data(done.to_sse_line()));
            }
        }
    };

    Sse::new(stream)
}

#[derive(Debug, Deserialize)]
pub struct BatchAskRequest {
    pub items: Vec<AskRequest>,
}

const MAX_BATCH_ASK: usize = 50;
const MAX_BATCH_OTHER: usize = 100;

pub async fn batch_ask(
    State(state): State<AppState>,
    Json(body): Json<BatchAskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.items.len() > MAX_BATCH_ASK {
        return Err(ApiError::BadRequest(format!("batch ask accepts at most {MAX_BATCH_ASK} items")));
    }
    let ctx = &state.ctx;
    let mut accepted = Vec::with_capacity(body.items.len());
    for item in body.items {
        let parallel = item.provider.as_deref().map(|p| p.starts_with('@')).unwrap_or(false);
        let mut request = new_request_with_timeout(
            item.message,
            item.provider,
            item.priority,
            if parallel { BackendType::Parallel } else { BackendType::Single },
            item.timeout_s.unwrap_or(30),
        );
        if parallel {
            request.metadata.insert("parallel".into(), serde_json::Value::Bool(true));
        }
        let request_id = request.id;
        ctx.store.create_request(request.clone()).await?;
        if ctx.queue.enqueue(request).await {
            accepted.push(json!({ "request_id": request_id, "status": "queued" }));
        } else {
            accepted.push(json!({ "request_id": request_id, "status": "rejected", "error": "queue at capacity" }));
        }
    }
    Ok(Json(accepted))
}

#[derive(Debug, Deserialize)]
pub struct BatchIds {
    pub ids: Vec<Uuid>,
}

pub async fn batch_cancel(
    State(state): State<AppState>,
    Json(body): Json<BatchIds>,
) -> Result<impl IntoResponse, ApiError> {
    if body.ids.len() > MAX_BATCH_OTHER {
        return Err(ApiError::BadRequest(format!("batch cancel accepts at most {MAX_BATCH_OTHER} items")));
    }
    let ctx = &state.ctx;
    let mut results = Vec::with_capacity(body.ids.len());
    for id in body.ids {
        let still_queued = ctx.queue.cancel(id).await;
        if still_queued {
            let _ = ctx.store.update_request_status(id, RequestStatus::Cancelled).await;
        }
        results.push(json!({ "request_id": id, "cancelled": still_queued }));
    }
    Ok(Json(results))
}

pub async fn batch_status(
    State(state): State<AppState>,
    Json(body): Json<BatchIds>,
) -> Result<impl IntoResponse, ApiError> {
    if body.ids.len() > MAX_BATCH_OTHER {
        return Err(ApiError::BadRequest(format!("batch status accepts at most {MAX_BATCH_OTHER} items")));
    }
    let ctx = &state.ctx;
    let mut statuses: HashMap<Uuid, Option<RequestStatus>> = HashMap::new();
    for id in body.ids {
        let status = ctx.store.get_request(id).await?.map(|r| r.status);
        statuses.insert(id, status);
    }
    Ok(Json(statuses))
}

pub async fn batch_reply(
    State(state): State<AppState>,
    Json(body): Json<BatchIds>,
) -> Result<impl IntoResponse, ApiError> {
    if body.ids.len() > MAX_BATCH_OTHER {
        return Err(ApiError::BadRequest(format!("batch reply accepts at most {MAX_BATCH_OTHER} items")));
    }
    let ctx = &state.ctx;
    let mut replies = Vec::with_capacity(body.ids.len());
    for id in body.ids {
        let request = ctx.store.get_request(id).await?;
        replies.push(reply_body(ctx, id, request).await.map(|Json(v)| v).unwrap_or_else(|e| {
            json!({ "request_id": id, "error": e.to_string() })
        }));
    }
    Ok(Json(replies))
}
