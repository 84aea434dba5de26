//! Auth gate middleware, grounded in `acton-service`'s
//! `middleware::jwt::Jwt::middleware` (extract, validate, reject).

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use crate::error::ApiError;
use crate::state::AppState;

fn presented_key(request: &Request<Body>) -> Option<String> {
    if let Some(header) = request.headers().get("x-api-key") {
        return header.to_str().ok().map(str::to_string);
    }
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub async fn require_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    let key = presented_key(&request);
    state.auth.authenticate(&path, addr.ip(), key.as_deref()).await?;
    Ok(next.run(request).await)
}
