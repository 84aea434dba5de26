use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Collapses every handler failure into a JSON body + status code, the
/// same funnel pattern `acton-service` uses for its `Error` type.
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    RateLimited(u64),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(m) => write!(f, "not found: {m}"),
            ApiError::BadRequest(m) => write!(f, "bad request: {m}"),
            ApiError::Unauthorized(m) => write!(f, "unauthorized: {m}"),
            ApiError::RateLimited(s) => write!(f, "rate limited, retry after {s}s"),
            ApiError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::RateLimited(retry_after_s) => {
                (StatusCode::TOO_MANY_REQUESTS, format!("rate limited, retry after {retry_after_s}s"))
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "detail": message }))).into_response()
    }
}

impl From<gateway_store::StoreError> for ApiError {
    fn from(e: gateway_store::StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<gateway_auth::AuthError> for ApiError {
    fn from(e: gateway_auth::AuthError) -> Self {
        use gateway_auth::AuthError::*;
        match e {
            MissingKey | InvalidKey | Revoked => ApiError::Unauthorized(e.to_string()),
            NotFound => ApiError::NotFound(e.to_string()),
            RateLimited { retry_after_s } => ApiError::RateLimited(retry_after_s),
            Hash(_) => ApiError::Internal(e.to_string()),
        }
    }
}
