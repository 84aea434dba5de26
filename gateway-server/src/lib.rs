//! C13: HTTP/WS/SSE surface. Builds one `axum::Router` wiring every
//! endpoint in spec §4.13 to the shared [`AppContext`], following the
//! middleware-stack and graceful-shutdown pattern of
//! `acton-service::server::Server`.

pub mod auth_middleware;
pub mod error;
pub mod handlers;
pub mod poll;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use gateway_auth::Authenticator;
use gateway_discussion::templates::TemplateStore;
use gateway_engine::AppContext;

pub use state::AppState;

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    state.ctx.metrics.export().unwrap_or_default()
}

/// Assembles the full router. `gateway-cli` is responsible for binding
/// a `TcpListener` and calling `axum::serve`.
pub fn build_router(ctx: Arc<AppContext>, auth: Arc<Authenticator>) -> Router {
    let state = AppState {
        ctx,
        auth,
        templates: Arc::new(TemplateStore::new()),
    };

    let api = Router::new()
        .route("/ask", post(handlers::ask::ask))
        .route("/ask/stream", post(handlers::ask::ask_stream))
        .route("/reply/{id}", get(handlers::ask::get_reply))
        .route("/request/{id}", delete(handlers::ask::cancel_request))
        .route("/batch/ask", post(handlers::ask::batch_ask))
        .route("/batch/cancel", post(handlers::ask::batch_cancel))
        .route("/batch/status", post(handlers::ask::batch_status))
        .route("/batch/reply", post(handlers::ask::batch_reply))
        .route("/status", get(handlers::status::status))
        .route("/providers", get(handlers::status::providers))
        .route("/provider-groups", get(handlers::status::provider_groups))
        .route("/requests", get(handlers::status::requests))
        .route("/queue", get(handlers::status::queue))
        .route("/stream/{id}", get(handlers::status::stream_full))
        .route("/stream/{id}/tail", get(handlers::status::stream_tail))
        .route("/streams", get(handlers::status::streams))
        .route("/cache/stats", get(handlers::cache::cache_stats))
        .route("/cache/stats/detailed", get(handlers::cache::cache_stats_detailed))
        .route("/cache", delete(handlers::cache::cache_delete))
        .route("/cache/cleanup", post(handlers::cache::cache_cleanup))
        .route("/admin/providers/{name}/enable", post(handlers::admin::enable_provider))
        .route("/admin/providers/{name}/disable", post(handlers::admin::disable_provider))
        .route("/admin/api-keys", post(handlers::admin::create_api_key).get(handlers::admin::list_api_keys))
        .route("/admin/api-keys/{id}", delete(handlers::admin::delete_api_key))
        .route("/admin/api-keys/{id}/enable", post(handlers::admin::enable_api_key))
        .route("/admin/api-keys/{id}/disable", post(handlers::admin::disable_api_key))
        .route("/health", get(handlers::health::health))
        .route("/test/health", get(handlers::health::test_health))
        .route("/test/full", get(handlers::health::test_full))
        .route("/test/providers", get(handlers::health::test_providers))
        .route("/health-checker/{provider}", get(handlers::health::health_checker_status))
        .route("/health-checker", get(handlers::health::health_checker_all))
        .route("/discussion/start", post(handlers::discussion::start))
        .route("/discussion/{id}", get(handlers::discussion::get_session).delete(handlers::discussion::delete_session))
        .route("/discussion/{id}/messages", get(handlers::discussion::get_messages))
        .route("/discussion/{id}/continue", post(handlers::discussion::continue_discussion))
        .route("/discussion/{id}/export", get(handlers::discussion::export))
        .route(
            "/discussion/templates",
            post(handlers::discussion::create_template).get(handlers::discussion::list_templates),
        )
        .route(
            "/discussion/templates/{name}",
            get(handlers::discussion::get_template).delete(handlers::discussion::delete_template),
        )
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .nest("/api", api)
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware::require_auth))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
