mod config;
mod http_backend;
mod telemetry;
mod wiring;

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use gateway_engine::LifecycleEngine;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "Multi-provider AI gateway")]
struct Cli {
    /// Path to a TOML config file, overlaid on defaults and env vars.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Emit JSON-formatted logs instead of human-readable ones.
    #[arg(long)]
    json_logs: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level, cli.json_logs);

    let config = match config::load(Some(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(1)
        }
    }
}

async fn run(config: gateway_core::GatewayConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let (ctx, auth) = wiring::build(config);

    let engine = std::sync::Arc::new(LifecycleEngine::new(ctx.clone()));
    let (worker_handle, sampler_handle) = engine.spawn();

    let app = gateway_server::build_router(ctx, auth);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker_handle.abort();
    sampler_handle.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
