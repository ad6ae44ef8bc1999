//! df-server: HTTP API for the docforge conversion service.
//!
//! This crate wires the conversion service into a running server:
//!
//! - Axum-based HTTP API (synchronous conversion, async jobs, admin views)
//! - Engine discovery at startup
//! - Graceful shutdown via signal handling that drains queued jobs

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use df_convert::{CommandConverter, ToolRegistry};
use df_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the docforge server.
///
/// Discovers the engine, starts the conversion service and serves HTTP until
/// a shutdown signal arrives. Queued jobs are finished before returning.
pub async fn start(config: Config) -> df_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = ToolRegistry::discover(&config.engine);
    let converter = Arc::new(CommandConverter::from_config(&config.engine, &tools)?);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| df_core::Error::Validation(format!("Invalid server address: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| df_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let ctx = AppContext::new(config, converter, tools);
    tracing::info!("Starting server on {addr}");

    serve(listener, ctx, CancellationToken::new()).await
}

/// Serve `ctx` on an already-bound listener until a signal arrives or
/// `cancel` fires, then drain the conversion service.
pub async fn serve(
    listener: tokio::net::TcpListener,
    ctx: AppContext,
    cancel: CancellationToken,
) -> df_core::Result<()> {
    let app = router::build_router(ctx.clone());

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await;

    ctx.service.shutdown().await;
    result?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
