//! tl-server: HTTP delivery surface for tvloom channels.
//!
//! Ties the session engine to Axum and provides the built-in channel
//! collaborators:
//!
//! - [`lineup::LineupSchedule`] rotates each channel's configured items
//! - [`slate::SlateSource`] renders transcoder failures as an on-screen card
//! - [`progress::FfprobeProgress`] reads the last written timestamps for continuity

pub mod context;
pub mod error;
pub mod lineup;
pub mod progress;
pub mod router;
pub mod routes;
pub mod slate;

use std::net::SocketAddr;
use std::sync::Arc;

use tl_core::config::Config;
use tl_core::events::EventBus;

use crate::context::{AppContext, Collaborators};

/// Start the tvloom server.
///
/// Returns after a shutdown signal once every session has stopped and
/// cleaned up its folder.
pub async fn start(config: Config) -> tl_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let root = &config.streaming.transcode_root;
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        tracing::info!("Created transcode directory {}", root.display());
    }

    let tools = Arc::new(tl_av::ToolRegistry::discover(&config.tools));
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let event_bus = Arc::new(EventBus::default());
    let collaborators = Collaborators::builtin(&config, &tools);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| tl_core::Error::Internal(format!("Invalid server address: {e}")))?;

    tracing::info!(
        channels = config.channels.len(),
        work_ahead_limit = config.streaming.work_ahead_limit,
        "Channel lineup loaded"
    );

    let ctx = AppContext::new(config, tools, event_bus, collaborators);
    let app = router::build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| tl_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| tl_core::Error::Internal(format!("Server error: {e}")))?;

    ctx.sessions.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
