use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::broadcast::BroadcastDispatcher;
use super::db::{BoardDb, DbHandle};
use super::gate::FixedWindowLimiter;
use super::notify::NotificationFanout;
use super::registry::ConnectionRegistry;
use super::ws;
use crate::config::AppConfig;

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws/boards/{id}", get(ws::board_ws_handler))
        .route("/ws/public/{token}", get(ws::public_ws_handler))
        .with_state(state)
}

/// Open the database and wire every component from the configuration.
pub fn build_state(config: &AppConfig) -> Result<Arc<AppState>> {
    let db_path = &config.server.db_path;
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = BoardDb::new(db_path).context("Failed to initialize board database")?;

    let registry = Arc::new(ConnectionRegistry::new());
    let fanout = NotificationFanout::from_config(BroadcastDispatcher::new(registry), config)?;
    let channels = fanout.channel_names();
    tracing::info!(?channels, "Notification channels configured");

    let gate = FixedWindowLimiter::new(
        config.feedback.max_per_window,
        Duration::from_secs(config.feedback.window_secs),
    );
    Ok(Arc::new(AppState::new(
        DbHandle::new(db),
        fanout,
        Box::new(gate),
    )))
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let state = build_state(&config)?;
    let mut app = build_router(state);

    if config.server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = config.server.dev_mode, "Idea board running");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
