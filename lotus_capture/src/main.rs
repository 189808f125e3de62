//! Lotus capture process
//!
//! This process handles:
//! - Lifecycle events posted by the host interception layer
//! - Assembly of those events into finalized per-tab request records
//! - Durable per-tab history with FIFO eviction
//! - Best-effort response body capture
//! - One live WebSocket session per tab for the inspector

mod assembler;
mod body_capture;
mod config;
mod persistence;
mod routes;
mod session;
mod store;

use anyhow::Context;
use persistence::SnapshotFile;
use std::sync::Arc;
use store::CaptureStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lotus_capture=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting Lotus capture on {}", config.bind_addr());
    tracing::info!("Request store: {}", config.store_path.display());
    tracing::info!(
        "Keeping up to {} requests per tab (body capture {})",
        config.max_requests_per_tab,
        if config.body_capture { "on" } else { "off" }
    );

    // Hydrate history before accepting any events
    let store = Arc::new(CaptureStore::new(
        config.max_requests_per_tab,
        Some(SnapshotFile::new(&config.store_path)),
    ));
    store.hydrate().await;

    let bind_addr = config.bind_addr();
    let state = routes::AppState::new(config, store)?;
    let sweeper = routes::spawn_pending_sweeper(state.clone());
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind capture server to {}", bind_addr))?;
    tracing::info!("Listening on {}", bind_addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await;

    sweeper.abort();
    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
    }

    Ok(())
}
