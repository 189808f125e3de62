//! Route handlers for the capture process

pub mod api;
pub mod lifecycle;
pub mod session;

use crate::{
    assembler::Assembler, body_capture::BodyCapture, config::Config, session::SessionRegistry,
    store::CaptureStore,
};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Process-wide context, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub assembler: Arc<Assembler>,
    pub store: Arc<CaptureStore>,
    /// Live viewer connections: tab -> viewer handle
    pub sessions: Arc<SessionRegistry>,
    pub body_capture: BodyCapture,
}

impl AppState {
    pub fn new(config: Config, store: Arc<CaptureStore>) -> Result<Self> {
        let body_capture = BodyCapture::new(config.body_capture_timeout, config.body_capture)?;
        Ok(Self {
            config: Arc::new(config),
            assembler: Arc::new(Assembler::new()),
            store,
            sessions: Arc::new(SessionRegistry::new()),
            body_capture,
        })
    }
}

/// Build the full router
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(api::router())
        .merge(lifecycle::router())
        .merge(session::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically drop pending assemblies whose completion never arrived
pub fn spawn_pending_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let dropped = state.assembler.sweep_stale(state.config.pending_ttl);
            if dropped > 0 {
                tracing::info!("Swept {} stale pending requests", dropped);
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory state with body capture switched off
    pub fn state() -> AppState {
        let config = Config {
            body_capture: false,
            ..Config::default()
        };
        let store = Arc::new(CaptureStore::in_memory(config.max_requests_per_tab));
        AppState::new(config, store).unwrap()
    }
}
