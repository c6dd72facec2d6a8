//! Health Check Server - Liveness, Readiness and Metrics
//!
//! Exposes /live and /ready (and /metrics when enabled) via axum 0.7.
//! Readiness follows the upstream feed connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use super::prometheus::HubMetrics;

/// Shared health state polled by readiness probes.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Whether the change feed is connected.
    pub feed_connected: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new(feed_connected: bool) -> Self {
        Self {
            feed_connected: Arc::new(AtomicBool::new(feed_connected)),
        }
    }

    pub fn set_feed_connected(&self, connected: bool) {
        self.feed_connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.feed_connected.load(Ordering::Relaxed)
    }
}

/// Axum-based probe and metrics HTTP server.
pub struct HealthServer {
    state: Arc<HealthState>,
    metrics: Option<Arc<HubMetrics>>,
    bind_address: String,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, metrics: Option<Arc<HubMetrics>>, bind_address: String) -> Self {
        Self {
            state,
            metrics,
            bind_address,
        }
    }

    /// All routes served by this server.
    pub fn router(&self) -> Router {
        let probes = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state));

        match &self.metrics {
            Some(metrics) => probes.merge(Arc::clone(metrics).router()),
            None => probes,
        }
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx), fields(address = %self.bind_address))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!(metrics = self.metrics.is_some(), "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always 200 while the process runs.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_follows_feed() {
        let state = HealthState::new(false);
        assert!(!state.is_ready());
        state.set_feed_connected(true);
        assert!(state.is_ready());
    }
}
