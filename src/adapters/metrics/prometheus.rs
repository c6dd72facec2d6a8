//! Prometheus Metrics Registry - Hub Observability
//!
//! Implements the `HubObserver` port on top of a Prometheus registry.
//! All metrics follow the naming convention `realtime_hub_*`.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::domain::EventKind;
use crate::ports::HubObserver;

/// Centralized Prometheus metrics for the realtime hub.
pub struct HubMetrics {
    registry: Registry,
    /// Broadcasts per event kind.
    pub events_broadcast: IntCounterVec,
    /// Successful listener calls.
    pub deliveries: IntCounter,
    pub listener_panics: IntCounter,
    /// Changes discarded by a normalizer, per entity.
    pub changes_dropped: IntCounterVec,
    pub upstream_opened: IntCounter,
    pub active_channels: IntGauge,
    pub active_listeners: IntGauge,
}

impl HubMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_broadcast = IntCounterVec::new(
            Opts::new(
                "realtime_hub_events_broadcast_total",
                "Events broadcast, by event kind",
            ),
            &["event"],
        )?;
        let deliveries = IntCounter::new(
            "realtime_hub_deliveries_total",
            "Listener invocations that completed",
        )?;
        let listener_panics = IntCounter::new(
            "realtime_hub_listener_panics_total",
            "Listener invocations that panicked",
        )?;
        let changes_dropped = IntCounterVec::new(
            Opts::new(
                "realtime_hub_changes_dropped_total",
                "Upstream changes dropped for missing fields, by entity",
            ),
            &["entity"],
        )?;
        let upstream_opened = IntCounter::new(
            "realtime_hub_upstream_opened_total",
            "Upstream subscriptions established",
        )?;
        let active_channels = IntGauge::new(
            "realtime_hub_active_channels",
            "Channels currently open",
        )?;
        let active_listeners = IntGauge::new(
            "realtime_hub_active_listeners",
            "Listeners currently registered",
        )?;

        registry.register(Box::new(events_broadcast.clone()))?;
        registry.register(Box::new(deliveries.clone()))?;
        registry.register(Box::new(listener_panics.clone()))?;
        registry.register(Box::new(changes_dropped.clone()))?;
        registry.register(Box::new(upstream_opened.clone()))?;
        registry.register(Box::new(active_channels.clone()))?;
        registry.register(Box::new(active_listeners.clone()))?;

        Ok(Self {
            registry,
            events_broadcast,
            deliveries,
            listener_panics,
            changes_dropped,
            upstream_opened,
            active_channels,
            active_listeners,
        })
    }

    /// Current metrics in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Router serving `/metrics`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body).into_response(),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            StatusCode::INTERNAL_SERVER_ERROR.into_response()
                        }
                    }
                }
            }),
        )
    }
}

fn as_gauge(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl HubObserver for HubMetrics {
    fn upstream_opened(&self, _channel: &str) {
        self.upstream_opened.inc();
    }

    fn registry_size(&self, channels: usize, listeners: usize) {
        self.active_channels.set(as_gauge(channels));
        self.active_listeners.set(as_gauge(listeners));
    }

    fn event_broadcast(&self, event: EventKind, delivered: usize) {
        self.events_broadcast.with_label_values(&[event.as_str()]).inc();
        self.deliveries.inc_by(delivered as u64);
    }

    fn listener_panicked(&self, _channel: &str) {
        self.listener_panics.inc();
    }

    fn change_dropped(&self, entity: &str) {
        self.changes_dropped.with_label_values(&[entity]).inc();
    }
}
