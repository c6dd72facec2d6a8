//! Metrics and Monitoring Adapters
//!
//! Prometheus export of hub activity and the /live, /ready probes,
//! served together by one axum 0.7 server.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::HubMetrics;
