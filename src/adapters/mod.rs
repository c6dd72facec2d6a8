//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure (WebSockets, Prometheus, HTTP probes).
//!
//! Adapter categories:
//! - `feeds`: Change feed implementations (in-memory, hosted WebSocket)
//! - `metrics`: Prometheus metrics export and health checks

pub mod feeds;
pub mod metrics;
