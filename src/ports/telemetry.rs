//! Telemetry Port - Hub Observation Hooks
//!
//! The usecases layer reports registry and dispatch activity through
//! this trait. The Prometheus adapter implements it; tests and
//! embedded uses fall back to `NoopObserver`.

use crate::domain::EventKind;

/// Receives hub activity notifications. All hooks default to no-ops.
pub trait HubObserver: Send + Sync + 'static {
  /// A new upstream subscription was established for `channel`.
  fn upstream_opened(&self, _channel: &str) {}

  /// Registry size after a mutation.
  fn registry_size(&self, _channels: usize, _listeners: usize) {}

  /// A broadcast finished with `delivered` successful listener calls.
  fn event_broadcast(&self, _event: EventKind, _delivered: usize) {}

  /// A listener on `channel` panicked during dispatch.
  fn listener_panicked(&self, _channel: &str) {}

  /// A change for `entity` was dropped by its normalizer.
  fn change_dropped(&self, _entity: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl HubObserver for NoopObserver {}
