//! Use Cases Layer - Realtime Event Hub
//!
//! Orchestrates the domain types with the change feed port to turn
//! upstream row changes into listener callbacks.
//!
//! Use cases:
//! - `ChannelRegistry`: One upstream subscription per channel key
//! - `normalizer`: Raw change -> typed event, fail-soft
//! - `Dispatcher`: Routing-aware synchronous fan-out
//! - `PriceSimulator`: Synthetic price stream for demos
//! - `RealtimeHub`: Public subscribe/broadcast/teardown API

pub mod dispatcher;
pub mod hub;
pub mod normalizer;
pub mod price_simulator;
pub mod registry;

use thiserror::Error;

use crate::domain::InvalidChannelKey;
use crate::ports::FeedError;

pub use dispatcher::Dispatcher;
pub use hub::{ChangeRoute, RealtimeHub, SubscriptionHandle};
pub use normalizer::NormalizedChange;
pub use price_simulator::{PriceSimulator, SimulationSettings};
pub use registry::{ChannelRegistry, Listener, ListenerId};

/// Errors surfaced by the hub API.
#[derive(Debug, Error)]
pub enum HubError {
  /// Opening the upstream subscription failed; nothing was registered.
  #[error("upstream subscription failed: {0}")]
  Upstream(#[from] FeedError),
  #[error(transparent)]
  InvalidChannelKey(#[from] InvalidChannelKey),
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  /// An operation needing a tokio runtime was called outside one.
  #[error("no tokio runtime available")]
  NoRuntime,
}
