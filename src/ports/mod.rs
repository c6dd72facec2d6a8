//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `ChangeFeed`: Upstream row-change subscriptions (hosted CDC feed)
//! - `HubObserver`: Registry and dispatch telemetry hooks

pub mod change_feed;
pub mod telemetry;

pub use change_feed::{
  ChangeBinding, ChangeEvent, ChangeFeed, ChangeHandler, ChangeSpec, FeedError, RowFilter,
  UpstreamSubscription,
};
pub use telemetry::{HubObserver, NoopObserver};
