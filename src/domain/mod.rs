//! Domain layer - Realtime event model and routing rules.
//!
//! Pure types for the event hub: channel keys, raw change-feed rows,
//! normalized events and the routing predicate that decides which
//! channel receives which event. No I/O here (hexagonal inner ring).

pub mod change;
pub mod channel;
pub mod events;
pub mod routing;

// Re-export core types for convenience
pub use change::{ChangeEventType, RawChange, Row};
pub use channel::{ChannelKey, ChannelType, InvalidChannelKey};
pub use events::{
    AchievementUnlock, EventKind, EventPayload, HoldingUpdate, MarketStatusChange,
    NotificationPayload, PortfolioUpdate, PriceUpdate, RealtimeMessage, TransactionUpdate,
};
pub use routing::should_notify;
