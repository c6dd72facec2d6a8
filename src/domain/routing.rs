//! Routing predicate: which channel cares about which event.
//!
//! Decides by channel type, plus an owner check for per-user channels.
//! Which rows reach a channel in the first place is decided upstream by
//! the subscription filter, so portfolio-scoped events are not
//! re-checked against the portfolio id here.

use super::channel::{ChannelKey, ChannelType};
use super::events::EventKind;

/// Does `channel` receive `event` (broadcast for `user_id`)?
pub fn should_notify(channel: &ChannelKey, event: EventKind, user_id: Option<&str>) -> bool {
    let channel_type = channel.channel_type();
    match event {
        EventKind::PortfolioUpdate | EventKind::HoldingUpdate => {
            *channel_type == ChannelType::Portfolio
        }
        EventKind::AssetPriceUpdate => *channel_type == ChannelType::Assets,
        EventKind::TransactionCreated | EventKind::TransactionCompleted => {
            *channel_type == ChannelType::Transactions && channel.id_segment() == user_id
        }
        EventKind::NotificationCreated => {
            *channel_type == ChannelType::Notifications && channel.id_segment() == user_id
        }
        EventKind::AchievementUnlocked => {
            *channel_type == ChannelType::Achievements && channel.id_segment() == user_id
        }
        EventKind::MarketStatusChange => false,
    }
}
