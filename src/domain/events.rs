//! Normalized realtime events.
//!
//! Every change that leaves the hub is a `RealtimeMessage`: an event kind,
//! a typed payload, a locally assigned timestamp and an optional user id
//! used for per-user routing. Field names serialize in camelCase so the
//! JSON matches what the web client already consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed set of event kinds the hub can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "portfolio.update")]
    PortfolioUpdate,
    #[serde(rename = "asset.price_update")]
    AssetPriceUpdate,
    #[serde(rename = "transaction.created")]
    TransactionCreated,
    #[serde(rename = "transaction.completed")]
    TransactionCompleted,
    #[serde(rename = "holding.update")]
    HoldingUpdate,
    #[serde(rename = "achievement.unlocked")]
    AchievementUnlocked,
    #[serde(rename = "notification.created")]
    NotificationCreated,
    #[serde(rename = "market.status_change")]
    MarketStatusChange,
}

impl EventKind {
    /// Wire name of the event (e.g. `portfolio.update`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PortfolioUpdate => "portfolio.update",
            Self::AssetPriceUpdate => "asset.price_update",
            Self::TransactionCreated => "transaction.created",
            Self::TransactionCompleted => "transaction.completed",
            Self::HoldingUpdate => "holding.update",
            Self::AchievementUnlocked => "achievement.unlocked",
            Self::NotificationCreated => "notification.created",
            Self::MarketStatusChange => "market.status_change",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Portfolio totals after a change to the `portfolios` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioUpdate {
    pub portfolio_id: String,
    pub total_value: f64,
    pub total_returns: f64,
    pub day_change: f64,
    pub day_change_percentage: f64,
}

/// A holding inside a portfolio was inserted, updated or deleted.
///
/// Carries no amounts: consumers re-fetch the portfolio on this signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingUpdate {
    pub portfolio_id: String,
    pub holding_id: Option<String>,
    /// Upstream change type (`INSERT`, `UPDATE` or `DELETE`).
    pub change_type: String,
}

/// Asset price movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub asset_id: String,
    pub symbol: String,
    pub price: f64,
    pub previous_price: f64,
    /// Absolute change (`price - previous_price`).
    pub change: f64,
    /// Relative change in percent.
    pub change_percentage: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Transaction status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub transaction_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// In-app notification addressed to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Achievement unlocked by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementUnlock {
    pub achievement_id: String,
    pub user_id: String,
    pub unlocked_at: Option<String>,
}

/// Market open/close transition. Only produced by explicit broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatusChange {
    pub market: String,
    pub is_open: bool,
}

/// Typed payload carried by a `RealtimeMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Portfolio(PortfolioUpdate),
    Holding(HoldingUpdate),
    Price(PriceUpdate),
    Transaction(TransactionUpdate),
    Notification(NotificationPayload),
    Achievement(AchievementUnlock),
    MarketStatus(MarketStatusChange),
    /// Free-form payload for application-defined broadcasts.
    Custom(serde_json::Value),
}

/// A normalized event as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMessage {
    pub event: EventKind,
    pub payload: EventPayload,
    /// Assigned when the hub builds the message, never taken from upstream.
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RealtimeMessage {
    /// Build a message stamped with the current time.
    pub fn now(event: EventKind, payload: EventPayload, user_id: Option<String>) -> Self {
        Self {
            event,
            payload,
            timestamp: Utc::now(),
            user_id,
        }
    }

    /// The portfolio payload, if this is a portfolio update.
    pub const fn as_portfolio(&self) -> Option<&PortfolioUpdate> {
        match &self.payload {
            EventPayload::Portfolio(p) => Some(p),
            _ => None,
        }
    }

    /// The price payload, if this is a price update.
    pub const fn as_price(&self) -> Option<&PriceUpdate> {
        match &self.payload {
            EventPayload::Price(p) => Some(p),
            _ => None,
        }
    }
}
