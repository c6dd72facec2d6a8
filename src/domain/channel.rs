//! Channel keys.
//!
//! A channel is addressed by `<type>:<id>`, e.g. `portfolio:123`,
//! `assets:1,2,3` or `transactions:user-456`. The key is both the
//! registry key (one upstream subscription per key) and the input of
//! the routing predicate.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Entity family a channel listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Portfolio,
    Assets,
    Transactions,
    Notifications,
    Achievements,
    /// Application-defined channel type. Never matched by built-in routing.
    Other(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Portfolio => "portfolio",
            Self::Assets => "assets",
            Self::Transactions => "transactions",
            Self::Notifications => "notifications",
            Self::Achievements => "achievements",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for ChannelType {
    fn from(value: &str) -> Self {
        match value {
            "portfolio" => Self::Portfolio,
            "assets" => Self::Assets,
            "transactions" => Self::Transactions,
            "notifications" => Self::Notifications,
            "achievements" => Self::Achievements,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Raw key with an empty type segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid channel key: {0:?}")]
pub struct InvalidChannelKey(pub String);

/// Logical channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    channel_type: ChannelType,
    /// Everything after the first `:`; `None` for keys without one.
    id: Option<String>,
}

impl ChannelKey {
    pub fn new(channel_type: ChannelType, id: impl Into<String>) -> Self {
        Self {
            channel_type,
            id: Some(id.into()),
        }
    }

    pub fn portfolio(portfolio_id: &str) -> Self {
        Self::new(ChannelType::Portfolio, portfolio_id)
    }

    /// Asset channels are keyed by the comma-joined id list, in caller order.
    pub fn assets(asset_ids: &[impl AsRef<str>]) -> Self {
        let joined = asset_ids
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        Self::new(ChannelType::Assets, joined)
    }

    pub fn transactions(user_id: &str) -> Self {
        Self::new(ChannelType::Transactions, user_id)
    }

    pub fn notifications(user_id: &str) -> Self {
        Self::new(ChannelType::Notifications, user_id)
    }

    pub fn achievements(user_id: &str) -> Self {
        Self::new(ChannelType::Achievements, user_id)
    }

    /// Parse a raw `<type>:<id>` key. Only an empty type is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let (type_part, id) = match raw.split_once(':') {
            Some((t, rest)) => (t, Some(rest.to_string())),
            None => (raw, None),
        };
        if type_part.is_empty() {
            return None;
        }
        Some(Self {
            channel_type: ChannelType::from(type_part),
            id,
        })
    }

    pub const fn channel_type(&self) -> &ChannelType {
        &self.channel_type
    }

    /// The id segment used for routing: text between the first `:` and
    /// the next `:` (or the end of the key).
    pub fn id_segment(&self) -> Option<&str> {
        self.id
            .as_deref()
            .map(|id| id.split_once(':').map_or(id, |(head, _)| head))
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.channel_type.as_str(), id),
            None => f.write_str(self.channel_type.as_str()),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = InvalidChannelKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidChannelKey(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_render_keys() {
        assert_eq!(ChannelKey::portfolio("123").to_string(), "portfolio:123");
        assert_eq!(ChannelKey::assets(&["1", "2", "3"]).to_string(), "assets:1,2,3");
        assert_eq!(
            ChannelKey::transactions("user-456").to_string(),
            "transactions:user-456"
        );
    }

    #[test]
    fn test_parse_round_trips_display() {
        let key = ChannelKey::parse("notifications:u1").unwrap();
        assert_eq!(key.channel_type(), &ChannelType::Notifications);
        assert_eq!(key.id_segment(), Some("u1"));
        assert_eq!(key, ChannelKey::notifications("u1"));
    }

    #[test]
    fn test_id_segment_stops_at_second_colon() {
        let key = ChannelKey::parse("transactions:u1:extra").unwrap();
        assert_eq!(key.id_segment(), Some("u1"));
        assert_eq!(key.to_string(), "transactions:u1:extra");
    }

    #[test]
    fn test_key_without_id() {
        let key = ChannelKey::parse("presence").unwrap();
        assert_eq!(key.channel_type(), &ChannelType::Other("presence".into()));
        assert_eq!(key.id_segment(), None);
    }

    #[test]
    fn test_empty_type_rejected() {
        assert!(ChannelKey::parse(":abc").is_none());
        assert_eq!("".parse::<ChannelKey>(), Err(InvalidChannelKey(String::new())));
    }
}
