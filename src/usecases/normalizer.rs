//! Change Normalizers - Raw Rows to Typed Events
//!
//! One function per entity. Each turns a raw change-feed payload into at
//! most one `NormalizedChange` and never panics on malformed input:
//! missing numbers read as `0`, missing required snapshots mean "emit
//! nothing".

use chrono::Utc;

use crate::domain::change::{field_number, field_text, Row};
use crate::domain::{
  AchievementUnlock, ChangeEventType, EventKind, EventPayload, HoldingUpdate,
  NotificationPayload, PortfolioUpdate, PriceUpdate, RawChange, TransactionUpdate,
};

/// Output of a normalizer, ready for `Dispatcher::broadcast`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedChange {
  pub kind: EventKind,
  pub payload: EventPayload,
  /// Owner used by per-user routing.
  pub user_id: Option<String>,
}

impl NormalizedChange {
  const fn unscoped(kind: EventKind, payload: EventPayload) -> Self {
    Self {
      kind,
      payload,
      user_id: None,
    }
  }
}

fn present(row: Option<&Row>) -> Option<&Row> {
  row.filter(|r| !r.is_empty())
}

fn number_or_zero(row: &Row, field: &str) -> f64 {
  field_number(row, field).unwrap_or(0.0)
}

fn text_or_empty(row: &Row, field: &str) -> String {
  field_text(row, field).unwrap_or_default()
}

/// `portfolios` row change for the portfolio a channel was opened for.
pub fn portfolio(portfolio_id: &str, change: &RawChange) -> Option<NormalizedChange> {
  let row = change.effective_row()?;

  let day_change = field_number(row, "day_change")
    .or_else(|| field_number(row, "daily_change"))
    .unwrap_or(0.0);
  let day_change_percentage = field_number(row, "day_change_percentage")
    .or_else(|| field_number(row, "daily_change_percentage"))
    .unwrap_or(0.0);

  Some(NormalizedChange::unscoped(
    EventKind::PortfolioUpdate,
    EventPayload::Portfolio(PortfolioUpdate {
      portfolio_id: portfolio_id.to_string(),
      total_value: number_or_zero(row, "total_value"),
      total_returns: number_or_zero(row, "total_returns"),
      day_change,
      day_change_percentage,
    }),
  ))
}

/// `holdings` row change inside a portfolio.
pub fn holding(portfolio_id: &str, change: &RawChange) -> Option<NormalizedChange> {
  let row = change.effective_row()?;

  Some(NormalizedChange::unscoped(
    EventKind::HoldingUpdate,
    EventPayload::Holding(HoldingUpdate {
      portfolio_id: portfolio_id.to_string(),
      holding_id: field_text(row, "id"),
      change_type: change.event_type.as_str().to_string(),
    }),
  ))
}

/// `assets` price change. Needs both snapshots to compute the delta.
pub fn asset_price(change: &RawChange) -> Option<NormalizedChange> {
  let new = present(change.new.as_ref())?;
  let old = present(change.old.as_ref())?;

  let price = field_number(new, "current_price")?;
  let previous_price = field_number(old, "current_price")?;
  let delta = price - previous_price;
  let change_percentage = if previous_price == 0.0 {
    0.0
  } else {
    delta / previous_price * 100.0
  };

  Some(NormalizedChange::unscoped(
    EventKind::AssetPriceUpdate,
    EventPayload::Price(PriceUpdate {
      asset_id: field_text(new, "id").or_else(|| field_text(old, "id"))?,
      symbol: text_or_empty(new, "symbol"),
      price,
      previous_price,
      change: delta,
      change_percentage,
      volume: number_or_zero(new, "volume"),
      timestamp: Utc::now(),
    }),
  ))
}

/// `transactions` row change. INSERT means created; anything else completed.
pub fn transaction(change: &RawChange) -> Option<NormalizedChange> {
  let row = change.effective_row()?;

  let kind = if change.event_type == ChangeEventType::Insert {
    EventKind::TransactionCreated
  } else {
    EventKind::TransactionCompleted
  };

  Some(NormalizedChange {
    kind,
    payload: EventPayload::Transaction(TransactionUpdate {
      transaction_id: text_or_empty(row, "id"),
      status: text_or_empty(row, "status"),
      executed_at: field_text(row, "executed_at")
        .or_else(|| field_text(row, "completed_at")),
      error: field_text(row, "error"),
    }),
    user_id: field_text(row, "user_id"),
  })
}

/// New `notifications` row.
pub fn notification(change: &RawChange) -> Option<NormalizedChange> {
  let row = present(change.new.as_ref())?;

  Some(NormalizedChange {
    kind: EventKind::NotificationCreated,
    payload: EventPayload::Notification(NotificationPayload {
      id: text_or_empty(row, "id"),
      title: text_or_empty(row, "title"),
      message: text_or_empty(row, "message"),
      kind: text_or_empty(row, "type"),
      metadata: row.get("metadata").filter(|v| !v.is_null()).cloned(),
    }),
    user_id: field_text(row, "user_id"),
  })
}

/// New `user_achievements` row.
pub fn achievement(change: &RawChange) -> Option<NormalizedChange> {
  let row = present(change.new.as_ref())?;
  let user_id = field_text(row, "user_id");

  Some(NormalizedChange {
    kind: EventKind::AchievementUnlocked,
    payload: EventPayload::Achievement(AchievementUnlock {
      achievement_id: text_or_empty(row, "achievement_id"),
      user_id: user_id.clone().unwrap_or_default(),
      unlocked_at: field_text(row, "unlocked_at"),
    }),
    user_id,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::{json, Value};

  fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
  }

  fn empty(event_type: ChangeEventType, table: &str) -> RawChange {
    RawChange::new(event_type, table, None, None)
  }

  #[test]
  fn test_every_normalizer_ignores_rowless_change() {
    for t in [
      ChangeEventType::Insert,
      ChangeEventType::Update,
      ChangeEventType::Delete,
    ] {
      assert!(portfolio("p1", &empty(t, "portfolios")).is_none());
      assert!(holding("p1", &empty(t, "holdings")).is_none());
      assert!(asset_price(&empty(t, "assets")).is_none());
      assert!(transaction(&empty(t, "transactions")).is_none());
      assert!(notification(&empty(t, "notifications")).is_none());
      assert!(achievement(&empty(t, "user_achievements")).is_none());
    }
  }

  #[test]
  fn test_portfolio_defaults_missing_numbers_to_zero() {
    let change = RawChange::update(
      "portfolios",
      row(json!({"id": "p1"})),
      row(json!({"id": "p1", "total_value": 1500.5, "daily_change": "12.25"})),
    );
    let out = portfolio("p1", &change).unwrap();
    assert_eq!(out.kind, EventKind::PortfolioUpdate);
    let EventPayload::Portfolio(p) = out.payload else {
      panic!("expected portfolio payload");
    };
    assert_eq!(p.portfolio_id, "p1");
    assert!((p.total_value - 1500.5).abs() < f64::EPSILON);
    assert!(p.total_returns.abs() < f64::EPSILON);
    assert!((p.day_change - 12.25).abs() < f64::EPSILON);
    assert!(p.day_change_percentage.abs() < f64::EPSILON);
  }

  #[test]
  fn test_portfolio_delete_uses_old_row() {
    let change = RawChange::delete("portfolios", row(json!({"id": "p1", "total_value": 10})));
    let out = portfolio("p1", &change).unwrap();
    let EventPayload::Portfolio(p) = out.payload else {
      panic!("expected portfolio payload");
    };
    assert!((p.total_value - 10.0).abs() < f64::EPSILON);
  }

  #[test]
  fn test_holding_reports_change_type() {
    let change = RawChange::delete("holdings", row(json!({"id": "h9", "portfolio_id": "p1"})));
    let out = holding("p1", &change).unwrap();
    assert_eq!(out.kind, EventKind::HoldingUpdate);
    assert_eq!(
      out.payload,
      EventPayload::Holding(HoldingUpdate {
        portfolio_id: "p1".to_string(),
        holding_id: Some("h9".to_string()),
        change_type: "DELETE".to_string(),
      })
    );
  }

  #[test]
  fn test_price_delta() {
    let change = RawChange::update(
      "assets",
      row(json!({"id": "a1", "current_price": 100})),
      row(json!({"id": "a1", "symbol": "ESGX", "current_price": 102, "volume": 5000})),
    );
    let out = asset_price(&change).unwrap();
    let EventPayload::Price(p) = out.payload else {
      panic!("expected price payload");
    };
    assert_eq!(p.asset_id, "a1");
    assert_eq!(p.symbol, "ESGX");
    assert!((p.change - 2.0).abs() < 1e-9);
    assert!((p.change_percentage - 2.0).abs() < 1e-9);
    assert!((p.volume - 5000.0).abs() < f64::EPSILON);
  }

  #[test]
  fn test_price_requires_both_snapshots() {
    let only_new = RawChange::insert("assets", row(json!({"id": "a1", "current_price": 5})));
    let only_old = RawChange::delete("assets", row(json!({"id": "a1", "current_price": 5})));
    assert!(asset_price(&only_new).is_none());
    assert!(asset_price(&only_old).is_none());
  }

  #[test]
  fn test_price_requires_numeric_prices() {
    let change = RawChange::update(
      "assets",
      row(json!({"id": "a1"})),
      row(json!({"id": "a1", "current_price": 3})),
    );
    assert!(asset_price(&change).is_none());
  }

  #[test]
  fn test_price_from_zero_has_zero_percentage() {
    let change = RawChange::update(
      "assets",
      row(json!({"id": "a1", "current_price": 0})),
      row(json!({"id": "a1", "current_price": 4})),
    );
    let out = asset_price(&change).unwrap();
    let EventPayload::Price(p) = out.payload else {
      panic!("expected price payload");
    };
    assert!((p.change - 4.0).abs() < f64::EPSILON);
    assert!(p.change_percentage.abs() < f64::EPSILON);
  }

  #[test]
  fn test_transaction_kind_depends_on_insert() {
    let data = row(json!({"id": "t1", "status": "pending", "user_id": "u1"}));
    let created = transaction(&RawChange::insert("transactions", data.clone())).unwrap();
    assert_eq!(created.kind, EventKind::TransactionCreated);
    assert_eq!(created.user_id.as_deref(), Some("u1"));

    let updated =
      transaction(&RawChange::update("transactions", data.clone(), data.clone())).unwrap();
    assert_eq!(updated.kind, EventKind::TransactionCompleted);

    let deleted = transaction(&RawChange::delete("transactions", data)).unwrap();
    assert_eq!(deleted.kind, EventKind::TransactionCompleted);
  }

  #[test]
  fn test_transaction_executed_at_falls_back_to_completed_at() {
    let change = RawChange::insert(
      "transactions",
      row(json!({"id": "t1", "status": "completed", "completed_at": "2026-01-02T10:00:00Z"})),
    );
    let out = transaction(&change).unwrap();
    let EventPayload::Transaction(t) = out.payload else {
      panic!("expected transaction payload");
    };
    assert_eq!(t.executed_at.as_deref(), Some("2026-01-02T10:00:00Z"));
    assert!(t.error.is_none());
    assert!(out.user_id.is_none());
  }

  #[test]
  fn test_notification_needs_new_row() {
    let data = row(json!({
      "id": "n1", "user_id": "u1", "title": "Hi", "message": "Welcome",
      "type": "system", "metadata": {"source": "onboarding"}
    }));
    let out = notification(&RawChange::insert("notifications", data.clone())).unwrap();
    assert_eq!(out.user_id.as_deref(), Some("u1"));
    let EventPayload::Notification(n) = out.payload else {
      panic!("expected notification payload");
    };
    assert_eq!(n.kind, "system");
    assert_eq!(n.metadata, Some(json!({"source": "onboarding"})));

    assert!(notification(&RawChange::delete("notifications", data)).is_none());
  }

  #[test]
  fn test_achievement_carries_owner() {
    let data = row(json!({
      "id": "ua1", "user_id": "u7", "achievement_id": "first-deposit",
      "unlocked_at": "2026-03-01T00:00:00Z"
    }));
    let out = achievement(&RawChange::insert("user_achievements", data)).unwrap();
    assert_eq!(out.kind, EventKind::AchievementUnlocked);
    assert_eq!(out.user_id.as_deref(), Some("u7"));
    assert_eq!(
      out.payload,
      EventPayload::Achievement(AchievementUnlock {
        achievement_id: "first-deposit".to_string(),
        user_id: "u7".to_string(),
        unlocked_at: Some("2026-03-01T00:00:00Z".to_string()),
      })
    );
  }
}
