//! Change Feed Port - Upstream Row-Change Subscription Interface
//!
//! Defines the trait for opening subscriptions against a hosted
//! change-data-capture feed (row-level INSERT/UPDATE/DELETE
//! notifications). The hub never depends on the transport; adapters
//! implement this port.
//!
//! Contract:
//! - `open_channel` registers the bindings and returns immediately
//!   (activation is fire-and-forget)
//! - `open_channel` must not invoke handlers synchronously
//! - `UpstreamSubscription::close` is idempotent

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::change::{field_text, RawChange, Row};
use crate::domain::ChangeEventType;

/// Errors reported by change feed adapters.
#[derive(Debug, Error)]
pub enum FeedError {
  /// The feed connection is unusable.
  #[error("change feed connection error: {0}")]
  Connection(String),
  /// The feed refused to open a channel.
  #[error("change feed rejected channel {channel}: {reason}")]
  Rejected {
    /// Channel name passed to `open_channel`.
    channel: String,
    /// Reason given by the adapter.
    reason: String,
  },
  /// The feed has been shut down.
  #[error("change feed is closed")]
  Closed,
}

/// Which row operations a binding wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
  /// All of INSERT, UPDATE and DELETE (`*`).
  All,
  Insert,
  Update,
  Delete,
}

impl ChangeEvent {
  /// Wire spelling used in subscription requests.
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::All => "*",
      Self::Insert => "INSERT",
      Self::Update => "UPDATE",
      Self::Delete => "DELETE",
    }
  }

  /// Whether a delivered change of `event_type` belongs to this binding.
  pub const fn accepts(self, event_type: ChangeEventType) -> bool {
    matches!(
      (self, event_type),
      (Self::All, _)
        | (Self::Insert, ChangeEventType::Insert)
        | (Self::Update, ChangeEventType::Update)
        | (Self::Delete, ChangeEventType::Delete)
    )
  }
}

/// Equality or membership predicate applied upstream before delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
  /// `column=eq.value`
  Eq { column: String, value: String },
  /// `column=in.(v1,v2,...)`
  In { column: String, values: Vec<String> },
}

impl RowFilter {
  pub fn eq(column: &str, value: &str) -> Self {
    Self::Eq {
      column: column.to_string(),
      value: value.to_string(),
    }
  }

  pub fn one_of(column: &str, values: &[impl AsRef<str>]) -> Self {
    Self::In {
      column: column.to_string(),
      values: values.iter().map(|v| v.as_ref().to_string()).collect(),
    }
  }

  /// Evaluate the predicate against a row.
  ///
  /// Used by feeds that filter locally. A row missing the column never
  /// matches.
  pub fn matches(&self, row: &Row) -> bool {
    match self {
      Self::Eq { column, value } => field_text(row, column).is_some_and(|v| v == *value),
      Self::In { column, values } => {
        field_text(row, column).is_some_and(|v| values.iter().any(|c| *c == v))
      }
    }
  }
}

impl fmt::Display for RowFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Eq { column, value } => write!(f, "{column}=eq.{value}"),
      Self::In { column, values } => write!(f, "{column}=in.({})", values.join(",")),
    }
  }
}

/// What a binding subscribes to: operation, table and row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSpec {
  pub event: ChangeEvent,
  /// Database schema (normally `public`).
  pub schema: String,
  pub table: String,
  pub filter: Option<RowFilter>,
}

impl ChangeSpec {
  /// Spec on the `public` schema.
  pub fn new(event: ChangeEvent, table: &str, filter: Option<RowFilter>) -> Self {
    Self {
      event,
      schema: "public".to_string(),
      table: table.to_string(),
      filter,
    }
  }

  /// Whether a change delivered for `table` matches this spec
  /// (operation, table and, when the snapshot is available, filter).
  pub fn matches(&self, change: &RawChange) -> bool {
    if self.table != change.table || !self.event.accepts(change.event_type) {
      return false;
    }
    match (&self.filter, change.effective_row()) {
      (None, _) => true,
      (Some(filter), Some(row)) => filter.matches(row),
      (Some(_), None) => false,
    }
  }
}

/// Callback invoked with every change delivered for a binding.
pub type ChangeHandler = Arc<dyn Fn(RawChange) + Send + Sync>;

/// A spec paired with the handler that receives its changes.
#[derive(Clone)]
pub struct ChangeBinding {
  pub spec: ChangeSpec,
  pub handler: ChangeHandler,
}

impl ChangeBinding {
  pub fn new(spec: ChangeSpec, handler: impl Fn(RawChange) + Send + Sync + 'static) -> Self {
    Self {
      spec,
      handler: Arc::new(handler),
    }
  }
}

impl fmt::Debug for ChangeBinding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChangeBinding")
      .field("spec", &self.spec)
      .finish_non_exhaustive()
  }
}

/// Live upstream subscription owned by one channel.
pub trait UpstreamSubscription: Send + Sync {
  /// Deactivate the subscription. Calling it again is a no-op.
  fn close(&self);
}

/// Trait for change-data-capture feed providers.
pub trait ChangeFeed: Send + Sync + 'static {
  /// Open a named channel carrying the given bindings.
  ///
  /// Returns as soon as the channel is registered; the adapter
  /// activates it in the background.
  fn open_channel(
    &self,
    name: &str,
    bindings: Vec<ChangeBinding>,
  ) -> Result<Box<dyn UpstreamSubscription>, FeedError>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
  }

  #[test]
  fn test_filter_rendering() {
    assert_eq!(RowFilter::eq("id", "123").to_string(), "id=eq.123");
    assert_eq!(
      RowFilter::one_of("id", &["1", "2", "3"]).to_string(),
      "id=in.(1,2,3)"
    );
  }

  #[test]
  fn test_filter_matches_row() {
    let r = row(json!({"id": 2, "user_id": "u1"}));
    assert!(RowFilter::one_of("id", &["1", "2"]).matches(&r));
    assert!(RowFilter::eq("user_id", "u1").matches(&r));
    assert!(!RowFilter::eq("user_id", "u2").matches(&r));
    assert!(!RowFilter::eq("portfolio_id", "p1").matches(&r));
  }

  #[test]
  fn test_spec_matches_event_and_table() {
    let spec = ChangeSpec::new(ChangeEvent::Insert, "notifications", None);
    let insert = RawChange::insert("notifications", row(json!({"id": "n1"})));
    let delete = RawChange::delete("notifications", row(json!({"id": "n1"})));
    let other = RawChange::insert("transactions", row(json!({"id": "t1"})));
    assert!(spec.matches(&insert));
    assert!(!spec.matches(&delete));
    assert!(!spec.matches(&other));
  }

  #[test]
  fn test_spec_with_filter_rejects_rowless_change() {
    let spec = ChangeSpec::new(
      ChangeEvent::All,
      "portfolios",
      Some(RowFilter::eq("id", "p1")),
    );
    let empty = RawChange::new(ChangeEventType::Delete, "portfolios", None, None);
    assert!(!spec.matches(&empty));
  }

  #[test]
  fn test_all_accepts_everything() {
    for t in [
      ChangeEventType::Insert,
      ChangeEventType::Update,
      ChangeEventType::Delete,
    ] {
      assert!(ChangeEvent::All.accepts(t));
    }
    assert!(!ChangeEvent::Update.accepts(ChangeEventType::Insert));
  }
}
