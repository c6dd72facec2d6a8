//! Raw change-feed payloads.
//!
//! The hosted change feed delivers untyped row snapshots. `RawChange`
//! keeps them as JSON maps and offers lenient accessors: a missing or
//! mistyped field reads as `None`, never as an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row snapshot as delivered by the change feed.
pub type Row = Map<String, Value>;

/// Row-level operation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

impl ChangeEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parse the upstream spelling (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row change from the upstream feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub event_type: ChangeEventType,
    /// Source table (e.g. `portfolios`).
    pub table: String,
    pub old: Option<Row>,
    pub new: Option<Row>,
}

impl RawChange {
    /// Build a change; empty snapshots are stored as absent.
    pub fn new(
        event_type: ChangeEventType,
        table: impl Into<String>,
        old: Option<Row>,
        new: Option<Row>,
    ) -> Self {
        Self {
            event_type,
            table: table.into(),
            old: old.filter(|r| !r.is_empty()),
            new: new.filter(|r| !r.is_empty()),
        }
    }

    pub fn insert(table: impl Into<String>, new: Row) -> Self {
        Self::new(ChangeEventType::Insert, table, None, Some(new))
    }

    pub fn update(table: impl Into<String>, old: Row, new: Row) -> Self {
        Self::new(ChangeEventType::Update, table, Some(old), Some(new))
    }

    pub fn delete(table: impl Into<String>, old: Row) -> Self {
        Self::new(ChangeEventType::Delete, table, Some(old), None)
    }

    /// `new` when present, otherwise `old`.
    pub fn effective_row(&self) -> Option<&Row> {
        self.new
            .as_ref()
            .filter(|r| !r.is_empty())
            .or_else(|| self.old.as_ref().filter(|r| !r.is_empty()))
    }
}

/// Read a field as text. Numbers and booleans are rendered; null is absent.
pub fn field_text(row: &Row, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a field as a finite number. Numeric strings are accepted
/// (Postgres `numeric` columns arrive as strings).
pub fn field_number(row: &Row, field: &str) -> Option<f64> {
    let value = match row.get(field)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}
