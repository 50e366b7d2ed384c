//! Column descriptors and typed values shared by both store backends.
//!
//! Model output arrives as loose JSON. Every field and filter value is coerced
//! through the owning table's `ColumnSpec` list before it reaches a store, so
//! the stores only ever see `ColumnValue`s of the right kind.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy)]
pub enum ColumnKind {
    /// Store-generated identifier; readable and filterable, never written.
    Id,
    Text,
    Timestamp,
    /// Foreign key into another table.
    Reference,
    /// Closed vocabulary; the function returns the canonical spelling.
    Choice {
        canonical: fn(&str) -> Option<&'static str>,
        values: &'static [&'static str],
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub writable: bool,
}

impl ColumnSpec {
    pub const fn id() -> Self {
        Self { name: "id", kind: ColumnKind::Id, nullable: false, writable: false }
    }

    pub const fn text(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Text, nullable: true, writable: true }
    }

    pub const fn required_text(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Text, nullable: false, writable: true }
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Timestamp, nullable: true, writable: true }
    }

    pub const fn system_timestamp(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Timestamp, nullable: false, writable: false }
    }

    pub const fn reference(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Reference, nullable: true, writable: true }
    }

    pub const fn choice(
        name: &'static str,
        nullable: bool,
        canonical: fn(&str) -> Option<&'static str>,
        values: &'static [&'static str],
    ) -> Self {
        Self { name, kind: ColumnKind::Choice { canonical, values }, nullable, writable: true }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self.kind, ColumnKind::Text | ColumnKind::Choice { .. })
    }

    /// Coerce a JSON value into this column's type.
    pub fn coerce(&self, value: &Value) -> Result<ColumnValue, StoreError> {
        if value.is_null() {
            return if self.nullable {
                Ok(ColumnValue::Null)
            } else {
                Err(StoreError::validation(format!("{} cannot be empty", self.name)))
            };
        }

        match self.kind {
            ColumnKind::Id | ColumnKind::Reference => coerce_id(self.name, value).map(ColumnValue::Int),
            ColumnKind::Text => {
                let text = scalar_text(self.name, value)?;
                if !self.nullable && text.trim().is_empty() {
                    return Err(StoreError::validation(format!("{} cannot be blank", self.name)));
                }
                Ok(ColumnValue::Text(text))
            }
            ColumnKind::Timestamp => {
                let text = scalar_text(self.name, value)?;
                parse_timestamp(&text).map(ColumnValue::Timestamp).ok_or_else(|| {
                    StoreError::validation(format!(
                        "{} must be a date like YYYY-MM-DD or YYYY-MM-DD HH:MM:SS, got '{}'",
                        self.name, text
                    ))
                })
            }
            ColumnKind::Choice { canonical, values } => {
                let text = scalar_text(self.name, value)?;
                canonical(&text)
                    .map(|c| ColumnValue::Text(c.to_string()))
                    .ok_or_else(|| {
                        StoreError::validation(format!(
                            "'{}' is not a valid {} (valid values: {})",
                            text,
                            self.name,
                            values.join(", ")
                        ))
                    })
            }
        }
    }
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    pub fn opt_text(v: Option<&str>) -> Self {
        v.map(|s| ColumnValue::Text(s.to_string())).unwrap_or(ColumnValue::Null)
    }

    pub fn opt_int(v: Option<i64>) -> Self {
        v.map(ColumnValue::Int).unwrap_or(ColumnValue::Null)
    }

    pub fn opt_timestamp(v: Option<DateTime<Utc>>) -> Self {
        v.map(ColumnValue::Timestamp).unwrap_or(ColumnValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ColumnValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            ColumnValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Ordering between values of the same kind; `None` across kinds or nulls.
    pub fn compare(&self, other: &ColumnValue) -> Option<Ordering> {
        match (self, other) {
            (ColumnValue::Int(a), ColumnValue::Int(b)) => Some(a.cmp(b)),
            (ColumnValue::Text(a), ColumnValue::Text(b)) => Some(a.cmp(b)),
            (ColumnValue::Timestamp(a), ColumnValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => f.write_str("empty"),
            ColumnValue::Int(i) => write!(f, "{}", i),
            ColumnValue::Text(s) => write!(f, "\"{}\"", s),
            ColumnValue::Timestamp(t) => {
                if t.time() == chrono::NaiveTime::MIN {
                    write!(f, "{}", t.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", t.format("%Y-%m-%d %H:%M"))
                }
            }
        }
    }
}

/// Validated column assignments for a create or update, in input order.
pub type FieldValues = Vec<(&'static str, ColumnValue)>;

pub(crate) fn scalar_text(field: &str, value: &Value) -> Result<String, StoreError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => {
            // Tag lists come back as arrays; store them comma separated.
            let parts: Result<Vec<String>, StoreError> =
                items.iter().map(|v| scalar_text(field, v)).collect();
            Ok(parts?.join(", "))
        }
        _ => Err(StoreError::validation(format!("{} must be a plain value", field))),
    }
}

fn coerce_id(field: &str, value: &Value) -> Result<i64, StoreError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().trim_start_matches('#').parse::<i64>().ok(),
        // Single-element arrays are how the old schema stored relations.
        Value::Array(items) if items.len() == 1 => return coerce_id(field, &items[0]),
        _ => None,
    };
    match parsed {
        Some(id) if id > 0 => Ok(id),
        _ => Err(StoreError::validation(format!("{} must be a positive record id", field))),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS[.f]]`, the `T`-separated forms,
/// and RFC 3339. Naive values are taken as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
}
