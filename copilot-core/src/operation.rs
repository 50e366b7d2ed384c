//! Structured CRUD operations extracted from a user message.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::models::column::scalar_text;
use crate::models::{ColumnSpec, ColumnValue, EntityType, FieldValues};
use crate::similarity::{partial_ratio, MIN_SIMILARITY};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    #[serde(alias = "list", alias = "search", alias = "get")]
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::Read)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    #[serde(alias = "=", alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = "like")]
    Contains,
    /// Fuzzy text match, for names the user only half remembers.
    #[serde(alias = "fuzzy", alias = "~")]
    Similar,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
}

impl FilterOp {
    /// Phrase used when describing a filter back to the user.
    pub fn phrase(&self) -> &'static str {
        match self {
            FilterOp::Eq => "is",
            FilterOp::Ne => "is not",
            FilterOp::Contains => "contains",
            FilterOp::Similar => "is like",
            FilterOp::Lt => "is before",
            FilterOp::Lte => "is on or before",
            FilterOp::Gt => "is after",
            FilterOp::Gte => "is on or after",
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(self, FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte)
    }

    fn is_text_search(&self) -> bool {
        matches!(self, FilterOp::Contains | FilterOp::Similar)
    }
}

/// A filter condition on one field.
///
/// Deserializes from either a bare scalar (equality) or
/// `{"op": "...", "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPredicate")]
pub struct Predicate {
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn eq(value: impl Into<Value>) -> Self {
        Self { op: FilterOp::Eq, value: value.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPredicate {
    Op { op: FilterOp, value: Value },
    Eq(Value),
}

impl From<RawPredicate> for Predicate {
    fn from(raw: RawPredicate) -> Self {
        match raw {
            RawPredicate::Op { op, value } => Predicate { op, value },
            RawPredicate::Eq(value) => Predicate::eq(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub entity_type: EntityType,
    pub action: Action,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: BTreeMap<String, Predicate>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl OperationDescriptor {
    pub fn new(entity_type: EntityType, action: Action) -> Self {
        Self { entity_type, action, fields: Map::new(), filters: BTreeMap::new() }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn with_filter(mut self, key: &str, predicate: Predicate) -> Self {
        self.filters.insert(key.to_string(), predicate);
        self
    }

    /// Coerce and check everything the store will need. No I/O.
    pub fn validate(&self) -> Result<ValidatedOperation, StoreError> {
        let fields = match self.action {
            Action::Create => self.entity_type.parse_fields(&self.fields, true)?,
            Action::Update => {
                let fields = self.entity_type.parse_fields(&self.fields, false)?;
                if fields.is_empty() {
                    return Err(StoreError::validation(format!(
                        "nothing to change: an update needs at least one {} field",
                        self.entity_type
                    )));
                }
                fields
            }
            Action::Read | Action::Delete => FieldValues::new(),
        };

        let filters = self
            .filters
            .iter()
            .map(|(key, predicate)| self.resolve_filter(key, predicate))
            .collect::<Result<Vec<_>, _>>()?;

        if matches!(self.action, Action::Update | Action::Delete) {
            if filters.is_empty() {
                return Err(StoreError::validation(format!(
                    "which {}? Give an id or a name to {} it",
                    self.entity_type, self.action
                )));
            }
            if filters.iter().any(|f| f.op == FilterOp::Similar) {
                return Err(StoreError::validation(format!(
                    "a fuzzy match can only look {}s up; give the exact name or id to {} one",
                    self.entity_type, self.action
                )));
            }
        }

        Ok(ValidatedOperation {
            entity_type: self.entity_type,
            action: self.action,
            fields,
            filters,
        })
    }

    fn resolve_filter(&self, key: &str, predicate: &Predicate) -> Result<ResolvedFilter, StoreError> {
        let spec = self.entity_type.column(key).ok_or_else(|| {
            StoreError::validation(format!("cannot filter {} by unknown field '{}'", self.entity_type.table(), key))
        })?;
        ResolvedFilter::new(spec, predicate)
    }
}

/// A descriptor whose fields and filters have been coerced to column types.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOperation {
    pub entity_type: EntityType,
    pub action: Action,
    pub fields: FieldValues,
    pub filters: Vec<ResolvedFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    pub column: &'static str,
    pub op: FilterOp,
    pub value: ColumnValue,
}

impl ResolvedFilter {
    pub fn new(spec: &ColumnSpec, predicate: &Predicate) -> Result<Self, StoreError> {
        let value = match predicate.op {
            op if op.is_text_search() => {
                if !spec.is_textual() {
                    return Err(StoreError::validation(format!(
                        "'{}' only works on text fields, not {}",
                        op.phrase(),
                        spec.name
                    )));
                }
                let text = scalar_text(spec.name, &predicate.value)?;
                if text.trim().is_empty() {
                    return Err(StoreError::validation(format!("search text for {} is empty", spec.name)));
                }
                ColumnValue::Text(text)
            }
            FilterOp::Eq | FilterOp::Ne if predicate.value.is_null() => ColumnValue::Null,
            op => {
                if op.is_ordering() && predicate.value.is_null() {
                    return Err(StoreError::validation(format!("cannot compare {} with an empty value", spec.name)));
                }
                // Filters may test required columns against null, so coerce as nullable.
                let spec = ColumnSpec { nullable: true, ..*spec };
                spec.coerce(&predicate.value)?
            }
        };
        Ok(Self { column: spec.name, op: predicate.op, value })
    }

    /// Evaluate against a cell value. Nulls only match `eq null` / `ne x`.
    pub fn matches(&self, actual: &ColumnValue) -> bool {
        use std::cmp::Ordering;

        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Contains => match (actual, &self.value) {
                (ColumnValue::Text(a), ColumnValue::Text(needle)) => {
                    a.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => false,
            },
            FilterOp::Similar => self.similarity(actual).is_some_and(|score| score >= MIN_SIMILARITY),
            FilterOp::Lt => actual.compare(&self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(actual.compare(&self.value), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Gt => actual.compare(&self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(actual.compare(&self.value), Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

impl ResolvedFilter {
    /// Fuzzy score of a cell against a `similar` filter; `None` for any other filter.
    pub fn similarity(&self, actual: &ColumnValue) -> Option<u8> {
        match (self.op, actual, &self.value) {
            (FilterOp::Similar, ColumnValue::Text(a), ColumnValue::Text(query)) => Some(partial_ratio(query, a)),
            (FilterOp::Similar, _, _) => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for ResolvedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.phrase(), self.value)
    }
}

/// A mutating operation held until the user confirms it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub descriptor: OperationDescriptor,
    pub raw_request: String,
    pub created_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn new(descriptor: OperationDescriptor, raw_request: impl Into<String>) -> Self {
        Self {
            descriptor,
            raw_request: raw_request.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_parses_scalar_and_object_predicates() {
        let d: OperationDescriptor = serde_json::from_value(json!({
            "entity_type": "task",
            "action": "read",
            "filters": {
                "status": "now",
                "name": {"op": "contains", "value": "deck"},
                "due_date": {"op": "<", "value": "2025-06-01"}
            }
        }))
        .unwrap();
        assert_eq!(d.filters["status"], Predicate::eq("now"));
        assert_eq!(d.filters["name"].op, FilterOp::Contains);
        assert_eq!(d.filters["due_date"].op, FilterOp::Lt);
        assert!(d.fields.is_empty());
    }

    #[test]
    fn null_fields_and_filters_are_empty() {
        let d: OperationDescriptor = serde_json::from_value(json!({
            "entity_type": "projects",
            "action": "list",
            "fields": null,
            "filters": null
        }))
        .unwrap();
        assert_eq!(d.entity_type, EntityType::Project);
        assert_eq!(d.action, Action::Read);
    }

    #[test]
    fn validate_canonicalises_filters() {
        let op = OperationDescriptor::new(EntityType::Task, Action::Read)
            .with_filter("status", Predicate::eq("now"))
            .validate()
            .unwrap();
        assert_eq!(op.filters[0].value, ColumnValue::Text("Now (P1)".into()));
    }

    #[test]
    fn update_and_delete_need_filters() {
        let err = OperationDescriptor::new(EntityType::Project, Action::Delete)
            .validate()
            .unwrap_err();
        assert!(matches!(err, StoreError::ValidationFailed(_)));

        let err = OperationDescriptor::new(EntityType::Project, Action::Update)
            .with_filter("id", Predicate::eq(3))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("nothing to change"));
    }

    #[test]
    fn contains_rejects_non_text_columns() {
        let err = OperationDescriptor::new(EntityType::Task, Action::Read)
            .with_filter("due_date", Predicate { op: FilterOp::Contains, value: json!("2025") })
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("text fields"));
    }

    #[test]
    fn similar_is_for_lookups_only() {
        let d: OperationDescriptor = serde_json::from_value(json!({
            "entity_type": "project",
            "action": "read",
            "filters": {"name": {"op": "fuzzy", "value": "q1 planing"}}
        }))
        .unwrap();
        assert_eq!(d.filters["name"].op, FilterOp::Similar);
        assert!(d.validate().is_ok());

        let err = OperationDescriptor::new(EntityType::Project, Action::Delete)
            .with_filter("name", Predicate { op: FilterOp::Similar, value: json!("q1 planing") })
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("exact name or id"), "{}", err);

        let err = OperationDescriptor::new(EntityType::Task, Action::Read)
            .with_filter("id", Predicate { op: FilterOp::Similar, value: json!("12") })
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("'is like' only works on text fields"), "{}", err);
    }

    #[test]
    fn matching_rules() {
        let contains = ResolvedFilter { column: "name", op: FilterOp::Contains, value: ColumnValue::Text("PLAN".into()) };
        assert!(contains.matches(&ColumnValue::Text("Q1 planning".into())));
        assert!(!contains.matches(&ColumnValue::Null));

        let similar = ResolvedFilter { column: "name", op: FilterOp::Similar, value: ColumnValue::Text("planing".into()) };
        assert!(similar.matches(&ColumnValue::Text("Q1 Planning".into())));
        assert!(!similar.matches(&ColumnValue::Text("Payroll".into())));
        assert!(!similar.matches(&ColumnValue::Null));
        assert_eq!(contains.similarity(&ColumnValue::Text("Q1 planning".into())), None);

        let ne = ResolvedFilter { column: "priority", op: FilterOp::Ne, value: ColumnValue::Text("P1".into()) };
        assert!(ne.matches(&ColumnValue::Null));

        let lt = ResolvedFilter { column: "id", op: FilterOp::Lt, value: ColumnValue::Int(5) };
        assert!(lt.matches(&ColumnValue::Int(4)));
        assert!(!lt.matches(&ColumnValue::Null));
    }

    #[test]
    fn pending_operation_keeps_request_text() {
        let pending = PendingOperation::new(
            OperationDescriptor::new(EntityType::Client, Action::Create).with_field("name", "Acme"),
            "add client Acme",
        );
        assert_eq!(pending.raw_request, "add client Acme");
        assert!(pending.descriptor.action.is_mutating());
    }
}
