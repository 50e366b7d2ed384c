use chrono::{DateTime, Utc};
use serde::Serialize;

use super::client::Client;
use super::column::ColumnValue;
use super::entity::EntityType;
use super::project::Project;
use super::task::Task;
use crate::store::StoreError;

/// A stored row of any entity type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Project(Project),
    Task(Task),
    Client(Client),
}

impl Record {
    /// A fresh record carrying the column defaults of its type.
    pub fn blank(entity: EntityType, id: i64, name: String, now: DateTime<Utc>) -> Self {
        match entity {
            EntityType::Project => Record::Project(Project::new(id, name, now)),
            EntityType::Task => Record::Task(Task::new(id, name, now)),
            EntityType::Client => Record::Client(Client::new(id, name, now)),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Record::Project(_) => EntityType::Project,
            Record::Task(_) => EntityType::Task,
            Record::Client(_) => EntityType::Client,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Record::Project(p) => p.id,
            Record::Task(t) => t.id,
            Record::Client(c) => c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Record::Project(p) => &p.name,
            Record::Task(t) => &t.name,
            Record::Client(c) => &c.name,
        }
    }

    pub fn column(&self, name: &str) -> Option<ColumnValue> {
        match self {
            Record::Project(p) => p.column(name),
            Record::Task(t) => t.column(name),
            Record::Client(c) => c.column(name),
        }
    }

    pub fn apply(&mut self, column: &str, value: &ColumnValue) -> Result<(), StoreError> {
        match self {
            Record::Project(p) => p.apply(column, value),
            Record::Task(t) => t.apply(column, value),
            Record::Client(c) => c.apply(column, value),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        match self {
            Record::Project(p) => p.updated_at = now,
            Record::Task(t) => t.updated_at = now,
            Record::Client(c) => c.updated_at = now,
        }
    }

    /// Non-empty user-facing columns, in schema order, for summaries.
    pub fn populated_fields(&self) -> Vec<(&'static str, ColumnValue)> {
        self.entity_type()
            .columns()
            .iter()
            .filter(|c| c.writable && c.name != "name")
            .filter_map(|c| match self.column(c.name) {
                Some(ColumnValue::Null) | None => None,
                Some(v) => Some((c.name, v)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_records_use_defaults() {
        let now = Utc::now();
        let project = Record::blank(EntityType::Project, 4, "Q1 Planning".into(), now);
        assert_eq!(project.column("status"), Some(ColumnValue::Text("Not started".into())));
        let task = Record::blank(EntityType::Task, 1, "Write deck".into(), now);
        assert_eq!(task.column("status"), Some(ColumnValue::Text("Inbox".into())));
        assert_eq!(task.id(), 1);
        assert_eq!(task.entity_type(), EntityType::Task);
    }

    #[test]
    fn apply_parses_choice_text() {
        let mut record = Record::blank(EntityType::Project, 1, "Q1".into(), Utc::now());
        record.apply("priority", &ColumnValue::Text("P1".into())).unwrap();
        assert_eq!(record.column("priority"), Some(ColumnValue::Text("P1".into())));
        assert!(record.apply("id", &ColumnValue::Int(9)).is_err());
    }

    #[test]
    fn populated_fields_skip_nulls_and_name() {
        let mut record = Record::blank(EntityType::Client, 1, "Acme".into(), Utc::now());
        record.apply("email", &ColumnValue::Text("a@acme.test".into())).unwrap();
        let fields = record.populated_fields();
        assert_eq!(fields, vec![("email", ColumnValue::Text("a@acme.test".into()))]);
    }
}
