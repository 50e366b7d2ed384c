use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::choice::{TaskStatus, Weekday};
use super::client::{parse_choice, required_text};
use super::column::{ColumnSpec, ColumnValue};
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub project_id: Option<i64>,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    pub days: Option<Weekday>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::id(),
        ColumnSpec::required_text("name"),
        ColumnSpec::reference("project_id"),
        ColumnSpec::choice("status", false, TaskStatus::canonical, TaskStatus::VALUES),
        ColumnSpec::timestamp("due_date"),
        ColumnSpec::timestamp("date_completed"),
        ColumnSpec::choice("days", true, Weekday::canonical, Weekday::VALUES),
        ColumnSpec::text("tags"),
        ColumnSpec::text("notes"),
        ColumnSpec::system_timestamp("created_at"),
        ColumnSpec::system_timestamp("updated_at"),
    ];

    pub fn new(id: i64, name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            project_id: None,
            status: TaskStatus::Inbox,
            due_date: None,
            date_completed: None,
            days: None,
            tags: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn column(&self, name: &str) -> Option<ColumnValue> {
        let value = match name {
            "id" => ColumnValue::Int(self.id),
            "name" => ColumnValue::Text(self.name.clone()),
            "project_id" => ColumnValue::opt_int(self.project_id),
            "status" => ColumnValue::Text(self.status.as_str().to_string()),
            "due_date" => ColumnValue::opt_timestamp(self.due_date),
            "date_completed" => ColumnValue::opt_timestamp(self.date_completed),
            "days" => ColumnValue::opt_text(self.days.map(|v| v.as_str())),
            "tags" => ColumnValue::opt_text(self.tags.as_deref()),
            "notes" => ColumnValue::opt_text(self.notes.as_deref()),
            "created_at" => ColumnValue::Timestamp(self.created_at),
            "updated_at" => ColumnValue::Timestamp(self.updated_at),
            _ => return None,
        };
        Some(value)
    }

    pub fn apply(&mut self, column: &str, value: &ColumnValue) -> Result<(), StoreError> {
        match column {
            "name" => self.name = required_text(column, value)?,
            "project_id" => self.project_id = value.as_int(),
            "status" => {
                self.status = parse_choice(column, value)?
                    .ok_or_else(|| StoreError::validation("status cannot be empty"))?
            }
            "due_date" => self.due_date = value.as_timestamp(),
            "date_completed" => self.date_completed = value.as_timestamp(),
            "days" => self.days = parse_choice(column, value)?,
            "tags" => self.tags = value.as_text().map(str::to_string),
            "notes" => self.notes = value.as_text().map(str::to_string),
            other => return Err(StoreError::validation(format!("tasks have no writable field '{}'", other))),
        }
        Ok(())
    }
}
