use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::choice::{ProjectPriority, ProjectStatus};
use super::client::{parse_choice, required_text};
use super::column::{ColumnSpec, ColumnValue};
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub priority: Option<ProjectPriority>,
    pub status: ProjectStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub client_id: Option<i64>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub date_completed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::id(),
        ColumnSpec::required_text("name"),
        ColumnSpec::choice("priority", true, ProjectPriority::canonical, ProjectPriority::VALUES),
        ColumnSpec::choice("status", false, ProjectStatus::canonical, ProjectStatus::VALUES),
        ColumnSpec::timestamp("deadline"),
        ColumnSpec::reference("client_id"),
        ColumnSpec::text("tags"),
        ColumnSpec::text("notes"),
        ColumnSpec::timestamp("date_completed"),
        ColumnSpec::system_timestamp("created_at"),
        ColumnSpec::system_timestamp("updated_at"),
    ];

    pub fn new(id: i64, name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            priority: None,
            status: ProjectStatus::NotStarted,
            deadline: None,
            client_id: None,
            tags: None,
            notes: None,
            date_completed: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn column(&self, name: &str) -> Option<ColumnValue> {
        let value = match name {
            "id" => ColumnValue::Int(self.id),
            "name" => ColumnValue::Text(self.name.clone()),
            "priority" => ColumnValue::opt_text(self.priority.map(|v| v.as_str())),
            "status" => ColumnValue::Text(self.status.as_str().to_string()),
            "deadline" => ColumnValue::opt_timestamp(self.deadline),
            "client_id" => ColumnValue::opt_int(self.client_id),
            "tags" => ColumnValue::opt_text(self.tags.as_deref()),
            "notes" => ColumnValue::opt_text(self.notes.as_deref()),
            "date_completed" => ColumnValue::opt_timestamp(self.date_completed),
            "created_at" => ColumnValue::Timestamp(self.created_at),
            "updated_at" => ColumnValue::Timestamp(self.updated_at),
            _ => return None,
        };
        Some(value)
    }

    pub fn apply(&mut self, column: &str, value: &ColumnValue) -> Result<(), StoreError> {
        match column {
            "name" => self.name = required_text(column, value)?,
            "priority" => self.priority = parse_choice(column, value)?,
            "status" => {
                self.status = parse_choice(column, value)?
                    .ok_or_else(|| StoreError::validation("status cannot be empty"))?
            }
            "deadline" => self.deadline = value.as_timestamp(),
            "client_id" => self.client_id = value.as_int(),
            "tags" => self.tags = value.as_text().map(str::to_string),
            "notes" => self.notes = value.as_text().map(str::to_string),
            "date_completed" => self.date_completed = value.as_timestamp(),
            other => return Err(StoreError::validation(format!("projects have no writable field '{}'", other))),
        }
        Ok(())
    }
}
