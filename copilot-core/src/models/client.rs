use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::choice::{ClientStatus, ClientType};
use super::column::{ColumnSpec, ColumnValue};
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub client_type: Option<ClientType>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub website: Option<String>,
    pub status: Option<ClientStatus>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::id(),
        ColumnSpec::required_text("name"),
        ColumnSpec::choice("client_type", true, ClientType::canonical, ClientType::VALUES),
        ColumnSpec::text("email"),
        ColumnSpec::text("contact"),
        ColumnSpec::text("website"),
        ColumnSpec::choice("status", true, ClientStatus::canonical, ClientStatus::VALUES),
        ColumnSpec::text("tags"),
        ColumnSpec::text("notes"),
        ColumnSpec::system_timestamp("created_at"),
        ColumnSpec::system_timestamp("updated_at"),
    ];

    pub fn new(id: i64, name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            client_type: None,
            email: None,
            contact: None,
            website: None,
            status: None,
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
            "client_type" => ColumnValue::opt_text(self.client_type.map(|v| v.as_str())),
            "email" => ColumnValue::opt_text(self.email.as_deref()),
            "contact" => ColumnValue::opt_text(self.contact.as_deref()),
            "website" => ColumnValue::opt_text(self.website.as_deref()),
            "status" => ColumnValue::opt_text(self.status.map(|v| v.as_str())),
            "tags" => ColumnValue::opt_text(self.tags.as_deref()),
            "notes" => ColumnValue::opt_text(self.notes.as_deref()),
            "created_at" => ColumnValue::Timestamp(self.created_at),
            "updated_at" => ColumnValue::Timestamp(self.updated_at),
            _ => return None,
        };
        Some(value)
    }

    /// Apply validated assignments. Values must already be coerced through `COLUMNS`.
    pub fn apply(&mut self, column: &str, value: &ColumnValue) -> Result<(), StoreError> {
        match column {
            "name" => self.name = required_text(column, value)?,
            "client_type" => self.client_type = parse_choice(column, value)?,
            "email" => self.email = value.as_text().map(str::to_string),
            "contact" => self.contact = value.as_text().map(str::to_string),
            "website" => self.website = value.as_text().map(str::to_string),
            "status" => self.status = parse_choice(column, value)?,
            "tags" => self.tags = value.as_text().map(str::to_string),
            "notes" => self.notes = value.as_text().map(str::to_string),
            other => return Err(StoreError::validation(format!("clients have no writable field '{}'", other))),
        }
        Ok(())
    }
}

pub(crate) fn required_text(column: &str, value: &ColumnValue) -> Result<String, StoreError> {
    value
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| StoreError::validation(format!("{} cannot be empty", column)))
}

pub(crate) fn parse_choice<T>(column: &str, value: &ColumnValue) -> Result<Option<T>, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    match value {
        ColumnValue::Null => Ok(None),
        ColumnValue::Text(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|e| StoreError::validation(format!("{}: {}", column, e))),
        _ => Err(StoreError::validation(format!("{} must be text", column))),
    }
}
