use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::client::Client;
use super::column::{ColumnSpec, FieldValues};
use super::project::Project;
use super::task::Task;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[serde(alias = "projects")]
    Project,
    #[serde(alias = "tasks")]
    Task,
    #[serde(alias = "clients")]
    Client,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Project, EntityType::Task, EntityType::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::Task => "task",
            EntityType::Client => "client",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Project => "projects",
            EntityType::Task => "tasks",
            EntityType::Client => "clients",
        }
    }

    pub fn columns(&self) -> &'static [ColumnSpec] {
        match self {
            EntityType::Project => Project::COLUMNS,
            EntityType::Task => Task::COLUMNS,
            EntityType::Client => Client::COLUMNS,
        }
    }

    /// Look up a column by the name a model or user would use.
    ///
    /// Matching ignores case and treats spaces as underscores, so "Due Date"
    /// finds `due_date`. A bare relation name ("client") finds `client_id`.
    pub fn column(&self, key: &str) -> Option<&'static ColumnSpec> {
        let normalized = key.trim().to_lowercase().replace([' ', '-'], "_");
        let columns = self.columns();
        columns
            .iter()
            .find(|c| c.name == normalized)
            .or_else(|| {
                let with_id = format!("{}_id", normalized);
                columns.iter().find(|c| c.name == with_id)
            })
    }

    /// Validate and coerce the `fields` map of a create or update.
    pub fn parse_fields(&self, fields: &Map<String, Value>, for_create: bool) -> Result<FieldValues, StoreError> {
        let mut values = FieldValues::new();
        for (key, raw) in fields {
            let spec = self.column(key).ok_or_else(|| {
                StoreError::validation(format!(
                    "{} has no field '{}' (fields: {})",
                    self.table(),
                    key,
                    self.writable_names().join(", ")
                ))
            })?;
            if !spec.writable {
                return Err(StoreError::validation(format!("{} is set by the store and cannot be written", spec.name)));
            }
            if values.iter().any(|(name, _)| *name == spec.name) {
                return Err(StoreError::validation(format!("{} is given more than once", spec.name)));
            }
            values.push((spec.name, spec.coerce(raw)?));
        }

        if for_create && !values.iter().any(|(name, _)| *name == "name") {
            return Err(StoreError::validation(format!("a {} needs a name", self.as_str())));
        }
        Ok(values)
    }

    pub fn writable_names(&self) -> Vec<&'static str> {
        self.columns().iter().filter(|c| c.writable).map(|c| c.name).collect()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "project" | "projects" => Ok(EntityType::Project),
            "task" | "tasks" => Ok(EntityType::Task),
            "client" | "clients" => Ok(EntityType::Client),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}
