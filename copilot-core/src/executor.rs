use std::sync::Arc;
use std::time::Instant;

use crate::models::{ColumnValue, Record};
use crate::operation::{Action, FilterOp, OperationDescriptor, ValidatedOperation};
use crate::similarity;
use crate::store::{describe_filters, EntityStore, StoreError, MAX_READ_LIMIT};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Created(Record),
    Found(Vec<Record>),
    Updated(Record),
    Deleted(Record),
}

/// Runs one validated operation against the store and words the result.
pub struct OperationExecutor {
    store: Arc<dyn EntityStore>,
    read_limit: u32,
}

impl OperationExecutor {
    pub fn new(store: Arc<dyn EntityStore>, read_limit: u32) -> Self {
        Self {
            store,
            read_limit: read_limit.clamp(1, MAX_READ_LIMIT),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Validate without touching the store.
    pub fn prepare(&self, descriptor: &OperationDescriptor) -> Result<ValidatedOperation, StoreError> {
        descriptor.validate()
    }

    /// Exactly one store call.
    pub async fn execute(&self, op: &ValidatedOperation) -> Result<ExecutionOutcome, StoreError> {
        let started = Instant::now();
        let outcome = match op.action {
            Action::Create => ExecutionOutcome::Created(self.store.create(op.entity_type, &op.fields).await?),
            Action::Read => {
                ExecutionOutcome::Found(self.store.read(op.entity_type, &op.filters, self.read_limit).await?)
            }
            Action::Update => {
                ExecutionOutcome::Updated(self.store.update(op.entity_type, &op.filters, &op.fields).await?)
            }
            Action::Delete => ExecutionOutcome::Deleted(self.store.delete(op.entity_type, &op.filters).await?),
        };
        tracing::info!(
            entity = %op.entity_type,
            action = %op.action,
            store = self.store.name(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Operation executed"
        );
        Ok(outcome)
    }

    /// Names resembling the name an operation looked for. Empty when it did
    /// not look anything up by name.
    pub async fn suggest_names(&self, op: &ValidatedOperation) -> Result<Vec<String>, StoreError> {
        let Some(query) = name_query(op) else {
            return Ok(Vec::new());
        };
        let names = self.store.list_names(op.entity_type).await?;
        Ok(similarity::suggestions(query, &names))
    }

    /// Natural-language result, including generated ids.
    pub fn summarize(&self, op: &ValidatedOperation, outcome: &ExecutionOutcome) -> String {
        let entity = op.entity_type;
        match outcome {
            ExecutionOutcome::Created(record) => format!(
                "Successfully created {} record with ID {}: {}\nYou can now reference this record by its ID (#{}).",
                entity,
                record.id(),
                describe_record(record),
                record.id()
            ),
            ExecutionOutcome::Found(records) if records.is_empty() => {
                if op.filters.is_empty() {
                    format!("There are no {}s yet.", entity)
                } else {
                    format!("No {}s found where {}.", entity, describe_filters(&op.filters))
                }
            }
            ExecutionOutcome::Found(records) => {
                let mut text = format!("Found {} {}(s):", records.len(), entity);
                for record in records {
                    text.push_str("\n- ");
                    text.push_str(&describe_record(record));
                }
                if records.len() as u32 >= self.read_limit {
                    text.push_str(&format!("\nShowing the first {}; narrow the search to see others.", self.read_limit));
                }
                text
            }
            ExecutionOutcome::Updated(record) => {
                let changes: Vec<String> = op
                    .fields
                    .iter()
                    .map(|(column, value)| format!("{} is now {}", column, plain(value)))
                    .collect();
                format!(
                    "Updated {} #{} \"{}\": {}.",
                    entity,
                    record.id(),
                    record.name(),
                    changes.join(", ")
                )
            }
            ExecutionOutcome::Deleted(record) => {
                format!("Deleted {} #{} \"{}\".", entity, record.id(), record.name())
            }
        }
    }

    /// Plain-language explanation of a failed operation.
    pub fn explain(err: &StoreError) -> String {
        match err {
            StoreError::NotFound(msg) => format!("I couldn't find that. {}.", msg.trim_end_matches('.')),
            StoreError::ValidationFailed(msg) => format!("I couldn't do that: {}.", msg.trim_end_matches('.')),
            StoreError::ConstraintViolation(msg) => {
                format!("The database refused the change: {}.", msg.trim_end_matches('.'))
            }
            other => format!("Something went wrong with the database: {}", other),
        }
    }
}

fn name_query(op: &ValidatedOperation) -> Option<&str> {
    op.filters
        .iter()
        .find(|f| f.column == "name" && matches!(f.op, FilterOp::Eq | FilterOp::Contains | FilterOp::Similar))
        .and_then(|f| f.value.as_text())
}

/// `Did you mean: "Q1 Planning", "Q2 Planning"?`
pub fn did_you_mean(names: &[String]) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    let quoted: Vec<String> = names.iter().map(|n| format!("\"{}\"", n)).collect();
    Some(format!("Did you mean: {}?", quoted.join(", ")))
}

fn plain(value: &ColumnValue) -> String {
    match value {
        ColumnValue::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `#3 "Q1 Planning" (priority: P1, status: Not started)`
pub fn describe_record(record: &Record) -> String {
    let fields: Vec<String> = record
        .populated_fields()
        .into_iter()
        .map(|(column, value)| format!("{}: {}", column, plain(&value)))
        .collect();
    if fields.is_empty() {
        format!("#{} \"{}\"", record.id(), record.name())
    } else {
        format!("#{} \"{}\" ({})", record.id(), record.name(), fields.join(", "))
    }
}
