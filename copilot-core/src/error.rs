use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Language model unavailable: {0}")]
    LlmUnavailable(#[from] LlmError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl CopilotError {
    /// Store failures that end the turn. Domain errors (not found, validation,
    /// constraint) are answered in conversation and never reach this type.
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Backend(e) => CopilotError::Database(e),
            other => CopilotError::Other(other.to_string()),
        }
    }
}
