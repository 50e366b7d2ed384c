//! Persistence boundary for clients, projects, and tasks.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ColumnValue, EntityType, FieldValues, Record};
use crate::operation::{FilterOp, ResolvedFilter};

pub use memory::InMemoryStore;
pub use postgres::PgEntityStore;

/// Hard ceiling on records returned by a single read.
pub const MAX_READ_LIMIT: u32 = 100;

/// Rows scanned for fuzzy matching and name suggestions.
pub const MAX_SCAN_ROWS: u32 = 1000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{0}")]
    ConstraintViolation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::ValidationFailed(msg.into())
    }

    /// Errors the user can act on; anything else ends the turn.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::ValidationFailed(_) | StoreError::ConstraintViolation(_)
        )
    }
}

/// CRUD over the three entity tables.
///
/// `update` and `delete` act on exactly one record: zero matches is
/// `NotFound`, more than one is `ValidationFailed`. Selection and write happen
/// atomically.
#[async_trait]
pub trait EntityStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Backend description, e.g. the PostgreSQL version string.
    async fn health(&self) -> Result<String, StoreError>;

    async fn create(&self, entity: EntityType, fields: &FieldValues) -> Result<Record, StoreError>;

    /// Matching records ordered by id, at most `limit` (clamped to `MAX_READ_LIMIT`).
    /// With a `similar` filter the best matches come first.
    async fn read(&self, entity: EntityType, filters: &[ResolvedFilter], limit: u32) -> Result<Vec<Record>, StoreError>;

    async fn update(
        &self,
        entity: EntityType,
        filters: &[ResolvedFilter],
        fields: &FieldValues,
    ) -> Result<Record, StoreError>;

    async fn delete(&self, entity: EntityType, filters: &[ResolvedFilter]) -> Result<Record, StoreError>;

    async fn count(&self, entity: EntityType) -> Result<i64, StoreError>;

    /// Record names ordered by id, at most `MAX_SCAN_ROWS`.
    async fn list_names(&self, entity: EntityType) -> Result<Vec<String>, StoreError>;
}

pub(crate) fn has_similar(filters: &[ResolvedFilter]) -> bool {
    filters.iter().any(|f| f.op == FilterOp::Similar)
}

/// Stable sort by combined `similar` score, best first. Id order breaks ties.
pub(crate) fn rank_by_similarity(records: &mut [Record], filters: &[ResolvedFilter]) {
    let score = |record: &Record| -> u32 {
        filters
            .iter()
            .filter_map(|f| f.similarity(&record.column(f.column).unwrap_or(ColumnValue::Null)))
            .map(u32::from)
            .sum()
    };
    records.sort_by_cached_key(|r| std::cmp::Reverse(score(r)));
}

pub(crate) fn describe_filters(filters: &[ResolvedFilter]) -> String {
    filters.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(" and ")
}

pub(crate) fn no_match(entity: EntityType, filters: &[ResolvedFilter]) -> StoreError {
    StoreError::NotFound(format!("No {} found where {}", entity, describe_filters(filters)))
}

pub(crate) fn ambiguous(entity: EntityType, filters: &[ResolvedFilter]) -> StoreError {
    StoreError::validation(format!(
        "More than one {} matches {}; narrow it down, for example by id",
        entity,
        describe_filters(filters)
    ))
}
