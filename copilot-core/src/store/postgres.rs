use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{ambiguous, has_similar, no_match, rank_by_similarity, EntityStore, StoreError, MAX_READ_LIMIT, MAX_SCAN_ROWS};
use crate::db;
use crate::models::{Client, ColumnValue, EntityType, FieldValues, Project, Record, Task};
use crate::operation::{FilterOp, ResolvedFilter};

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Query building
// ============================================================================

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &ColumnValue) {
    match value {
        ColumnValue::Null => qb.push("NULL"),
        ColumnValue::Int(i) => qb.push_bind(*i),
        ColumnValue::Text(s) => qb.push_bind(s.clone()),
        ColumnValue::Timestamp(t) => qb.push_bind(*t),
    };
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Column names come from the static column specs, never from user input.
/// `similar` filters have no SQL form and are applied by the caller.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[ResolvedFilter]) {
    let sql_filters = filters.iter().filter(|f| f.op != FilterOp::Similar);
    for (i, filter) in sql_filters.enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push(filter.column);
        match (filter.op, &filter.value) {
            (FilterOp::Eq, ColumnValue::Null) => {
                qb.push(" IS NULL");
            }
            (FilterOp::Ne, ColumnValue::Null) => {
                qb.push(" IS NOT NULL");
            }
            (FilterOp::Contains, value) => {
                qb.push(" ILIKE ");
                let needle = value.as_text().unwrap_or_default();
                qb.push_bind(format!("%{}%", escape_like(needle)));
            }
            (op, value) => {
                qb.push(match op {
                    FilterOp::Eq => " = ",
                    FilterOp::Ne => " IS DISTINCT FROM ",
                    FilterOp::Lt => " < ",
                    FilterOp::Lte => " <= ",
                    FilterOp::Gt => " > ",
                    FilterOp::Gte => " >= ",
                    FilterOp::Contains | FilterOp::Similar => " ILIKE ",
                });
                push_value(qb, value);
            }
        }
    }
}

async fn fetch_records<'e, E>(
    entity: EntityType,
    qb: &mut QueryBuilder<'_, Postgres>,
    executor: E,
) -> Result<Vec<Record>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let records = match entity {
        EntityType::Project => qb
            .build_query_as::<Project>()
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(Record::Project)
            .collect(),
        EntityType::Task => qb
            .build_query_as::<Task>()
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(Record::Task)
            .collect(),
        EntityType::Client => qb
            .build_query_as::<Client>()
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(Record::Client)
            .collect(),
    };
    Ok(records)
}

async fn fetch_one_record<'e, E>(
    entity: EntityType,
    qb: &mut QueryBuilder<'_, Postgres>,
    executor: E,
) -> Result<Record, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    fetch_records(entity, qb, executor)
        .await
        .map_err(map_db_error)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Unavailable(format!("{} write returned no row", entity)))
}

/// Translate PostgreSQL error codes into the store's error kinds.
fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let message = db_err.message().to_string();
        match db_err.code().as_deref() {
            Some("23503") => {
                return StoreError::ConstraintViolation(format!(
                    "the referenced record does not exist or is still in use ({})",
                    message
                ))
            }
            Some("23505") => return StoreError::ConstraintViolation(message),
            Some("23502") | Some("23514") | Some("22P02") | Some("22007") | Some("22008") => {
                return StoreError::ValidationFailed(message)
            }
            _ => {}
        }
    }
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Backend(other),
    }
}

// ============================================================================
// EntityStore
// ============================================================================

impl PgEntityStore {
    /// Lock and return the single id matched by `filters` inside `tx`.
    async fn select_single(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        entity: EntityType,
        filters: &[ResolvedFilter],
    ) -> Result<i64, StoreError> {
        if has_similar(filters) {
            return Err(StoreError::validation(format!(
                "a fuzzy match cannot pick the {} to change; use its exact name or id",
                entity
            )));
        }
        let mut qb = QueryBuilder::new(format!("SELECT id FROM {}", entity.table()));
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY id LIMIT 2 FOR UPDATE");
        let ids: Vec<i64> = qb
            .build_query_scalar::<i64>()
            .fetch_all(&mut **tx)
            .await
            .map_err(map_db_error)?;
        match ids.as_slice() {
            [] => Err(no_match(entity, filters)),
            [id] => Ok(*id),
            _ => Err(ambiguous(entity, filters)),
        }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    async fn health(&self) -> Result<String, StoreError> {
        db::health_check(&self.pool).await.map_err(map_db_error)
    }

    async fn create(&self, entity: EntityType, fields: &FieldValues) -> Result<Record, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::validation(format!("a {} needs a name", entity)));
        }
        let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", entity.table()));
        for (i, (column, _)) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(*column);
        }
        qb.push(") VALUES (");
        for (i, (_, value)) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, value);
        }
        qb.push(") RETURNING *");

        let record = fetch_one_record(entity, &mut qb, &self.pool).await?;
        tracing::debug!(entity = %entity, id = record.id(), "Inserted record");
        Ok(record)
    }

    async fn read(&self, entity: EntityType, filters: &[ResolvedFilter], limit: u32) -> Result<Vec<Record>, StoreError> {
        let limit = limit.min(MAX_READ_LIMIT);
        let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", entity.table()));
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY id LIMIT ");
        if !has_similar(filters) {
            qb.push_bind(i64::from(limit));
            return fetch_records(entity, &mut qb, &self.pool).await.map_err(map_db_error);
        }

        qb.push_bind(i64::from(MAX_SCAN_ROWS));
        let mut records = fetch_records(entity, &mut qb, &self.pool).await.map_err(map_db_error)?;
        records.retain(|r| {
            filters
                .iter()
                .filter(|f| f.op == FilterOp::Similar)
                .all(|f| f.matches(&r.column(f.column).unwrap_or(ColumnValue::Null)))
        });
        rank_by_similarity(&mut records, filters);
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn update(
        &self,
        entity: EntityType,
        filters: &[ResolvedFilter],
        fields: &FieldValues,
    ) -> Result<Record, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let id = Self::select_single(&mut tx, entity, filters).await?;

        let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", entity.table()));
        for (column, value) in fields {
            qb.push(*column);
            qb.push(" = ");
            push_value(&mut qb, value);
            qb.push(", ");
        }
        qb.push("updated_at = NOW() WHERE id = ");
        qb.push_bind(id);
        qb.push(" RETURNING *");

        let record = fetch_one_record(entity, &mut qb, &mut *tx).await?;
        tx.commit().await.map_err(map_db_error)?;
        tracing::debug!(entity = %entity, id, "Updated record");
        Ok(record)
    }

    async fn delete(&self, entity: EntityType, filters: &[ResolvedFilter]) -> Result<Record, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let id = Self::select_single(&mut tx, entity, filters).await?;

        let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE id = ", entity.table()));
        qb.push_bind(id);
        qb.push(" RETURNING *");

        let record = fetch_one_record(entity, &mut qb, &mut *tx).await?;
        tx.commit().await.map_err(map_db_error)?;
        tracing::debug!(entity = %entity, id, "Deleted record");
        Ok(record)
    }

    async fn count(&self, entity: EntityType) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", entity.table());
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)
    }

    async fn list_names(&self, entity: EntityType) -> Result<Vec<String>, StoreError> {
        let sql = format!("SELECT name FROM {} ORDER BY id LIMIT $1", entity.table());
        sqlx::query_scalar::<_, String>(&sql)
            .bind(i64::from(MAX_SCAN_ROWS))
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)
    }
}
