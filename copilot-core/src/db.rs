use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the clients/projects/tasks tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::info!("Database schema ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::choice::{ClientStatus, ClientType, ProjectPriority, ProjectStatus, TaskStatus, Weekday};

    fn check_clause(constraint: &str) -> &'static str {
        let start = SCHEMA.find(constraint).unwrap_or_else(|| panic!("missing {}", constraint));
        let rest = &SCHEMA[start..];
        let end = rest.find("))").unwrap();
        &rest[..end]
    }

    #[test]
    fn schema_checks_every_choice_column() {
        let columns: [(&str, &[&str]); 6] = [
            ("clients_client_type_check", ClientType::VALUES),
            ("clients_status_check", ClientStatus::VALUES),
            ("projects_priority_check", ProjectPriority::VALUES),
            ("projects_status_check", ProjectStatus::VALUES),
            ("tasks_status_check", TaskStatus::VALUES),
            ("tasks_days_check", Weekday::VALUES),
        ];
        for (constraint, values) in columns {
            let clause = check_clause(constraint);
            for value in values {
                assert!(clause.contains(&format!("'{}'", value)), "{} lacks {}", constraint, value);
            }
            assert_eq!(clause.matches('\'').count(), values.len() * 2, "{} has extra values", constraint);
        }
    }
}
