use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{ambiguous, has_similar, no_match, rank_by_similarity, EntityStore, StoreError, MAX_READ_LIMIT, MAX_SCAN_ROWS};
use crate::models::{ColumnValue, EntityType, FieldValues, Record};
use crate::operation::ResolvedFilter;

/// Foreign keys: (child entity, column, parent entity).
const REFERENCES: &[(EntityType, &str, EntityType)] = &[
    (EntityType::Project, "client_id", EntityType::Client),
    (EntityType::Task, "project_id", EntityType::Project),
];

#[derive(Default)]
struct Tables {
    rows: HashMap<EntityType, BTreeMap<i64, Record>>,
    next_id: HashMap<EntityType, i64>,
}

impl Tables {
    fn table(&self, entity: EntityType) -> impl Iterator<Item = &Record> {
        self.rows.get(&entity).into_iter().flat_map(|t| t.values())
    }

    fn exists(&self, entity: EntityType, id: i64) -> bool {
        self.rows.get(&entity).is_some_and(|t| t.contains_key(&id))
    }

    fn matching_ids(&self, entity: EntityType, filters: &[ResolvedFilter]) -> Vec<i64> {
        self.table(entity)
            .filter(|r| matches_all(r, filters))
            .map(|r| r.id())
            .collect()
    }

    /// Exactly one match, or NotFound / ambiguous.
    fn single_match(&self, entity: EntityType, filters: &[ResolvedFilter]) -> Result<i64, StoreError> {
        let ids = self.matching_ids(entity, filters);
        match ids.as_slice() {
            [] => Err(no_match(entity, filters)),
            [id] => Ok(*id),
            _ => Err(ambiguous(entity, filters)),
        }
    }

    fn check_references(&self, record: &Record) -> Result<(), StoreError> {
        for (child, column, parent) in REFERENCES {
            if *child != record.entity_type() {
                continue;
            }
            if let Some(ColumnValue::Int(id)) = record.column(column) {
                if !self.exists(*parent, id) {
                    return Err(StoreError::ConstraintViolation(format!(
                        "{} #{} does not exist ({})",
                        parent, id, column
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_not_referenced(&self, entity: EntityType, id: i64) -> Result<(), StoreError> {
        for (child, column, parent) in REFERENCES {
            if *parent != entity {
                continue;
            }
            let dependents = self
                .table(*child)
                .filter(|r| r.column(column) == Some(ColumnValue::Int(id)))
                .count();
            if dependents > 0 {
                return Err(StoreError::ConstraintViolation(format!(
                    "{} #{} is still referenced by {} {}(s)",
                    entity, id, dependents, child
                )));
            }
        }
        Ok(())
    }
}

fn matches_all(record: &Record, filters: &[ResolvedFilter]) -> bool {
    filters.iter().all(|f| {
        let actual = record.column(f.column).unwrap_or(ColumnValue::Null);
        f.matches(&actual)
    })
}

/// Process-local store used for development and tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health(&self) -> Result<String, StoreError> {
        let tables = self.lock()?;
        let total: usize = tables.rows.values().map(|t| t.len()).sum();
        Ok(format!("in-memory store ({} records)", total))
    }

    async fn create(&self, entity: EntityType, fields: &FieldValues) -> Result<Record, StoreError> {
        let mut tables = self.lock()?;
        let name = fields
            .iter()
            .find(|(column, _)| *column == "name")
            .and_then(|(_, v)| v.as_text())
            .ok_or_else(|| StoreError::validation(format!("a {} needs a name", entity)))?
            .to_string();

        let id = tables.next_id.get(&entity).copied().unwrap_or(0) + 1;
        let mut record = Record::blank(entity, id, name, Utc::now());
        for (column, value) in fields {
            record.apply(column, value)?;
        }
        tables.check_references(&record)?;

        tables.next_id.insert(entity, id);
        tables.rows.entry(entity).or_default().insert(id, record.clone());
        Ok(record)
    }

    async fn read(&self, entity: EntityType, filters: &[ResolvedFilter], limit: u32) -> Result<Vec<Record>, StoreError> {
        let tables = self.lock()?;
        let limit = limit.min(MAX_READ_LIMIT) as usize;
        let matching = tables.table(entity).filter(|r| matches_all(r, filters));
        if !has_similar(filters) {
            return Ok(matching.take(limit).cloned().collect());
        }

        let mut records: Vec<Record> = matching.cloned().collect();
        rank_by_similarity(&mut records, filters);
        records.truncate(limit);
        Ok(records)
    }

    async fn update(
        &self,
        entity: EntityType,
        filters: &[ResolvedFilter],
        fields: &FieldValues,
    ) -> Result<Record, StoreError> {
        let mut tables = self.lock()?;
        let id = tables.single_match(entity, filters)?;
        let mut record = tables
            .rows
            .get(&entity)
            .and_then(|t| t.get(&id))
            .cloned()
            .ok_or_else(|| no_match(entity, filters))?;

        for (column, value) in fields {
            record.apply(column, value)?;
        }
        tables.check_references(&record)?;
        record.touch(Utc::now());

        tables.rows.entry(entity).or_default().insert(id, record.clone());
        Ok(record)
    }

    async fn delete(&self, entity: EntityType, filters: &[ResolvedFilter]) -> Result<Record, StoreError> {
        let mut tables = self.lock()?;
        let id = tables.single_match(entity, filters)?;
        tables.check_not_referenced(entity, id)?;
        tables
            .rows
            .get_mut(&entity)
            .and_then(|t| t.remove(&id))
            .ok_or_else(|| no_match(entity, filters))
    }

    async fn count(&self, entity: EntityType) -> Result<i64, StoreError> {
        let tables = self.lock()?;
        Ok(tables.rows.get(&entity).map(|t| t.len() as i64).unwrap_or(0))
    }

    async fn list_names(&self, entity: EntityType) -> Result<Vec<String>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .table(entity)
            .take(MAX_SCAN_ROWS as usize)
            .map(|r| r.name().to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Action, OperationDescriptor, Predicate};
    use serde_json::json;

    fn op(d: OperationDescriptor) -> crate::operation::ValidatedOperation {
        d.validate().unwrap()
    }

    async fn create(store: &InMemoryStore, entity: EntityType, fields: serde_json::Value) -> Record {
        let mut d = OperationDescriptor::new(entity, Action::Create);
        d.fields = fields.as_object().cloned().unwrap();
        let v = op(d);
        store.create(entity, &v.fields).await.unwrap()
    }

    #[tokio::test]
    async fn ids_are_sequential_per_type() {
        let store = InMemoryStore::new();
        let a = create(&store, EntityType::Client, json!({"name": "Acme"})).await;
        let b = create(&store, EntityType::Client, json!({"name": "Globex"})).await;
        let p = create(&store, EntityType::Project, json!({"name": "Site"})).await;
        assert_eq!((a.id(), b.id(), p.id()), (1, 2, 1));
        assert_eq!(store.count(EntityType::Client).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn foreign_keys_must_exist() {
        let store = InMemoryStore::new();
        let v = op(OperationDescriptor::new(EntityType::Task, Action::Create)
            .with_field("name", "Write deck")
            .with_field("project_id", 42));
        let err = store.create(EntityType::Task, &v.fields).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(store.count(EntityType::Task).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn referenced_records_cannot_be_deleted() {
        let store = InMemoryStore::new();
        let client = create(&store, EntityType::Client, json!({"name": "Acme"})).await;
        create(&store, EntityType::Project, json!({"name": "Site", "client_id": client.id()})).await;

        let v = op(OperationDescriptor::new(EntityType::Client, Action::Delete).with_filter("id", Predicate::eq(client.id())));
        let err = store.delete(EntityType::Client, &v.filters).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(store.count(EntityType::Client).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_requires_a_single_match() {
        let store = InMemoryStore::new();
        create(&store, EntityType::Project, json!({"name": "Alpha launch"})).await;
        create(&store, EntityType::Project, json!({"name": "Alpha docs"})).await;

        let v = op(OperationDescriptor::new(EntityType::Project, Action::Update)
            .with_filter("name", Predicate { op: crate::operation::FilterOp::Contains, value: json!("alpha") })
            .with_field("status", "done"));
        let err = store.update(EntityType::Project, &v.filters, &v.fields).await.unwrap_err();
        assert!(err.to_string().contains("More than one"));

        let v = op(OperationDescriptor::new(EntityType::Project, Action::Update)
            .with_filter("name", Predicate::eq("Alpha docs"))
            .with_field("status", "done"));
        let updated = store.update(EntityType::Project, &v.filters, &v.fields).await.unwrap();
        assert_eq!(updated.column("status"), Some(ColumnValue::Text("Done".into())));
    }

    #[tokio::test]
    async fn failed_update_leaves_record_unchanged() {
        let store = InMemoryStore::new();
        let project = create(&store, EntityType::Project, json!({"name": "Site", "priority": "P2"})).await;
        let v = op(OperationDescriptor::new(EntityType::Project, Action::Update)
            .with_filter("id", Predicate::eq(project.id()))
            .with_field("priority", "P1")
            .with_field("client_id", 99));
        assert!(store.update(EntityType::Project, &v.filters, &v.fields).await.is_err());

        let rows = store.read(EntityType::Project, &[], 10).await.unwrap();
        assert_eq!(rows, vec![project]);
    }

    #[tokio::test]
    async fn read_is_ordered_and_limited() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            create(&store, EntityType::Task, json!({"name": format!("task {}", i)})).await;
        }
        let rows = store.read(EntityType::Task, &[], 3).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn similar_read_ranks_best_match_first() {
        let store = InMemoryStore::new();
        for name in ["Q2 Planning", "Payroll", "Q1 Planning", "Planning offsite"] {
            create(&store, EntityType::Project, json!({"name": name})).await;
        }
        let v = op(OperationDescriptor::new(EntityType::Project, Action::Read)
            .with_filter("name", Predicate { op: crate::operation::FilterOp::Similar, value: json!("Q1 Planing") }));

        let rows = store.read(EntityType::Project, &v.filters, 10).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name()).collect();
        assert_eq!(names.first(), Some(&"Q1 Planning"));
        assert!(names.contains(&"Q2 Planning"));
        assert!(!names.contains(&"Payroll"));

        let rows = store.read(EntityType::Project, &v.filters, 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name(), "Q1 Planning");
    }

    #[tokio::test]
    async fn names_are_listed_in_id_order() {
        let store = InMemoryStore::new();
        for name in ["Acme", "Globex"] {
            create(&store, EntityType::Client, json!({"name": name})).await;
        }
        assert_eq!(store.list_names(EntityType::Client).await.unwrap(), vec!["Acme", "Globex"]);
        assert!(store.list_names(EntityType::Task).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = InMemoryStore::new();
        let v = op(OperationDescriptor::new(EntityType::Task, Action::Delete).with_filter("id", Predicate::eq(7)));
        let err = store.delete(EntityType::Task, &v.filters).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
