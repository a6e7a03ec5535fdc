//! Soft-delete overlay for any [`EntityStore`]
//!
//! Deleting stamps `deleted_time` instead of removing the document. Reads
//! and queries hide records whose `deleted_time` has passed; the
//! `*_including_deleted` operations and [`SoftDeleteCrud::hard_delete`] see
//! through the overlay.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::query::EntityQuery;
use super::service::{ids_clause, into_list, EntityStore};
use super::validation::{require_ids, require_non_empty};
use crate::domain::{now_millis, BulkOutcome, Document, ExecMode};
use crate::error::{Result, StoreError};

pub const DELETED_TIME_FIELD: &str = "deleted_time";

/// Decorates a store with soft deletes
#[derive(Debug, Clone)]
pub struct SoftDeleteCrud<S> {
    inner: S,
}

/// Deleted at or before `at` (epoch millis)
pub fn is_soft_deleted(record: &Value, at: i64) -> bool {
    record
        .get(DELETED_TIME_FIELD)
        .and_then(Value::as_i64)
        .map_or(false, |deleted| deleted <= at)
}

/// Matches records without `deleted_time` or deleted after `at`
pub fn not_deleted_clause(at: i64) -> Value {
    json!({
        "bool": {
            "should": [
                { "bool": { "must_not": [{ "exists": { "field": DELETED_TIME_FIELD } }] } },
                { "range": { DELETED_TIME_FIELD: { "gt": at } } }
            ]
        }
    })
}

pub fn soft_delete_update(at: i64) -> Document {
    let mut update = Document::new();
    update.insert(DELETED_TIME_FIELD.into(), json!(at));
    update
}

fn visible(record: Option<Value>, at: i64) -> Option<Value> {
    record.filter(|record| !is_soft_deleted(record, at))
}

impl<S: EntityStore> SoftDeleteCrud<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn get_including_deleted(&self, id: &str, mode: ExecMode) -> Result<Option<Value>> {
        self.inner.get_entity(id, None, mode)
    }

    pub fn exists_including_deleted(&self, id: &str, throw: bool) -> Result<bool> {
        self.inner.exists(id, throw)
    }

    /// Remove the document for good, deleted or not
    pub fn hard_delete(&self, id: &str, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        if self.exists_including_deleted(id, !mode.is_batched())? {
            self.inner.delete(id, mode)?;
        }
        Ok(())
    }
}

impl<S: EntityStore> EntityStore for SoftDeleteCrud<S> {
    fn index_name(&self) -> &str {
        self.inner.index_name()
    }

    fn create(&self, id: Option<&str>, entity: Document, mode: ExecMode) -> Result<String> {
        self.inner.create(id, entity, mode)
    }

    fn update(&self, id: &str, update: Document, mode: ExecMode) -> Result<()> {
        if self.exists(id, !mode.is_batched())? {
            self.inner.update(id, update, mode)?;
        }
        Ok(())
    }

    fn upsert(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()> {
        self.inner.upsert(id, entity, mode)
    }

    fn overwrite(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()> {
        self.inner.overwrite(id, entity, mode)
    }

    /// Stamp `deleted_time`; already deleted records count as missing
    fn delete(&self, id: &str, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        if self.exists(id, !mode.is_batched())? {
            self.inner
                .update(id, soft_delete_update(now_millis()), mode)?;
        }
        Ok(())
    }

    fn get_entity(&self, id: &str, source: Option<&[String]>, mode: ExecMode) -> Result<Option<Value>> {
        let record = self.inner.get_entity(id, source, mode)?;
        Ok(visible(record, now_millis()))
    }

    fn get_entities(&self, ids: &[String], limit: usize) -> Result<Vec<Value>> {
        require_ids(ids)?;
        let query = EntityQuery::clause(ids_clause(ids))
            .and_clause(not_deleted_clause(now_millis()))
            .limit(limit);
        Ok(into_list(self.inner.query(query)?))
    }

    fn query(&self, query: EntityQuery) -> Result<Option<Value>> {
        self.inner
            .query(query.and_clause(not_deleted_clause(now_millis())))
    }

    fn exists(&self, id: &str, throw: bool) -> Result<bool> {
        let found = self.get_entity(id, None, ExecMode::Immediate)?.is_some();
        if !found && throw {
            return Err(StoreError::not_found(format!(
                "{} does not exist for id {}",
                self.index_name(),
                id
            )));
        }
        Ok(found)
    }

    fn batch_write(&self) -> Result<BulkOutcome> {
        self.inner.batch_write()
    }

    /// Pending gets with soft-deleted records reported as absent
    fn batch_get(&self) -> Result<HashMap<String, Option<Value>>> {
        let now = now_millis();
        Ok(self
            .inner
            .batch_get()?
            .into_iter()
            .map(|(key, record)| (key, visible(record, now)))
            .collect())
    }

    fn refresh(&self) -> Result<()> {
        self.inner.refresh()
    }
}


#[cfg(all(test, feature = "memory"))]
mod memory_tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::StoreConfig;
    use crate::crud::IndexCrud;
    use crate::infrastructure::InMemoryEngine;
    use crate::store::DualModeRouter;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn service() -> (InMemoryEngine, SoftDeleteCrud<IndexCrud>) {
        let engine = InMemoryEngine::new();
        let router = DualModeRouter::new(Arc::new(engine.clone()), Arc::new(StoreConfig::default()));
        let crud = IndexCrud::new(Arc::new(router), "thing");
        (engine, SoftDeleteCrud::new(crud))
    }

    #[test]
    fn test_delete_hides_but_keeps_document() {
        let (engine, crud) = service();
        crud.create(Some("1"), doc(json!({"kind": "w"})), ExecMode::Immediate)
            .unwrap();
        crud.create(Some("2"), doc(json!({"kind": "w"})), ExecMode::Immediate)
            .unwrap();

        crud.delete("1", ExecMode::Immediate).unwrap();

        assert_eq!(crud.get_entity("1", None, ExecMode::Immediate).unwrap(), None);
        assert!(crud
            .get_including_deleted("1", ExecMode::Immediate)
            .unwrap()
            .is_some());
        assert!(engine.document("thing", "1").is_some());

        let visible = crud
            .query(EntityQuery::matching(doc(json!({"kind": "w"}))).with_ids())
            .unwrap();
        let ids: Vec<Value> = into_list(visible).iter().map(|e| e["uid"].clone()).collect();
        assert_eq!(ids, vec![json!("2")]);

        let entities = crud
            .get_entities(&["1".to_string(), "2".to_string()], 10)
            .unwrap();
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let (_, crud) = service();
        crud.create(Some("1"), doc(json!({})), ExecMode::Immediate)
            .unwrap();
        crud.delete("1", ExecMode::Immediate).unwrap();
        assert!(crud.delete("1", ExecMode::Immediate).unwrap_err().is_not_found());
        crud.delete("1", ExecMode::Batched).unwrap();
    }

    #[test]
    fn test_hard_delete_removes_deleted_record() {
        let (engine, crud) = service();
        crud.create(Some("1"), doc(json!({})), ExecMode::Immediate)
            .unwrap();
        crud.delete("1", ExecMode::Immediate).unwrap();
        crud.hard_delete("1", ExecMode::Immediate).unwrap();
        assert!(engine.document("thing", "1").is_none());
    }

    #[test]
    fn test_batch_get_hides_deleted() {
        let (_, crud) = service();
        crud.create(Some("1"), doc(json!({})), ExecMode::Immediate)
            .unwrap();
        crud.create(Some("2"), doc(json!({})), ExecMode::Immediate)
            .unwrap();
        crud.delete("2", ExecMode::Immediate).unwrap();

        crud.get_entity("1", None, ExecMode::Batched).unwrap();
        crud.get_entity("2", None, ExecMode::Batched).unwrap();
        let results = crud.batch_get().unwrap();
        assert!(results["1"].is_some());
        assert_eq!(results["2"], None);
    }
}
