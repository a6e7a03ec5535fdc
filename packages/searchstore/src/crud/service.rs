//! Entity CRUD over one index
//!
//! [`EntityStore`] is the surface shared by every CRUD flavour:
//! [`IndexCrud`] works on a single index, the soft-delete decorator wraps
//! any store, and the alias router spreads entities over several physical
//! indices.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::query::EntityQuery;
use super::validation::{require_ids, require_non_empty, require_positive};
use crate::domain::{BulkOutcome, Document, ExecMode, ScriptSpec};
use crate::error::{ErrorKind, Result, StoreError};
use crate::store::{BatchScan, DualModeRouter, Scan, ScanOptions};
use crate::timing::SlowOpGuard;

/// Hit sources of a realized hits query; anything else is empty
pub(crate) fn into_list(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

pub(crate) fn ids_clause(ids: &[String]) -> Value {
    json!({ "bool": { "must": [{ "terms": { "_id": ids } }] } })
}

pub(crate) fn source_params(source: Option<&[String]>) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(fields) = source {
        params.insert("_source".into(), json!(fields));
    }
    params
}

/// Run an entity query through the router, logging it when slow
pub(crate) fn run_query(router: &DualModeRouter, index: &str, query: EntityQuery) -> Result<Option<Value>> {
    let config = router.config();
    let body = query.body(config.query.default_limit);
    let _guard = SlowOpGuard::new(
        "query",
        format!("index={} body={}", index, body),
        config.timing.slow_query_ms,
    );
    router.query(index, body, query.key(), query.transform_options(), query.mode())
}

/// Entity operations common to every CRUD flavour
pub trait EntityStore: Send + Sync {
    /// Index (or alias) the store targets
    fn index_name(&self) -> &str;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create an entity, generating an id when none is given. The id is
    /// also stored on the entity as `uid`.
    fn create(&self, id: Option<&str>, entity: Document, mode: ExecMode) -> Result<String>;

    fn update(&self, id: &str, update: Document, mode: ExecMode) -> Result<()>;

    fn upsert(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()>;

    /// Replace the whole document
    fn overwrite(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()>;

    fn delete(&self, id: &str, mode: ExecMode) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn get_entity(&self, id: &str, source: Option<&[String]>, mode: ExecMode) -> Result<Option<Value>>;

    /// Sources of the given ids (at most `limit`)
    fn get_entities(&self, ids: &[String], limit: usize) -> Result<Vec<Value>>;

    fn query(&self, query: EntityQuery) -> Result<Option<Value>>;

    /// Whether the entity exists; `NotFound` instead of `false` when `throw`
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

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Batches
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Commit pending writes; any failed item is a `BulkItems` error
    fn batch_write(&self) -> Result<BulkOutcome>;

    fn batch_get(&self) -> Result<HashMap<String, Option<Value>>>;

    fn refresh(&self) -> Result<()>;
}

/// CRUD service for one index
///
/// Services share a [`DualModeRouter`], so writes batched through one
/// service are committed by any other service on the same router.
#[derive(Clone)]
pub struct IndexCrud {
    router: Arc<DualModeRouter>,
    index: String,
}

impl IndexCrud {
    pub fn new(router: Arc<DualModeRouter>, index: impl Into<String>) -> Self {
        Self {
            router,
            index: index.into(),
        }
    }

    pub fn router(&self) -> &Arc<DualModeRouter> {
        &self.router
    }

    /// Index (`_id` keyed) without the create-only semantics
    pub fn index_doc(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        self.router.index_doc(&self.index, id, entity, mode)?;
        Ok(())
    }

    /// Update, optionally skipping the existence check. A missing entity is
    /// `NotFound` when immediate and silently skipped when batched.
    pub fn update_checked(
        &self,
        id: &str,
        update: Document,
        mode: ExecMode,
        check_existence: bool,
    ) -> Result<()> {
        require_non_empty("entity_id", id)?;
        if check_existence && !self.exists(id, !mode.is_batched())? {
            return Ok(());
        }
        self.router.update(&self.index, id, update, mode)?;
        Ok(())
    }

    pub fn delete_checked(&self, id: &str, mode: ExecMode, check_existence: bool) -> Result<()> {
        require_non_empty("entity_id", id)?;
        if check_existence && !self.exists(id, !mode.is_batched())? {
            return Ok(());
        }
        self.router.delete(&self.index, id, mode)?;
        Ok(())
    }

    pub fn script_update(&self, id: &str, script: &ScriptSpec, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        self.router.script_update(&self.index, id, script, mode)?;
        Ok(())
    }

    pub fn delete_by_query(&self, query: &Value) -> Result<Value> {
        self.router.delete_by_query(&self.index, query)
    }

    pub fn reindex(&self, body: &Value) -> Result<Value> {
        self.router.reindex(body)
    }

    /// Engine profile of `query`, searched without sources
    pub fn profile(&self, query: EntityQuery) -> Result<Value> {
        let body = query.body(self.router.config().query.default_limit);
        self.router.profile(&self.index, &body, true)
    }

    /// How `body.query` matches the entity `id`
    pub fn explain(&self, id: &str, body: &Value) -> Result<Value> {
        require_non_empty("entity_id", id)?;
        self.router.explain(&self.index, id, body)
    }

    /// Every requested id mapped to its source (or `None`), fetched with
    /// batched multi-gets of at most `query.max_get_all` ids
    pub fn get_all(&self, ids: &[String]) -> Result<HashMap<String, Option<Value>>> {
        require_ids(ids)?;
        let chunk_size = self.router.config().query.max_get_all.max(1);
        let mut all = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(chunk_size) {
            for id in chunk {
                self.router
                    .get(&self.index, id, Map::new(), ExecMode::Batched)?;
            }
            let mut results = self.router.batch_get()?;
            for id in chunk {
                all.insert(id.clone(), results.remove(id).flatten());
            }
        }
        Ok(all)
    }

    /// Number of matches of `query` (`match_all` when unset)
    pub fn count(&self, query: Option<Value>, key: Option<&str>, mode: ExecMode) -> Result<Option<u64>> {
        let query = query.unwrap_or_else(|| json!({ "match_all": {} }));
        self.router.count(&self.index, query, key, mode)
    }

    /// `true` when nothing matches `fields`; a match is a `Conflict` when
    /// `throw`
    pub fn unique_by_query(&self, fields: Document, throw: bool) -> Result<bool> {
        let description = Value::Object(fields.clone());
        let taken = !into_list(self.query(EntityQuery::matching(fields))?).is_empty();
        if taken && throw {
            return Err(StoreError::conflict(format!(
                "Query for {}, already exists.",
                description
            )));
        }
        Ok(!taken)
    }

    /// `true` when applying `fields` to `id` keeps them unique: either no
    /// entity matches or the match is `id` itself
    pub fn unique_after_update(&self, id: &str, fields: Document, throw: bool) -> Result<bool> {
        require_non_empty("entity_id", id)?;
        let description = Value::Object(fields.clone());
        let existing = self.query(EntityQuery::matching(fields).first().with_ids())?;
        let existing_id = existing
            .as_ref()
            .and_then(|entity| entity.get("uid"))
            .and_then(Value::as_str);

        match existing_id {
            None => Ok(true),
            Some(existing_id) if existing_id == id => Ok(true),
            Some(_) if throw => Err(StoreError::conflict(format!(
                "Update of {} causes a conflict",
                description
            ))),
            Some(_) => Ok(false),
        }
    }

    /// Completion suggestions on the configured suggest field
    pub fn suggest(
        &self,
        prefix: &str,
        contexts: Option<&Value>,
        key: Option<&str>,
        mode: ExecMode,
    ) -> Result<Option<Value>> {
        let field = self.router.config().query.suggest_field.clone();
        self.router
            .suggest(&self.index, &field, prefix, contexts, key, mode)
    }

    pub fn match_all(&self, size: usize) -> Result<Vec<Value>> {
        require_positive("size", size)?;
        Ok(into_list(self.query(EntityQuery::match_all().limit(size))?))
    }

    /// First hit of the first query that matches anything; queries run
    /// immediately, in order
    pub fn find_first(&self, queries: Vec<EntityQuery>) -> Result<Option<Value>> {
        for query in queries {
            match self.query(query.immediately().first())? {
                Some(Value::Null) | None => continue,
                Some(found) => return Ok(Some(found)),
            }
        }
        Ok(None)
    }

    /// First hit per key, run as one multi-search
    pub fn find_all(
        &self,
        keyed: Vec<(String, EntityQuery)>,
        fields: Option<Vec<String>>,
    ) -> Result<HashMap<String, Value>> {
        for (key, query) in keyed {
            let mut query = query.first().batched(key);
            if let Some(fields) = &fields {
                query = query.select(fields.clone());
            }
            self.query(query)?;
        }
        self.router.batch_query()
    }

    pub fn batch_query(&self) -> Result<HashMap<String, Value>> {
        self.router.batch_query()
    }

    pub fn pending_writes(&self) -> usize {
        self.router.pending_writes()
    }

    /// Commit pending writes once at least `batch_size` are queued. Failed
    /// items go to `on_error` when given; otherwise they are returned as
    /// the `BulkItems` error. Returns whether a commit happened.
    pub fn flush_if_necessary(
        &self,
        batch_size: usize,
        on_write: Option<&dyn Fn()>,
        on_error: Option<&dyn Fn(&StoreError)>,
    ) -> Result<bool> {
        if self.pending_writes() < batch_size {
            return Ok(false);
        }
        match self.batch_write() {
            Ok(_) => {
                if let Some(on_write) = on_write {
                    on_write();
                }
            }
            Err(err) if err.kind == ErrorKind::BulkItems => match on_error {
                Some(on_error) => on_error(&err),
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
        Ok(true)
    }

    pub fn scan_options(&self) -> ScanOptions {
        self.router.scan_options()
    }

    pub fn scan(&self, options: ScanOptions) -> Scan {
        self.router.scan(&self.index, options)
    }

    pub fn batch_scan(&self, options: ScanOptions) -> BatchScan {
        self.router.batch_scan(&self.index, options)
    }

    pub fn sliced_scan<F>(
        &self,
        options: ScanOptions,
        slices: usize,
        workers: Option<usize>,
        handler: F,
    ) -> Result<usize>
    where
        F: Fn(Value) + Send + Sync,
    {
        self.router
            .sliced_scan(&self.index, options, slices, workers, handler)
    }
}

impl EntityStore for IndexCrud {
    fn index_name(&self) -> &str {
        &self.index
    }

    fn create(&self, id: Option<&str>, mut entity: Document, mode: ExecMode) -> Result<String> {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        entity.insert("uid".into(), json!(id));
        self.router.create(&self.index, &id, entity, mode)?;
        debug!(index = %self.index, id = %id, "Entity created");
        Ok(id)
    }

    fn update(&self, id: &str, update: Document, mode: ExecMode) -> Result<()> {
        self.update_checked(id, update, mode, true)
    }

    fn upsert(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        self.router.upsert(&self.index, id, entity, mode)?;
        Ok(())
    }

    fn overwrite(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()> {
        self.index_doc(id, entity, mode)
    }

    fn delete(&self, id: &str, mode: ExecMode) -> Result<()> {
        self.delete_checked(id, mode, true)
    }

    fn get_entity(&self, id: &str, source: Option<&[String]>, mode: ExecMode) -> Result<Option<Value>> {
        require_non_empty("entity_id", id)?;
        self.router
            .get(&self.index, id, source_params(source), mode)
    }

    fn get_entities(&self, ids: &[String], limit: usize) -> Result<Vec<Value>> {
        require_ids(ids)?;
        let found = self.query(EntityQuery::clause(ids_clause(ids)).limit(limit))?;
        Ok(into_list(found))
    }

    fn query(&self, query: EntityQuery) -> Result<Option<Value>> {
        run_query(&self.router, &self.index, query)
    }

    fn batch_write(&self) -> Result<BulkOutcome> {
        let outcome = self.router.batch_write()?;
        if outcome.has_failures() {
            warn!(index = %self.index, failed = outcome.failures().len(), "Bulk commit had failed items");
        }
        outcome.into_result()
    }

    fn batch_get(&self) -> Result<HashMap<String, Option<Value>>> {
        self.router.batch_get()
    }

    fn refresh(&self) -> Result<()> {
        self.router.refresh_index(&self.index)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::domain::ports::SearchEngine;
    use crate::infrastructure::{EngineOp, InMemoryEngine};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn service() -> (InMemoryEngine, IndexCrud) {
        let engine = InMemoryEngine::new();
        let router = DualModeRouter::new(Arc::new(engine.clone()), Arc::new(StoreConfig::default()));
        (engine, IndexCrud::new(Arc::new(router), "thing"))
    }

    #[test]
    fn test_create_generates_id_and_uid() {
        let (engine, crud) = service();
        let id = crud
            .create(None, doc(json!({"name": "a"})), ExecMode::Immediate)
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(engine.document("thing", &id).unwrap()["uid"], json!(id));
    }

    #[test]
    fn test_update_missing_is_not_found_when_immediate() {
        let (engine, crud) = service();
        let err = crud
            .update("ghost", doc(json!({"n": 1})), ExecMode::Immediate)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        crud.update("ghost", doc(json!({"n": 1})), ExecMode::Batched)
            .unwrap();
        assert_eq!(crud.pending_writes(), 0);
        assert_eq!(engine.call_count(EngineOp::Update), 0);
    }

    #[test]
    fn test_update_without_existence_check() {
        let (_, crud) = service();
        crud.update_checked("ghost", doc(json!({"n": 1})), ExecMode::Batched, false)
            .unwrap();
        assert_eq!(crud.pending_writes(), 1);
        let err = crud.batch_write().unwrap_err();
        assert_eq!(err.kind, ErrorKind::BulkItems);
    }

    #[test]
    fn test_query_wraps_fields_and_applies_default_limit() {
        let (engine, crud) = service();
        for i in 0..3 {
            crud.create(Some(i.to_string().as_str()), doc(json!({"kind": "w", "n": i})), ExecMode::Immediate)
                .unwrap();
        }
        engine.index("thing", "x", &json!({"kind": "g"})).unwrap();

        let found = into_list(crud.query(EntityQuery::matching(doc(json!({"kind": "w"})))).unwrap());
        assert_eq!(found.len(), 3);

        let first = crud
            .query(
                EntityQuery::matching(doc(json!({"kind": "w"})))
                    .sort("n", crate::crud::SortDirection::Desc)
                    .first(),
            )
            .unwrap();
        assert_eq!(first.unwrap()["n"], json!(2));
    }

    #[test]
    fn test_unique_checks() {
        let (_, crud) = service();
        crud.create(Some("1"), doc(json!({"email": "a@x"})), ExecMode::Immediate)
            .unwrap();

        assert!(crud.unique_by_query(doc(json!({"email": "b@x"})), true).unwrap());
        let err = crud
            .unique_by_query(doc(json!({"email": "a@x"})), true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(!crud.unique_by_query(doc(json!({"email": "a@x"})), false).unwrap());

        assert!(crud.unique_after_update("1", doc(json!({"email": "a@x"})), true).unwrap());
        assert_eq!(
            crud.unique_after_update("2", doc(json!({"email": "a@x"})), true)
                .unwrap_err()
                .kind,
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_get_all_marks_missing_ids() {
        let (engine, crud) = service();
        crud.create(Some("1"), doc(json!({"n": 1})), ExecMode::Immediate)
            .unwrap();
        let all = crud.get_all(&["1".to_string(), "2".to_string()]).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all["1"].is_some());
        assert_eq!(all["2"], None);
        assert_eq!(engine.call_count(EngineOp::Mget), 1);
    }

    #[test]
    fn test_find_first_and_find_all() {
        let (_, crud) = service();
        crud.create(Some("1"), doc(json!({"kind": "w", "name": "one"})), ExecMode::Immediate)
            .unwrap();

        let found = crud
            .find_first(vec![
                EntityQuery::matching(doc(json!({"kind": "nope"}))),
                EntityQuery::matching(doc(json!({"kind": "w"}))),
            ])
            .unwrap();
        assert_eq!(found.unwrap()["name"], json!("one"));

        let results = crud
            .find_all(
                vec![
                    ("w".to_string(), EntityQuery::matching(doc(json!({"kind": "w"})))),
                    ("g".to_string(), EntityQuery::matching(doc(json!({"kind": "g"})))),
                ],
                Some(vec!["name".to_string()]),
            )
            .unwrap();
        assert_eq!(results["w"], json!({"name": "one"}));
        assert_eq!(results["g"], Value::Null);
    }

    #[test]
    fn test_flush_if_necessary() {
        let (_, crud) = service();
        crud.upsert("1", doc(json!({"n": 1})), ExecMode::Batched).unwrap();
        assert!(!crud.flush_if_necessary(2, None, None).unwrap());

        crud.update_checked("ghost", doc(json!({})), ExecMode::Batched, false)
            .unwrap();
        let errors = Mutex::new(Vec::new());
        let on_error: &dyn Fn(&StoreError) = &|err| errors.lock().push(err.kind);
        assert!(crud.flush_if_necessary(2, None, Some(on_error)).unwrap());
        assert_eq!(errors.into_inner(), vec![ErrorKind::BulkItems]);
        assert_eq!(crud.pending_writes(), 0);
    }

    #[test]
    fn test_delete_and_exists() {
        let (_, crud) = service();
        crud.create(Some("1"), doc(json!({"n": 1})), ExecMode::Immediate)
            .unwrap();
        assert!(crud.exists("1", true).unwrap());
        crud.delete("1", ExecMode::Immediate).unwrap();
        assert!(!crud.exists("1", false).unwrap());
        assert!(crud.exists("1", true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_count_and_suggest() {
        let (_, crud) = service();
        crud.create(Some("1"), doc(json!({"text_suggest": "Widget"})), ExecMode::Immediate)
            .unwrap();
        assert_eq!(crud.count(None, None, ExecMode::Immediate).unwrap(), Some(1));
        let options = crud.suggest("wid", None, None, ExecMode::Immediate).unwrap();
        assert_eq!(into_list(options).len(), 1);
    }

    #[test]
    fn test_profile_and_explain() {
        let (engine, crud) = service();
        crud.create(Some("1"), doc(json!({"kind": "w"})), ExecMode::Immediate)
            .unwrap();

        let profile = crud
            .profile(EntityQuery::matching(doc(json!({"kind": "w"}))))
            .unwrap();
        assert_eq!(profile["shards"][0]["searches"][0]["query"][0]["type"], json!("bool"));

        let explained = crud
            .explain("1", &json!({"query": {"term": {"kind": "w"}}}))
            .unwrap();
        assert_eq!(explained["matched"], json!(true));
        assert_eq!(engine.call_count(EngineOp::Explain), 1);

        assert_eq!(
            crud.explain("", &json!({})).unwrap_err().kind,
            ErrorKind::Validation
        );
    }
}
