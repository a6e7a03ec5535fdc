//! Per-call choice between immediate and batched execution

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::immediate::{suggest_body, ImmediateStore};
use super::scan::{self, BatchScan, Scan, ScanOptions};
use crate::batch::{BatchExecutionContext, GetIntent};
use crate::config::{BulkConfig, StoreConfig};
use crate::domain::{now_millis, BulkOutcome, Document, ExecMode, ScriptSpec, SearchEngine, WriteIntent};
use crate::error::{Result, StoreError};
use crate::response;
use crate::transform::{build_transform, transform, TransformOptions};

/// Set an epoch-millis stamp on a document
fn stamped(mut doc: Document, field: &str) -> Document {
    doc.insert(field.to_string(), json!(now_millis()));
    doc
}

fn require_key<'a>(key: Option<&'a str>, operation: &str) -> Result<&'a str> {
    match key {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(StoreError::missing_key(operation)),
    }
}

/// One operation surface over [`ImmediateStore`] and
/// [`BatchExecutionContext`]
///
/// Immediate calls return their realized result as `Some`. Batched calls
/// return `None`; `batch_write`, `batch_get` and `batch_query` realize them.
pub struct DualModeRouter {
    engine: Arc<dyn SearchEngine>,
    immediate: ImmediateStore,
    batch: BatchExecutionContext,
    config: Arc<StoreConfig>,
}

impl DualModeRouter {
    pub fn new(engine: Arc<dyn SearchEngine>, config: Arc<StoreConfig>) -> Self {
        Self {
            immediate: ImmediateStore::new(Arc::clone(&engine)),
            batch: BatchExecutionContext::new(config.bulk),
            engine,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run or enqueue a prepared intent
    pub fn write(&self, intent: WriteIntent, mode: ExecMode) -> Result<Option<Value>> {
        match mode {
            ExecMode::Immediate => self.immediate.write(&intent).map(Some),
            ExecMode::Batched => {
                self.batch.enqueue_write(intent);
                Ok(None)
            }
        }
    }

    /// Create; stamps `created_time`
    pub fn create(&self, index: &str, id: &str, doc: Document, mode: ExecMode) -> Result<Option<Value>> {
        self.write(WriteIntent::create(index, id, stamped(doc, "created_time")), mode)
    }

    pub fn index_doc(&self, index: &str, id: &str, doc: Document, mode: ExecMode) -> Result<Option<Value>> {
        self.write(WriteIntent::index(index, id, doc), mode)
    }

    /// Partial update; stamps `update_time`
    pub fn update(&self, index: &str, id: &str, doc: Document, mode: ExecMode) -> Result<Option<Value>> {
        self.write(WriteIntent::update(index, id, stamped(doc, "update_time")), mode)
    }

    /// Update-or-insert; stamps `upsert_time`
    pub fn upsert(&self, index: &str, id: &str, doc: Document, mode: ExecMode) -> Result<Option<Value>> {
        self.write(WriteIntent::upsert(index, id, stamped(doc, "upsert_time")), mode)
    }

    pub fn script_update(
        &self,
        index: &str,
        id: &str,
        script: &ScriptSpec,
        mode: ExecMode,
    ) -> Result<Option<Value>> {
        self.write(WriteIntent::script_update(index, id, script), mode)
    }

    pub fn delete(&self, index: &str, id: &str, mode: ExecMode) -> Result<Option<Value>> {
        self.write(WriteIntent::delete(index, id), mode)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Document source by id. Batched gets are keyed by the entity id.
    pub fn get(
        &self,
        index: &str,
        id: &str,
        params: Map<String, Value>,
        mode: ExecMode,
    ) -> Result<Option<Value>> {
        match mode {
            ExecMode::Immediate => self.immediate.get(index, id, &params),
            ExecMode::Batched => {
                let key = require_key(Some(id), "get")?;
                self.batch
                    .register_get(key, GetIntent::new(index, id).with_params(params));
                Ok(None)
            }
        }
    }

    /// Search with a composed result transform
    pub fn query(
        &self,
        index: &str,
        body: Value,
        key: Option<&str>,
        options: TransformOptions,
        mode: ExecMode,
    ) -> Result<Option<Value>> {
        let result_transform = build_transform(options);
        match mode {
            ExecMode::Immediate => self
                .immediate
                .query(index, &body, result_transform.as_ref())
                .map(Some),
            ExecMode::Batched => {
                let key = require_key(key, "query")?;
                self.batch.register_query(key, index, body, result_transform);
                Ok(None)
            }
        }
    }

    /// Completion suggestions; the realized value is a list of option sources
    pub fn suggest(
        &self,
        index: &str,
        field: &str,
        prefix: &str,
        contexts: Option<&Value>,
        key: Option<&str>,
        mode: ExecMode,
    ) -> Result<Option<Value>> {
        match mode {
            ExecMode::Immediate => self
                .immediate
                .suggest(index, field, prefix, contexts)
                .map(|options| Some(Value::Array(options))),
            ExecMode::Batched => {
                let key = require_key(key, "suggest")?;
                let name = key.to_string();
                let options =
                    transform(move |result: Value| Value::Array(response::suggest_options(&result, &name)));
                self.batch.register_query(
                    key,
                    index,
                    suggest_body(key, field, prefix, contexts),
                    Some(options),
                );
                Ok(None)
            }
        }
    }

    /// Number of documents matching a query clause. The batched result is
    /// the total as a JSON number.
    pub fn count(
        &self,
        index: &str,
        query: Value,
        key: Option<&str>,
        mode: ExecMode,
    ) -> Result<Option<u64>> {
        match mode {
            ExecMode::Immediate => self
                .immediate
                .count(index, &json!({ "query": query }))
                .map(Some),
            ExecMode::Batched => {
                let key = require_key(key, "count")?;
                let body = json!({ "query": query, "size": 0, "track_total_hits": true });
                let total = transform(|result: Value| json!(response::get_total(&result)));
                self.batch.register_query(key, index, body, Some(total));
                Ok(None)
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Batch Commits
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn batch_write(&self) -> Result<BulkOutcome> {
        self.batch.batch_write(self.engine.as_ref())
    }

    pub fn batch_write_with(&self, bulk: BulkConfig) -> Result<BulkOutcome> {
        self.batch.batch_write_with(self.engine.as_ref(), bulk)
    }

    pub fn batch_get(&self) -> Result<HashMap<String, Option<Value>>> {
        self.batch.batch_get(self.engine.as_ref())
    }

    pub fn batch_query(&self) -> Result<HashMap<String, Value>> {
        self.batch.batch_query(self.engine.as_ref())
    }

    pub fn pending_writes(&self) -> usize {
        self.batch.pending_writes()
    }

    pub fn pending_gets(&self) -> usize {
        self.batch.pending_gets()
    }

    pub fn pending_queries(&self) -> usize {
        self.batch.pending_queries()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Passthroughs
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn delete_by_query(&self, index: &str, query: &Value) -> Result<Value> {
        self.immediate.delete_by_query(index, query)
    }

    /// Run `body` as a profiled search and return its `profile` section
    pub fn profile(&self, index: &str, body: &Value, no_source: bool) -> Result<Value> {
        self.immediate.profile(index, body, no_source)
    }

    pub fn explain(&self, index: &str, id: &str, body: &Value) -> Result<Value> {
        self.immediate.explain(index, id, body)
    }

    pub fn reindex(&self, body: &Value) -> Result<Value> {
        self.immediate.reindex(body)
    }

    pub fn refresh_index(&self, index: &str) -> Result<()> {
        self.immediate.refresh_index(index)
    }

    /// Scan options seeded from the store's scan defaults
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::from_config(&self.config.scan)
    }

    pub fn scan(&self, index: &str, options: ScanOptions) -> Scan {
        Scan::new(Arc::clone(&self.engine), index, options)
    }

    pub fn batch_scan(&self, index: &str, options: ScanOptions) -> BatchScan {
        BatchScan::new(self.scan(index, options))
    }

    pub fn sliced_scan<F>(
        &self,
        index: &str,
        options: ScanOptions,
        slices: usize,
        workers: Option<usize>,
        handler: F,
    ) -> Result<usize>
    where
        F: Fn(Value) + Send + Sync,
    {
        scan::sliced_scan(&self.engine, index, &options, slices, workers, handler)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::infrastructure::{EngineOp, InMemoryEngine};
    use pretty_assertions::assert_eq;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn router() -> (InMemoryEngine, DualModeRouter) {
        let engine = InMemoryEngine::new();
        let router = DualModeRouter::new(Arc::new(engine.clone()), Arc::new(StoreConfig::default()));
        (engine, router)
    }

    #[test]
    fn test_immediate_create_stamps_created_time() {
        let (engine, router) = router();
        let result = router
            .create("thing", "1", doc(json!({"name": "a"})), ExecMode::Immediate)
            .unwrap();
        assert!(result.is_some());
        let stored = engine.document("thing", "1").unwrap();
        assert!(stored["created_time"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_batched_writes_defer_until_commit() {
        let (engine, router) = router();
        assert_eq!(
            router
                .create("thing", "1", doc(json!({"n": 1})), ExecMode::Batched)
                .unwrap(),
            None
        );
        router
            .upsert("thing", "2", doc(json!({"n": 2})), ExecMode::Batched)
            .unwrap();
        assert_eq!(router.pending_writes(), 2);
        assert_eq!(engine.doc_count("thing"), 0);

        let outcome = router.batch_write().unwrap();
        assert_eq!(outcome.ids(), vec!["1", "2"]);
        assert_eq!(router.pending_writes(), 0);
        assert!(engine.document("thing", "2").unwrap().contains_key("upsert_time"));
    }

    #[test]
    fn test_batched_query_requires_key() {
        let (engine, router) = router();
        let err = router
            .query("thing", json!({}), None, TransformOptions::hits(), ExecMode::Batched)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        let err = router
            .count("thing", json!({"match_all": {}}), None, ExecMode::Batched)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        let err = router
            .suggest("thing", "text_suggest", "a", None, None, ExecMode::Batched)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        assert_eq!(engine.total_calls(), 0);
        assert_eq!(router.pending_queries(), 0);
    }

    #[test]
    fn test_batched_count_and_suggest() {
        let (engine, router) = router();
        engine
            .index("thing", "1", &json!({"kind": "w", "text_suggest": "Widget"}))
            .unwrap();
        engine
            .index("thing", "2", &json!({"kind": "w", "text_suggest": "Wand"}))
            .unwrap();

        router
            .count("thing", json!({"term": {"kind": "w"}}), Some("n"), ExecMode::Batched)
            .unwrap();
        router
            .suggest("thing", "text_suggest", "wi", None, Some("s"), ExecMode::Batched)
            .unwrap();
        let results = router.batch_query().unwrap();

        assert_eq!(results["n"], json!(2));
        assert_eq!(results["s"], json!([{"kind": "w", "text_suggest": "Widget"}]));
    }

    #[test]
    fn test_immediate_count_and_query() {
        let (engine, router) = router();
        engine.index("thing", "1", &json!({"kind": "w"})).unwrap();

        let count = router
            .count("thing", json!({"match_all": {}}), None, ExecMode::Immediate)
            .unwrap();
        assert_eq!(count, Some(1));

        let first = router
            .query(
                "thing",
                json!({"query": {"term": {"kind": "w"}}}),
                None,
                TransformOptions::first_hit().with_ids(),
                ExecMode::Immediate,
            )
            .unwrap();
        assert_eq!(first, Some(json!({"kind": "w", "uid": "1"})));
    }

    #[test]
    fn test_batched_get_keyed_by_id() {
        let (engine, router) = router();
        engine.index("thing", "1", &json!({"n": 1})).unwrap();

        router.get("thing", "1", Map::new(), ExecMode::Batched).unwrap();
        router.get("thing", "2", Map::new(), ExecMode::Batched).unwrap();
        assert_eq!(router.pending_gets(), 2);

        let results = router.batch_get().unwrap();
        assert_eq!(results["1"], Some(json!({"n": 1})));
        assert_eq!(results["2"], None);
        assert_eq!(engine.call_count(EngineOp::Mget), 1);
    }

    #[test]
    fn test_script_update_both_modes() {
        let (engine, router) = router();
        engine.index("thing", "1", &json!({"n": 1})).unwrap();
        let mut params = Document::new();
        params.insert("by".into(), json!(5));
        let script = ScriptSpec::new("ctx._source.n += params.by").with_params(params);

        router
            .script_update("thing", "1", &script, ExecMode::Immediate)
            .unwrap();
        router
            .script_update("thing", "1", &script, ExecMode::Batched)
            .unwrap();
        router.batch_write().unwrap();
        assert_eq!(engine.document("thing", "1").unwrap()["n"], json!(11));
    }

    #[test]
    fn test_delete_by_query_passthrough() {
        let (engine, router) = router();
        engine.index("thing", "1", &json!({"old": true})).unwrap();
        engine.index("thing", "2", &json!({"old": false})).unwrap();
        router
            .delete_by_query("thing", &json!({"term": {"old": true}}))
            .unwrap();
        router.refresh_index("thing").unwrap();
        assert_eq!(engine.doc_count("thing"), 1);
    }
}
