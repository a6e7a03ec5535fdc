//! Synchronous execution against the engine

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::batch::found_source;
use crate::domain::{OpKind, SearchEngine, WriteIntent};
use crate::error::{Result, StoreError};
use crate::response;
use crate::transform::{self, Transform};

/// Suggestion name used for one-off completion requests
pub const IMMEDIATE_SUGGEST_KEY: &str = "suggest-key";

/// Completion suggestion body `{suggest: {key: {prefix, completion}}}`
pub fn suggest_body(key: &str, field: &str, prefix: &str, contexts: Option<&Value>) -> Value {
    let mut completion = Map::new();
    completion.insert("field".into(), json!(field));
    if let Some(contexts) = contexts {
        completion.insert("contexts".into(), contexts.clone());
    }
    let mut suggestion = Map::new();
    suggestion.insert(
        key.to_string(),
        json!({ "prefix": prefix, "completion": completion }),
    );
    json!({ "suggest": suggestion })
}

/// Runs every operation as its own engine call
#[derive(Clone)]
pub struct ImmediateStore {
    engine: Arc<dyn SearchEngine>,
}

impl ImmediateStore {
    pub fn new(engine: Arc<dyn SearchEngine>) -> Self {
        Self { engine }
    }

    /// Execute one write. Parent-routed writes go through a single-item
    /// bulk request since only the bulk path carries routing.
    pub fn write(&self, intent: &WriteIntent) -> Result<Value> {
        debug!(op = intent.kind.as_str(), index = %intent.index, id = %intent.id, "Immediate write");
        if intent.parent.is_some() {
            return self.write_routed(intent);
        }
        match intent.kind {
            OpKind::Index => self.engine.index(&intent.index, &intent.id, &intent.payload),
            OpKind::Create => self.engine.create(&intent.index, &intent.id, &intent.payload),
            OpKind::Update | OpKind::Upsert | OpKind::ScriptUpdate => {
                self.engine.update(&intent.index, &intent.id, &intent.payload)
            }
            OpKind::Delete => self.engine.delete(&intent.index, &intent.id),
        }
    }

    fn write_routed(&self, intent: &WriteIntent) -> Result<Value> {
        let item = self
            .engine
            .bulk(std::slice::from_ref(intent))?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::serialization("bulk response has no items"))?;
        match item.error {
            Some(error) => Err(StoreError::engine(item.status, error)),
            None => Ok(json!({
                "_index": item.index,
                "_id": item.id,
                "status": item.status,
            })),
        }
    }

    /// Document source, `None` when the document or its index is missing
    pub fn get(&self, index: &str, id: &str, params: &Map<String, Value>) -> Result<Option<Value>> {
        match self.engine.get(index, id, params) {
            Ok(Some(response)) => Ok(found_source(&response)),
            Ok(None) => Ok(None),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn query(&self, index: &str, body: &Value, transform: Option<&Transform>) -> Result<Value> {
        let result = self.engine.search(index, body)?;
        Ok(transform::apply(transform, result))
    }

    pub fn count(&self, index: &str, body: &Value) -> Result<u64> {
        let result = self.engine.count(index, body)?;
        Ok(result.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    pub fn suggest(
        &self,
        index: &str,
        field: &str,
        prefix: &str,
        contexts: Option<&Value>,
    ) -> Result<Vec<Value>> {
        let body = suggest_body(IMMEDIATE_SUGGEST_KEY, field, prefix, contexts);
        let result = self.engine.search(index, &body)?;
        Ok(response::suggest_options(&result, IMMEDIATE_SUGGEST_KEY))
    }

    /// `profile` section of a profiled search. With `no_source` the hits
    /// carry no `_source`.
    pub fn profile(&self, index: &str, body: &Value, no_source: bool) -> Result<Value> {
        let mut body = body
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::validation("profile body must be an object"))?;
        body.insert("profile".into(), json!(true));
        if no_source {
            body.insert("_source".into(), json!(""));
        }
        let result = self.engine.search(index, &Value::Object(body))?;
        Ok(result.get("profile").cloned().unwrap_or(Value::Null))
    }

    pub fn explain(&self, index: &str, id: &str, body: &Value) -> Result<Value> {
        self.engine.explain(index, id, body)
    }

    pub fn delete_by_query(&self, index: &str, query: &Value) -> Result<Value> {
        self.engine.delete_by_query(index, &json!({ "query": query }))
    }

    pub fn reindex(&self, body: &Value) -> Result<Value> {
        self.engine.reindex(body)
    }

    pub fn refresh_index(&self, index: &str) -> Result<()> {
        self.engine.refresh(index)
    }
}
