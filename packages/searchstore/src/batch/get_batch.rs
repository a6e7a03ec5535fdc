//! Keyed point lookups committed as one multi-get call

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::correlated::CorrelatedRequestMap;
use crate::domain::SearchEngine;
use crate::error::{Result, StoreError};

/// A registered lookup
#[derive(Debug, Clone, PartialEq)]
pub struct GetIntent {
    pub index: String,
    pub id: String,
    /// Extra per-doc parameters (`_source`, `stored_fields`, ...)
    pub params: Map<String, Value>,
    pub parent: Option<String>,
}

impl GetIntent {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            params: Map::new(),
            parent: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    fn to_doc_spec(&self) -> Value {
        let mut spec = Map::new();
        spec.insert("_index".into(), Value::String(self.index.clone()));
        spec.insert("_id".into(), Value::String(self.id.clone()));
        if let Some(parent) = &self.parent {
            spec.insert("routing".into(), Value::String(parent.clone()));
        }
        for (name, value) in &self.params {
            spec.insert(name.clone(), value.clone());
        }
        Value::Object(spec)
    }
}

/// Source of a multi-get entry, `None` unless found without error
pub fn found_source(entry: &Value) -> Option<Value> {
    let found = entry.get("found").and_then(Value::as_bool) == Some(true);
    if found && entry.get("error").is_none() {
        Some(entry.get("_source").cloned().unwrap_or(Value::Null))
    } else {
        None
    }
}

#[derive(Debug, Default)]
pub struct GetBatch {
    pending: Mutex<CorrelatedRequestMap<GetIntent>>,
}

impl GetBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `key`; an existing registration is replaced
    pub fn register(&self, key: impl Into<String>, intent: GetIntent) {
        let key = key.into();
        debug!(key = %key, index = %intent.index, id = %intent.id, "Get registered");
        self.pending.lock().insert(key, intent);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Fetch every pending lookup in one multi-get. Pending lookups are
    /// cleared even on failure.
    pub fn commit(&self, engine: &dyn SearchEngine) -> Result<HashMap<String, Option<Value>>> {
        let captured = std::mem::take(&mut *self.pending.lock());
        if captured.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Instant::now();
        let entries = captured.into_entries();
        let docs: Vec<Value> = entries.iter().map(|(_, intent)| intent.to_doc_spec()).collect();
        let mut request = Map::new();
        request.insert("docs".into(), Value::Array(docs));

        let response = engine.mget(&Value::Object(request))?;
        let docs = response
            .get("docs")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::serialization("multi-get response has no 'docs' array"))?;
        if docs.len() != entries.len() {
            return Err(StoreError::serialization(format!(
                "multi-get returned {} docs for {} lookups",
                docs.len(),
                entries.len()
            )));
        }

        let results: HashMap<String, Option<Value>> = entries
            .into_iter()
            .zip(docs)
            .map(|((key, _), entry)| (key, found_source(entry)))
            .collect();

        info!(
            gets = results.len(),
            found = results.values().filter(|v| v.is_some()).count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Multi-get commit complete"
        );
        Ok(results)
    }
}


#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::domain::WriteIntent;
    use crate::infrastructure::{EngineOp, InMemoryEngine};
    use serde_json::json;

    #[test]
    fn test_commit_maps_found_and_missing() {
        let engine = InMemoryEngine::new();
        let doc = json!({"name": "a"}).as_object().cloned().unwrap();
        engine.bulk(&[WriteIntent::index("thing", "a", doc)]).unwrap();

        let batch = GetBatch::new();
        batch.register("a", GetIntent::new("thing", "a"));
        batch.register("zz", GetIntent::new("thing", "zz"));

        let results = batch.commit(&engine).unwrap();
        assert_eq!(results["a"], Some(json!({"name": "a"})));
        assert_eq!(results["zz"], None);
        assert_eq!(engine.call_count(EngineOp::Mget), 1);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_empty_commit_makes_no_call() {
        let engine = InMemoryEngine::new();
        assert!(GetBatch::new().commit(&engine).unwrap().is_empty());
        assert_eq!(engine.call_count(EngineOp::Mget), 0);
    }

    #[test]
    fn test_failure_still_clears() {
        let engine = InMemoryEngine::new();
        let batch = GetBatch::new();
        batch.register("a", GetIntent::new("thing", "a"));
        engine.fail_next(EngineOp::Mget);
        assert!(batch.commit(&engine).is_err());
        assert_eq!(batch.len(), 0);
    }
}
