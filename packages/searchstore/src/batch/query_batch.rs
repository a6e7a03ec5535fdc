//! Keyed queries committed as one multi-search call

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::correlated::CorrelatedRequestMap;
use crate::domain::SearchEngine;
use crate::error::{Result, StoreError};
use crate::transform::{self, Transform};

/// A registered query
#[derive(Clone)]
pub struct QueryIntent {
    pub index: String,
    pub body: Value,
    pub transform: Option<Transform>,
}

impl fmt::Debug for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryIntent")
            .field("index", &self.index)
            .field("body", &self.body)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct QueryBatch {
    pending: Mutex<CorrelatedRequestMap<QueryIntent>>,
}

impl QueryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `key`; an existing registration is replaced
    pub fn register(
        &self,
        key: impl Into<String>,
        index: impl Into<String>,
        body: Value,
        transform: Option<Transform>,
    ) {
        let key = key.into();
        let intent = QueryIntent {
            index: index.into(),
            body,
            transform,
        };
        debug!(key = %key, index = %intent.index, "Query registered");
        if self.pending.lock().insert(key.clone(), intent).is_some() {
            debug!(key = %key, "Query key overwritten");
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Run every pending query in one multi-search and return each key's
    /// (transformed) response. Pending queries are cleared even on failure.
    pub fn commit(&self, engine: &dyn SearchEngine) -> Result<HashMap<String, Value>> {
        let captured = std::mem::take(&mut *self.pending.lock());
        if captured.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Instant::now();
        let entries = captured.into_entries();
        let mut body = Vec::with_capacity(entries.len() * 2);
        for (_, intent) in &entries {
            body.push(json!({ "index": intent.index }));
            body.push(intent.body.clone());
        }

        let response = engine.msearch(&body)?;
        let responses = match response.get("responses") {
            Some(Value::Array(responses)) => responses.clone(),
            _ => {
                return Err(StoreError::serialization(
                    "multi-search response has no 'responses' array",
                ))
            }
        };
        if responses.len() != entries.len() {
            return Err(StoreError::serialization(format!(
                "multi-search returned {} responses for {} queries",
                responses.len(),
                entries.len()
            )));
        }

        let results: HashMap<String, Value> = entries
            .into_iter()
            .zip(responses)
            .map(|((key, intent), response)| {
                if let Some(error) = response.get("error") {
                    warn!(key = %key, index = %intent.index, error = %error, "Query failed inside multi-search");
                    return (key, response);
                }
                let value = transform::apply(intent.transform.as_ref(), response);
                (key, value)
            })
            .collect();

        info!(
            queries = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Multi-search commit complete"
        );
        Ok(results)
    }
}
