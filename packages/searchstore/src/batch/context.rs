//! Write, get and query batches behind one surface

use std::collections::HashMap;

use serde_json::Value;

use super::action_queue::ActionQueue;
use super::get_batch::{GetBatch, GetIntent};
use super::query_batch::QueryBatch;
use crate::config::BulkConfig;
use crate::domain::{BulkOutcome, SearchEngine, WriteIntent};
use crate::error::Result;
use crate::transform::Transform;

/// Owns one queue of each kind
#[derive(Debug, Default)]
pub struct BatchExecutionContext {
    writes: ActionQueue,
    gets: GetBatch,
    queries: QueryBatch,
    bulk: BulkConfig,
}

impl BatchExecutionContext {
    pub fn new(bulk: BulkConfig) -> Self {
        Self {
            bulk,
            ..Self::default()
        }
    }

    pub fn bulk_config(&self) -> BulkConfig {
        self.bulk
    }

    pub fn enqueue_write(&self, intent: WriteIntent) {
        self.writes.enqueue(intent);
    }

    pub fn register_get(&self, key: impl Into<String>, intent: GetIntent) {
        self.gets.register(key, intent);
    }

    pub fn register_query(
        &self,
        key: impl Into<String>,
        index: impl Into<String>,
        body: Value,
        transform: Option<Transform>,
    ) {
        self.queries.register(key, index, body, transform);
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub fn pending_gets(&self) -> usize {
        self.gets.len()
    }

    pub fn pending_queries(&self) -> usize {
        self.queries.len()
    }

    /// Commit pending writes with the configured bulk tuning
    pub fn batch_write(&self, engine: &dyn SearchEngine) -> Result<BulkOutcome> {
        self.writes.commit(engine, self.bulk)
    }

    /// Commit pending writes with explicit bulk tuning
    pub fn batch_write_with(&self, engine: &dyn SearchEngine, bulk: BulkConfig) -> Result<BulkOutcome> {
        self.writes.commit(engine, bulk)
    }

    pub fn batch_get(&self, engine: &dyn SearchEngine) -> Result<HashMap<String, Option<Value>>> {
        self.gets.commit(engine)
    }

    pub fn batch_query(&self, engine: &dyn SearchEngine) -> Result<HashMap<String, Value>> {
        self.queries.commit(engine)
    }
}
