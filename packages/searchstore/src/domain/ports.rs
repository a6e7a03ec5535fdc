//! Engine Ports (Trait Interfaces)
//!
//! Port/Adapter pattern for backend flexibility:
//! - Production: a network client for the document engine
//! - Testing / embedding: `InMemoryEngine`
//!
//! Every call is blocking from the caller's point of view. Request and
//! response bodies follow the engine's JSON wire contract; only the bulk
//! write path is typed because its items are built here.

use serde_json::{Map, Value};

use super::models::{BulkItemResult, ScrollPage, WriteIntent};
use crate::error::Result;

/// Document Engine Port (Primary Interface)
///
/// All engine backends must implement this trait
pub trait SearchEngine: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Single Documents
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a document; fails with `Conflict` if the id exists
    fn create(&self, index: &str, id: &str, doc: &Value) -> Result<Value>;

    /// Create or replace a document
    fn index(&self, index: &str, id: &str, doc: &Value) -> Result<Value>;

    /// Apply an update body (`{doc}`, `{doc, doc_as_upsert}`, `{script, upsert?}`)
    fn update(&self, index: &str, id: &str, body: &Value) -> Result<Value>;

    /// Delete a document; fails with `NotFound` if absent
    fn delete(&self, index: &str, id: &str) -> Result<Value>;

    /// Get response (`{_index, _id, found, _source}`), `None` when absent
    fn get(&self, index: &str, id: &str, params: &Map<String, Value>) -> Result<Option<Value>>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Search
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Search response page (`{hits: {total, hits}, suggest?, profile?}`).
    /// `profile: true` in the body requests a per-shard `profile` section.
    fn search(&self, index: &str, body: &Value) -> Result<Value>;

    /// Count response (`{count}`)
    fn count(&self, index: &str, body: &Value) -> Result<Value>;

    /// How `body.query` matches one document: `{_index, _id, matched, explanation?}`
    fn explain(&self, index: &str, id: &str, body: &Value) -> Result<Value>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Consolidated Calls
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// One physical bulk request; per-item results in request order
    fn bulk(&self, actions: &[WriteIntent]) -> Result<Vec<BulkItemResult>>;

    /// Alternating `[{index}, body, {index}, body, ...]`, answered with
    /// `{responses: [...]}` in request order
    fn msearch(&self, body: &[Value]) -> Result<Value>;

    /// `{docs: [{_index, _id, ...}]}`, answered with `{docs: [...]}` in
    /// request order
    fn mget(&self, body: &Value) -> Result<Value>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Maintenance
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `{source: {index, query?}, dest: {index}, conflicts?}`
    fn reindex(&self, body: &Value) -> Result<Value>;

    /// `{query}` applied to `index`
    fn delete_by_query(&self, index: &str, body: &Value) -> Result<Value>;

    /// Make recent writes visible to search
    fn refresh(&self, index: &str) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scroll
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn open_scroll(&self, index: &str, body: &Value, size: usize, keep_alive: &str)
        -> Result<ScrollPage>;

    fn next_scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage>;

    fn clear_scroll(&self, scroll_id: &str) -> Result<()>;
}

/// Index administration port (alias resolution)
pub trait IndexAdmin: Send + Sync {
    /// Get-index response for a name or alias, keyed by physical index:
    /// `{index: {aliases: {alias: {is_write_index?}}, mappings, settings}}`
    fn get_index(&self, name: &str) -> Result<Value>;
}
