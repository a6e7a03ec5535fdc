//! Domain models
//!
//! Intents are plain data: they are built by the routers, owned by a queue
//! until commit, and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Result, StoreError};

/// A document body (always a JSON object)
pub type Document = Map<String, Value>;

/// Mapping type reported when an index declares none
pub const DEFAULT_DOC_TYPE: &str = "_doc";

/// Epoch milliseconds, the unit of every `*_time` stamp this crate writes
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ═══════════════════════════════════════════════════════════════════════════
// Execution Mode
// ═══════════════════════════════════════════════════════════════════════════

/// Whether an operation runs now or joins the pending batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    #[default]
    Immediate,
    Batched,
}

impl ExecMode {
    pub fn from_batch(batch: bool) -> Self {
        if batch {
            ExecMode::Batched
        } else {
            ExecMode::Immediate
        }
    }

    pub fn is_batched(self) -> bool {
        self == ExecMode::Batched
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Write Intents
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of pending write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Index,
    Create,
    Update,
    Upsert,
    ScriptUpdate,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Index => "index",
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Upsert => "upsert",
            OpKind::ScriptUpdate => "script_update",
            OpKind::Delete => "delete",
        }
    }

    /// Action verb on the bulk wire (upserts and scripts are updates)
    pub fn bulk_verb(&self) -> &'static str {
        match self {
            OpKind::Index => "index",
            OpKind::Create => "create",
            OpKind::Update | OpKind::Upsert | OpKind::ScriptUpdate => "update",
            OpKind::Delete => "delete",
        }
    }
}

/// Inline script for scripted updates
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSpec {
    pub source: String,
    pub params: Option<Document>,
    /// Document stored when the target does not exist yet
    pub initial: Option<Document>,
}

impl ScriptSpec {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            params: None,
            initial: None,
        }
    }

    pub fn with_params(mut self, params: Document) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_initial(mut self, initial: Document) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Update body: `{script: {source, params?}, upsert?}`
    pub fn to_body(&self) -> Value {
        let mut script = Map::new();
        script.insert("source".into(), Value::String(self.source.clone()));
        if let Some(params) = self.params.as_ref().filter(|p| !p.is_empty()) {
            script.insert("params".into(), Value::Object(params.clone()));
        }

        let mut body = Map::new();
        body.insert("script".into(), Value::Object(script));
        if let Some(initial) = self.initial.as_ref().filter(|i| !i.is_empty()) {
            body.insert("upsert".into(), Value::Object(initial.clone()));
        }
        Value::Object(body)
    }
}

/// One pending bulk action
///
/// `payload` is already in the shape the engine applies for `kind`:
/// the source for index/create, `{doc}` for update, `{doc, doc_as_upsert}`
/// for upsert, `{script, upsert?}` for scripted updates, null for delete.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteIntent {
    pub kind: OpKind,
    pub index: String,
    pub id: String,
    pub payload: Value,
    pub parent: Option<String>,
}

impl WriteIntent {
    fn new(kind: OpKind, index: &str, id: &str, payload: Value) -> Self {
        Self {
            kind,
            index: index.to_string(),
            id: id.to_string(),
            payload,
            parent: None,
        }
    }

    pub fn index(index: &str, id: &str, doc: Document) -> Self {
        Self::new(OpKind::Index, index, id, Value::Object(doc))
    }

    pub fn create(index: &str, id: &str, doc: Document) -> Self {
        Self::new(OpKind::Create, index, id, Value::Object(doc))
    }

    pub fn update(index: &str, id: &str, doc: Document) -> Self {
        Self::new(OpKind::Update, index, id, json!({ "doc": doc }))
    }

    pub fn upsert(index: &str, id: &str, doc: Document) -> Self {
        Self::new(
            OpKind::Upsert,
            index,
            id,
            json!({ "doc": doc, "doc_as_upsert": true }),
        )
    }

    pub fn script_update(index: &str, id: &str, script: &ScriptSpec) -> Self {
        Self::new(OpKind::ScriptUpdate, index, id, script.to_body())
    }

    pub fn delete(index: &str, id: &str) -> Self {
        Self::new(OpKind::Delete, index, id, Value::Null)
    }

    /// Route to the parent's shard (ignored for deletes)
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        if self.kind != OpKind::Delete {
            self.parent = Some(parent.into());
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bulk Results
// ═══════════════════════════════════════════════════════════════════════════

/// Per-item outcome of a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub op: OpKind,
    pub index: String,
    pub id: String,
    /// HTTP-like status (200/201 ok, 404 missing, 409 conflict, ...)
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(intent: &WriteIntent, status: u16) -> Self {
        Self {
            op: intent.kind,
            index: intent.index.clone(),
            id: intent.id.clone(),
            status,
            error: None,
        }
    }

    pub fn failed(intent: &WriteIntent, status: u16, error: impl Into<String>) -> Self {
        Self {
            op: intent.kind,
            index: intent.index.clone(),
            id: intent.id.clone(),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered results of one bulk commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub items: Vec<BulkItemResult>,
}

impl BulkOutcome {
    pub fn new(items: Vec<BulkItemResult>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }

    pub fn failures(&self) -> Vec<&BulkItemResult> {
        self.items.iter().filter(|item| !item.is_ok()).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|item| !item.is_ok())
    }

    /// Aggregate item failures into one `BulkItems` error
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failures().len();
        if failed > 0 {
            return Err(StoreError::bulk_items(failed, self.items.len()));
        }
        Ok(self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Alias Membership
// ═══════════════════════════════════════════════════════════════════════════

/// One physical index behind an alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalIndexInfo {
    pub index: String,
    pub is_write_index: bool,
    pub doc_type: String,
}

/// An alias and its current members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasDescriptor {
    pub alias: String,
    pub members: Vec<PhysicalIndexInfo>,
}

const RESERVED_MAPPING_KEYS: &[&str] = &[
    "properties",
    "dynamic",
    "dynamic_templates",
    "_source",
    "_meta",
    "_routing",
];

impl AliasDescriptor {
    /// Parse a get-index response keyed by physical index name:
    /// `{index: {aliases: {alias: {is_write_index}}, mappings: {...}}}`
    pub fn from_index_response(alias: &str, response: &Value) -> Result<Self> {
        let indices = response.as_object().ok_or_else(|| {
            StoreError::serialization(format!("get-index response for '{}' is not an object", alias))
        })?;

        let members = indices
            .iter()
            .map(|(index, info)| {
                let is_write_index = info
                    .get("aliases")
                    .and_then(|aliases| aliases.get(alias))
                    .and_then(|entry| entry.get("is_write_index"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let doc_type = info
                    .get("mappings")
                    .and_then(Value::as_object)
                    .and_then(|mappings| {
                        mappings
                            .keys()
                            .find(|key| !RESERVED_MAPPING_KEYS.contains(&key.as_str()))
                            .cloned()
                    })
                    .unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string());
                PhysicalIndexInfo {
                    index: index.clone(),
                    is_write_index,
                    doc_type,
                }
            })
            .collect();

        Ok(Self {
            alias: alias.to_string(),
            members,
        })
    }

    pub fn write_index(&self) -> Option<&PhysicalIndexInfo> {
        self.members.iter().find(|member| member.is_write_index)
    }

    /// First member without the write flag
    pub fn archive_index(&self) -> Option<&PhysicalIndexInfo> {
        self.members.iter().find(|member| !member.is_write_index)
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.index.as_str()).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Scroll
// ═══════════════════════════════════════════════════════════════════════════

/// One page of a scroll; an empty page ends the scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub hits: Vec<Value>,
}
