//! In-Memory Document Engine
//!
//! BTreeMap-backed implementation of the engine ports for tests and
//! embedding. NOT a production engine: no scoring, no analysis beyond
//! lowercase word tokens, every write is visible to search immediately.
//!
//! Hits come back in `_id` order unless the request sorts.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::query_eval::{self, compare_by_keys, filter_source, in_slice, sort_keys};
use crate::domain::{
    BulkItemResult, Document, IndexAdmin, OpKind, ScrollPage, SearchEngine, WriteIntent,
    DEFAULT_DOC_TYPE,
};
use crate::error::{ErrorKind, Result, StoreError};

const DEFAULT_SEARCH_SIZE: usize = 10;
const DEFAULT_SUGGEST_SIZE: usize = 5;

/// Engine operations, used for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Create,
    Index,
    Update,
    Delete,
    Get,
    Search,
    Count,
    Explain,
    Bulk,
    Msearch,
    Mget,
    Reindex,
    DeleteByQuery,
    Refresh,
    OpenScroll,
    NextScroll,
    ClearScroll,
    GetIndex,
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    mappings: Value,
    settings: Value,
    /// alias -> is_write_index
    aliases: BTreeMap<String, bool>,
    docs: BTreeMap<String, Document>,
}

#[derive(Debug, Default)]
struct EngineState {
    indices: BTreeMap<String, IndexState>,
}

/// One matching document
#[derive(Debug, Clone)]
struct Candidate {
    index: String,
    id: String,
    source: Document,
}

impl Candidate {
    fn to_hit(&self, source_filter: Option<&Value>) -> Value {
        let mut hit = Map::new();
        hit.insert("_index".into(), json!(self.index));
        hit.insert("_type".into(), json!(DEFAULT_DOC_TYPE));
        hit.insert("_id".into(), json!(self.id));
        hit.insert("_score".into(), json!(1.0));
        if let Some(source) = filter_source(&self.source, source_filter) {
            hit.insert("_source".into(), source);
        }
        Value::Object(hit)
    }
}

#[derive(Debug)]
struct ScrollCursor {
    hits: Vec<Value>,
    position: usize,
    size: usize,
}

/// Per-item outcome before conversion to the bulk or single-doc shape
struct Applied {
    index: String,
    status: u16,
    result: &'static str,
}

#[derive(Clone, Default)]
pub struct InMemoryEngine {
    state: Arc<RwLock<EngineState>>,
    scrolls: Arc<DashMap<String, ScrollCursor>>,
    calls: Arc<DashMap<EngineOp, usize>>,
    failures: Arc<DashMap<EngineOp, usize>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Test Instrumentation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn call_count(&self, op: EngineOp) -> usize {
        self.calls.get(&op).map(|count| *count).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    pub fn reset_counts(&self) {
        self.calls.clear();
    }

    /// Make the next call of `op` fail with a transport error
    pub fn fail_next(&self, op: EngineOp) {
        *self.failures.entry(op).or_insert(0) += 1;
    }

    fn enter(&self, op: EngineOp) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(mut pending) = self.failures.get_mut(&op) {
            if *pending > 0 {
                *pending -= 1;
                return Err(StoreError::transport(format!("injected failure for {:?}", op)));
            }
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Index Administration
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create an index from a `{mappings, settings}` body
    pub fn create_index(&self, name: &str, body: &Value) -> Result<()> {
        let mut state = self.state.write();
        if state.indices.contains_key(name) {
            return Err(StoreError::engine(
                400,
                format!("resource_already_exists_exception: index [{}] already exists", name),
            ));
        }
        if Self::alias_members(&state, name).next().is_some() {
            return Err(StoreError::engine(
                400,
                format!("invalid_index_name_exception: [{}] is an alias", name),
            ));
        }
        state.indices.insert(
            name.to_string(),
            IndexState {
                mappings: body.get("mappings").cloned().unwrap_or_else(|| json!({})),
                settings: body.get("settings").cloned().unwrap_or_else(|| json!({})),
                ..IndexState::default()
            },
        );
        debug!(index = name, "Index created");
        Ok(())
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.state
            .write()
            .indices
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::index_not_found(name))
    }

    /// Point `alias` at `index`; a write flag moves the alias's write role
    /// to this index
    pub fn add_alias(&self, index: &str, alias: &str, is_write_index: bool) -> Result<()> {
        let mut state = self.state.write();
        if !state.indices.contains_key(index) {
            return Err(Self::index_not_found(index));
        }
        if is_write_index {
            for other in state.indices.values_mut() {
                if let Some(flag) = other.aliases.get_mut(alias) {
                    *flag = false;
                }
            }
        }
        if let Some(target) = state.indices.get_mut(index) {
            target.aliases.insert(alias.to_string(), is_write_index);
        }
        Ok(())
    }

    pub fn remove_alias(&self, index: &str, alias: &str) -> Result<()> {
        let mut state = self.state.write();
        let target = state
            .indices
            .get_mut(index)
            .ok_or_else(|| Self::index_not_found(index))?;
        target
            .aliases
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("aliases [{}] missing", alias)))
    }

    /// Number of documents behind an index or alias
    pub fn doc_count(&self, name: &str) -> usize {
        let state = self.state.read();
        Self::resolve_read(&state, name)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|index| state.indices.get(index))
                    .map(|index| index.docs.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Raw source of one document in a physical index
    pub fn document(&self, index: &str, id: &str) -> Option<Document> {
        self.state
            .read()
            .indices
            .get(index)
            .and_then(|state| state.docs.get(id).cloned())
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state.read().indices.keys().cloned().collect()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Name Resolution
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn index_not_found(name: &str) -> StoreError {
        StoreError::not_found(format!("index_not_found_exception: no such index [{}]", name))
    }

    fn alias_members<'a>(
        state: &'a EngineState,
        alias: &'a str,
    ) -> impl Iterator<Item = (&'a String, bool)> + 'a {
        state
            .indices
            .iter()
            .filter_map(move |(name, index)| index.aliases.get(alias).map(|flag| (name, *flag)))
    }

    /// Physical indices behind a comma-separated list of names/aliases
    fn resolve_read(state: &EngineState, names: &str) -> Result<Vec<String>> {
        let mut resolved = Vec::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "_all" || name == "*" {
                resolved.extend(state.indices.keys().cloned());
            } else if state.indices.contains_key(name) {
                resolved.push(name.to_string());
            } else {
                let members: Vec<String> = Self::alias_members(state, name)
                    .map(|(index, _)| index.clone())
                    .collect();
                if members.is_empty() {
                    return Err(Self::index_not_found(name));
                }
                resolved.extend(members);
            }
        }
        resolved.sort();
        resolved.dedup();
        Ok(resolved)
    }

    /// Physical index a write to `name` lands in; unknown names are
    /// auto-created as indices
    fn resolve_write(state: &mut EngineState, name: &str) -> Result<String> {
        if state.indices.contains_key(name) {
            return Ok(name.to_string());
        }
        let members: Vec<(String, bool)> = Self::alias_members(state, name)
            .map(|(index, flag)| (index.clone(), flag))
            .collect();
        if members.is_empty() {
            state.indices.insert(name.to_string(), IndexState::default());
            return Ok(name.to_string());
        }
        if let Some((index, _)) = members.iter().find(|(_, flag)| *flag) {
            return Ok(index.clone());
        }
        if members.len() == 1 {
            return Ok(members[0].0.clone());
        }
        Err(StoreError::engine(
            400,
            format!(
                "illegal_argument_exception: no write index is defined for alias [{}]",
                name
            ),
        ))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn apply_write(state: &mut EngineState, intent: &WriteIntent) -> Result<Applied> {
        let index = Self::resolve_write(state, &intent.index)?;
        let docs = &mut state
            .indices
            .get_mut(&index)
            .ok_or_else(|| Self::index_not_found(&index))?
            .docs;
        let exists = docs.contains_key(&intent.id);

        let (status, result) = match intent.kind {
            OpKind::Index => {
                docs.insert(intent.id.clone(), as_document(&intent.payload)?);
                if exists {
                    (200, "updated")
                } else {
                    (201, "created")
                }
            }
            OpKind::Create => {
                if exists {
                    return Err(StoreError::engine(
                        409,
                        format!(
                            "version_conflict_engine_exception: [{}]: document already exists",
                            intent.id
                        ),
                    ));
                }
                docs.insert(intent.id.clone(), as_document(&intent.payload)?);
                (201, "created")
            }
            OpKind::Update | OpKind::Upsert | OpKind::ScriptUpdate => {
                apply_update(docs, &intent.id, &intent.payload)?
            }
            OpKind::Delete => {
                if docs.remove(&intent.id).is_none() {
                    return Err(StoreError::engine(
                        404,
                        format!("not_found: [{}] not found", intent.id),
                    ));
                }
                (200, "deleted")
            }
        };
        Ok(Applied {
            index,
            status,
            result,
        })
    }

    fn single_write(&self, op: EngineOp, intent: WriteIntent) -> Result<Value> {
        self.enter(op)?;
        let mut state = self.state.write();
        let applied = Self::apply_write(&mut state, &intent)?;
        Ok(json!({
            "_index": applied.index,
            "_type": DEFAULT_DOC_TYPE,
            "_id": intent.id,
            "result": applied.result,
            "status": applied.status,
        }))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn collect_matches(state: &EngineState, name: &str, body: &Value) -> Result<Vec<Candidate>> {
        let indices = Self::resolve_read(state, name)?;
        let query = body.get("query").cloned().unwrap_or_else(|| json!({"match_all": {}}));
        let slice = body.get("slice");

        let mut candidates = Vec::new();
        for index in indices {
            let Some(index_state) = state.indices.get(&index) else {
                continue;
            };
            for (id, source) in &index_state.docs {
                if let Some(slice) = slice {
                    if !in_slice(id, slice) {
                        continue;
                    }
                }
                if query_eval::matches(&query, id, source)? {
                    candidates.push(Candidate {
                        index: index.clone(),
                        id: id.clone(),
                        source: source.clone(),
                    });
                }
            }
        }

        let keys = sort_keys(body.get("sort"))?;
        if !keys.is_empty() {
            candidates.sort_by(|a, b| {
                compare_by_keys(&keys, (a.id.as_str(), &a.source), (b.id.as_str(), &b.source))
            });
        }
        Ok(candidates)
    }

    fn search_internal(state: &EngineState, name: &str, body: &Value) -> Result<Value> {
        let candidates = Self::collect_matches(state, name, body)?;
        let total = candidates.len();
        let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = body
            .get("size")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_SEARCH_SIZE);
        let source_filter = body.get("_source");

        let hits: Vec<Value> = candidates
            .iter()
            .skip(from)
            .take(size)
            .map(|candidate| candidate.to_hit(source_filter))
            .collect();

        let mut response = json!({
            "took": 0,
            "timed_out": false,
            "hits": {
                "total": {"value": total, "relation": "eq"},
                "max_score": if hits.is_empty() { Value::Null } else { json!(1.0) },
                "hits": hits,
            }
        });

        if let Some(suggest) = body.get("suggest").and_then(Value::as_object) {
            let indices = Self::resolve_read(state, name)?;
            let mut suggestions = Map::new();
            for (key, spec) in suggest {
                suggestions.insert(key.clone(), Self::complete(state, &indices, spec)?);
            }
            response["suggest"] = Value::Object(suggestions);
        }

        if body.get("profile").and_then(Value::as_bool) == Some(true) {
            response["profile"] = Self::profile_section(state, name, body)?;
        }
        Ok(response)
    }

    /// One zero-cost shard entry per searched index
    fn profile_section(state: &EngineState, name: &str, body: &Value) -> Result<Value> {
        let query = body.get("query").cloned().unwrap_or_else(|| json!({"match_all": {}}));
        let query_type = query
            .as_object()
            .and_then(|clause| clause.keys().next())
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let shards: Vec<Value> = Self::resolve_read(state, name)?
            .into_iter()
            .map(|index| {
                json!({
                    "id": format!("[memory][{}][0]", index),
                    "searches": [{
                        "query": [{
                            "type": query_type,
                            "description": query.to_string(),
                            "time_in_nanos": 0,
                            "children": [],
                        }],
                        "rewrite_time": 0,
                    }],
                })
            })
            .collect();
        Ok(json!({ "shards": shards }))
    }

    /// Completion suggestions for one `{prefix, completion: {field, contexts?, size?}}`
    fn complete(state: &EngineState, indices: &[String], spec: &Value) -> Result<Value> {
        let prefix = spec.get("prefix").and_then(Value::as_str).unwrap_or("");
        let completion = spec
            .get("completion")
            .ok_or_else(|| StoreError::engine(400, "suggestion requires [completion]"))?;
        let field = completion
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::engine(400, "completion requires [field]"))?;
        let contexts = completion.get("contexts").and_then(Value::as_object);
        let size = completion
            .get("size")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_SUGGEST_SIZE);
        let lowered = prefix.to_lowercase();

        let mut options = Vec::new();
        'docs: for index in indices {
            let Some(index_state) = state.indices.get(index) else {
                continue;
            };
            for (id, source) in &index_state.docs {
                let Some(value) = query_eval::field_value(source, field) else {
                    continue;
                };
                let (inputs, doc_contexts) = completion_inputs(value);
                if let Some(wanted) = contexts {
                    let satisfied = wanted.iter().all(|(name, values)| {
                        let have = doc_contexts.and_then(|c| c.get(name));
                        context_overlaps(have, values)
                    });
                    if !satisfied {
                        continue;
                    }
                }
                if let Some(text) = inputs
                    .iter()
                    .find(|input| input.to_lowercase().starts_with(&lowered))
                {
                    options.push(json!({
                        "text": text,
                        "_index": index,
                        "_type": DEFAULT_DOC_TYPE,
                        "_id": id,
                        "_score": 1.0,
                        "_source": source,
                    }));
                    if options.len() >= size {
                        break 'docs;
                    }
                }
            }
        }

        Ok(json!([{
            "text": prefix,
            "offset": 0,
            "length": prefix.chars().count(),
            "options": options,
        }]))
    }
}

fn as_document(value: &Value) -> Result<Document> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| StoreError::engine(400, "mapper_parsing_exception: source must be an object"))
}

/// Recursive merge of a partial `doc` into an existing source
fn merge_into(target: &mut Document, partial: &Document) {
    for (key, value) in partial {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge_into(existing, incoming),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn apply_update(
    docs: &mut BTreeMap<String, Document>,
    id: &str,
    payload: &Value,
) -> Result<(u16, &'static str)> {
    let missing = || {
        StoreError::engine(
            404,
            format!("document_missing_exception: [{}]: document missing", id),
        )
    };
    let upsert_source = payload.get("upsert").map(as_document).transpose()?;

    if let Some(script) = payload.get("script") {
        return match docs.get_mut(id) {
            Some(existing) => {
                run_script(existing, script)?;
                Ok((200, "updated"))
            }
            None => {
                let initial = upsert_source.ok_or_else(missing)?;
                docs.insert(id.to_string(), initial);
                Ok((201, "created"))
            }
        };
    }

    let partial = payload
        .get("doc")
        .map(as_document)
        .transpose()?
        .ok_or_else(|| StoreError::engine(400, "action_request_validation_exception: script or doc is missing"))?;
    let doc_as_upsert = payload
        .get("doc_as_upsert")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match docs.get_mut(id) {
        Some(existing) => {
            merge_into(existing, &partial);
            Ok((200, "updated"))
        }
        None if doc_as_upsert => {
            docs.insert(id.to_string(), partial);
            Ok((201, "created"))
        }
        None => {
            let initial = upsert_source.ok_or_else(missing)?;
            docs.insert(id.to_string(), initial);
            Ok((201, "created"))
        }
    }
}

/// Statements of the form `ctx._source.<path> (=|+=|-=) <operand>`,
/// separated by `;`. Operands: `params.<name>`, numbers, quoted strings,
/// `true`, `false`, `null`.
fn run_script(source: &mut Document, script: &Value) -> Result<()> {
    let (text, params) = match script {
        Value::String(text) => (text.as_str(), None),
        Value::Object(spec) => (
            spec.get("source").and_then(Value::as_str).unwrap_or(""),
            spec.get("params").and_then(Value::as_object),
        ),
        _ => return Err(script_error("script must be a string or object")),
    };

    for statement in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (target, operator, operand) = ["+=", "-=", "="]
            .iter()
            .find_map(|op| {
                statement
                    .split_once(op)
                    .map(|(lhs, rhs)| (lhs.trim(), *op, rhs.trim()))
            })
            .ok_or_else(|| script_error(format!("unsupported statement [{}]", statement)))?;
        let path = target
            .strip_prefix("ctx._source.")
            .ok_or_else(|| script_error(format!("unsupported target [{}]", target)))?;
        let value = script_operand(operand, params)?;

        let (parent, field) = match path.rsplit_once('.') {
            Some((parent, field)) => (Some(parent), field),
            None => (None, path),
        };
        let container = match parent {
            Some(parent_path) => object_at_path(&mut *source, parent_path)?,
            None => &mut *source,
        };

        let updated = match operator {
            "=" => value,
            op => {
                let current = container.get(field).and_then(Value::as_f64).unwrap_or(0.0);
                let delta = value
                    .as_f64()
                    .ok_or_else(|| script_error(format!("[{}] requires a number", op)))?;
                let result = if op == "+=" { current + delta } else { current - delta };
                number_value(result)
            }
        };
        container.insert(field.to_string(), updated);
    }
    Ok(())
}

fn script_error(message: impl Into<String>) -> StoreError {
    StoreError::engine(400, format!("script_exception: {}", message.into()))
}

fn script_operand(operand: &str, params: Option<&Map<String, Value>>) -> Result<Value> {
    if let Some(name) = operand.strip_prefix("params.") {
        return params
            .and_then(|p| p.get(name))
            .cloned()
            .ok_or_else(|| script_error(format!("missing param [{}]", name)));
    }
    if let Some(quoted) = operand
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| operand.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    {
        return Ok(Value::String(quoted.to_string()));
    }
    serde_json::from_str(operand).map_err(|_| script_error(format!("unsupported operand [{}]", operand)))
}

fn object_at_path<'a>(source: &'a mut Document, path: &str) -> Result<&'a mut Document> {
    let mut current = source;
    for part in path.split('.') {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry
            .as_object_mut()
            .ok_or_else(|| script_error(format!("[{}] is not an object", part)))?;
    }
    Ok(current)
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// Inputs and contexts of a completion field value
fn completion_inputs(value: &Value) -> (Vec<String>, Option<&Map<String, Value>>) {
    match value {
        Value::String(text) => (vec![text.clone()], None),
        Value::Array(items) => (
            items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            None,
        ),
        Value::Object(spec) => {
            let inputs = match spec.get("input") {
                Some(Value::String(text)) => vec![text.clone()],
                Some(Value::Array(items)) => {
                    items.iter().filter_map(Value::as_str).map(str::to_string).collect()
                }
                _ => Vec::new(),
            };
            (inputs, spec.get("contexts").and_then(Value::as_object))
        }
        _ => (Vec::new(), None),
    }
}

fn context_overlaps(have: Option<&Value>, wanted: &Value) -> bool {
    let as_list = |value: &Value| -> Vec<Value> {
        match value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    };
    let Some(have) = have else {
        return false;
    };
    let have = as_list(have);
    as_list(wanted).iter().any(|w| have.contains(w))
}

fn status_of(err: &StoreError) -> u16 {
    match err.kind {
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        _ => 400,
    }
}

fn error_entry(err: &StoreError) -> Value {
    json!({
        "error": {"type": err.kind.as_str(), "reason": err.message},
        "status": status_of(err),
    })
}

impl SearchEngine for InMemoryEngine {
    fn create(&self, index: &str, id: &str, doc: &Value) -> Result<Value> {
        self.single_write(EngineOp::Create, WriteIntent::create(index, id, as_document(doc)?))
    }

    fn index(&self, index: &str, id: &str, doc: &Value) -> Result<Value> {
        self.single_write(EngineOp::Index, WriteIntent::index(index, id, as_document(doc)?))
    }

    fn update(&self, index: &str, id: &str, body: &Value) -> Result<Value> {
        let intent = WriteIntent {
            kind: OpKind::Update,
            index: index.to_string(),
            id: id.to_string(),
            payload: body.clone(),
            parent: None,
        };
        self.single_write(EngineOp::Update, intent)
    }

    fn delete(&self, index: &str, id: &str) -> Result<Value> {
        self.single_write(EngineOp::Delete, WriteIntent::delete(index, id))
    }

    fn get(&self, index: &str, id: &str, params: &Map<String, Value>) -> Result<Option<Value>> {
        self.enter(EngineOp::Get)?;
        let state = self.state.read();
        for physical in Self::resolve_read(&state, index)? {
            let found = state
                .indices
                .get(&physical)
                .and_then(|index_state| index_state.docs.get(id));
            if let Some(source) = found {
                let mut response = json!({
                    "_index": physical,
                    "_type": DEFAULT_DOC_TYPE,
                    "_id": id,
                    "found": true,
                });
                if let Some(filtered) = filter_source(source, params.get("_source")) {
                    response["_source"] = filtered;
                }
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    fn search(&self, index: &str, body: &Value) -> Result<Value> {
        self.enter(EngineOp::Search)?;
        let state = self.state.read();
        Self::search_internal(&state, index, body)
    }

    fn count(&self, index: &str, body: &Value) -> Result<Value> {
        self.enter(EngineOp::Count)?;
        let state = self.state.read();
        let count = Self::collect_matches(&state, index, body)?.len();
        Ok(json!({ "count": count }))
    }

    fn explain(&self, index: &str, id: &str, body: &Value) -> Result<Value> {
        self.enter(EngineOp::Explain)?;
        let state = self.state.read();
        let query = body.get("query").cloned().unwrap_or_else(|| json!({"match_all": {}}));
        for physical in Self::resolve_read(&state, index)? {
            let found = state
                .indices
                .get(&physical)
                .and_then(|index_state| index_state.docs.get(id));
            if let Some(source) = found {
                let matched = query_eval::matches(&query, id, source)?;
                let explanation = if matched {
                    json!({"value": 1.0, "description": format!("matched {}", query), "details": []})
                } else {
                    json!({"value": 0.0, "description": "no matching clause", "details": []})
                };
                return Ok(json!({
                    "_index": physical,
                    "_type": DEFAULT_DOC_TYPE,
                    "_id": id,
                    "matched": matched,
                    "explanation": explanation,
                }));
            }
        }
        Ok(json!({ "_index": index, "_type": DEFAULT_DOC_TYPE, "_id": id, "matched": false }))
    }

    fn bulk(&self, actions: &[WriteIntent]) -> Result<Vec<BulkItemResult>> {
        self.enter(EngineOp::Bulk)?;
        let mut state = self.state.write();
        Ok(actions
            .iter()
            .map(|intent| match Self::apply_write(&mut state, intent) {
                Ok(applied) => {
                    let mut item = BulkItemResult::ok(intent, applied.status);
                    item.index = applied.index;
                    item
                }
                Err(err) => BulkItemResult::failed(intent, status_of(&err), err.message),
            })
            .collect())
    }

    fn msearch(&self, body: &[Value]) -> Result<Value> {
        self.enter(EngineOp::Msearch)?;
        if body.len() % 2 != 0 {
            return Err(StoreError::engine(
                400,
                "multi-search body must alternate header and query lines",
            ));
        }
        let state = self.state.read();
        let responses: Vec<Value> = body
            .chunks(2)
            .map(|pair| {
                let index = pair[0].get("index").and_then(Value::as_str).unwrap_or("_all");
                match Self::search_internal(&state, index, &pair[1]) {
                    Ok(mut response) => {
                        response["status"] = json!(200);
                        response
                    }
                    Err(err) => error_entry(&err),
                }
            })
            .collect();
        Ok(json!({ "responses": responses }))
    }

    fn mget(&self, body: &Value) -> Result<Value> {
        self.enter(EngineOp::Mget)?;
        let specs = body
            .get("docs")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::engine(400, "multi-get requires [docs]"))?;
        let state = self.state.read();

        let docs: Vec<Value> = specs
            .iter()
            .map(|spec| {
                let index = spec.get("_index").and_then(Value::as_str).unwrap_or("");
                let id = spec.get("_id").and_then(Value::as_str).unwrap_or("");
                let physical = match Self::resolve_read(&state, index) {
                    Ok(physical) => physical,
                    Err(err) => {
                        let mut entry = error_entry(&err);
                        entry["_index"] = json!(index);
                        entry["_id"] = json!(id);
                        return entry;
                    }
                };
                let found = physical.iter().find_map(|name| {
                    state
                        .indices
                        .get(name)
                        .and_then(|index_state| index_state.docs.get(id))
                        .map(|source| (name, source))
                });
                match found {
                    Some((name, source)) => {
                        let mut entry = json!({
                            "_index": name,
                            "_type": DEFAULT_DOC_TYPE,
                            "_id": id,
                            "found": true,
                        });
                        if let Some(filtered) = filter_source(source, spec.get("_source")) {
                            entry["_source"] = filtered;
                        }
                        entry
                    }
                    None => json!({
                        "_index": index,
                        "_type": DEFAULT_DOC_TYPE,
                        "_id": id,
                        "found": false,
                    }),
                }
            })
            .collect();
        Ok(json!({ "docs": docs }))
    }

    fn reindex(&self, body: &Value) -> Result<Value> {
        self.enter(EngineOp::Reindex)?;
        let source_index = body
            .pointer("/source/index")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::engine(400, "reindex requires [source.index]"))?;
        let dest_index = body
            .pointer("/dest/index")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::engine(400, "reindex requires [dest.index]"))?;
        let mut selection = Map::new();
        if let Some(query) = body.pointer("/source/query") {
            selection.insert("query".into(), query.clone());
        }

        let mut state = self.state.write();
        let candidates = Self::collect_matches(&state, source_index, &Value::Object(selection))?;
        let mut created = 0;
        let mut updated = 0;
        for candidate in &candidates {
            let intent = WriteIntent::index(dest_index, &candidate.id, candidate.source.clone());
            let applied = Self::apply_write(&mut state, &intent)?;
            if applied.status == 201 {
                created += 1;
            } else {
                updated += 1;
            }
        }
        debug!(source = source_index, dest = dest_index, total = candidates.len(), "Reindexed");
        Ok(json!({
            "total": candidates.len(),
            "created": created,
            "updated": updated,
            "failures": [],
        }))
    }

    fn delete_by_query(&self, index: &str, body: &Value) -> Result<Value> {
        self.enter(EngineOp::DeleteByQuery)?;
        let mut state = self.state.write();
        let candidates = Self::collect_matches(&state, index, body)?;
        for candidate in &candidates {
            if let Some(index_state) = state.indices.get_mut(&candidate.index) {
                index_state.docs.remove(&candidate.id);
            }
        }
        Ok(json!({
            "total": candidates.len(),
            "deleted": candidates.len(),
            "failures": [],
        }))
    }

    fn refresh(&self, index: &str) -> Result<()> {
        self.enter(EngineOp::Refresh)?;
        let state = self.state.read();
        Self::resolve_read(&state, index).map(|_| ())
    }

    fn open_scroll(
        &self,
        index: &str,
        body: &Value,
        size: usize,
        _keep_alive: &str,
    ) -> Result<ScrollPage> {
        self.enter(EngineOp::OpenScroll)?;
        let hits: Vec<Value> = {
            let state = self.state.read();
            let source_filter = body.get("_source");
            Self::collect_matches(&state, index, body)?
                .iter()
                .map(|candidate| candidate.to_hit(source_filter))
                .collect()
        };
        let scroll_id = uuid::Uuid::new_v4().to_string();
        let mut cursor = ScrollCursor {
            hits,
            position: 0,
            size: size.max(1),
        };
        let page = cursor.next_page();
        self.scrolls.insert(scroll_id.clone(), cursor);
        Ok(ScrollPage {
            scroll_id: Some(scroll_id),
            hits: page,
        })
    }

    fn next_scroll(&self, scroll_id: &str, _keep_alive: &str) -> Result<ScrollPage> {
        self.enter(EngineOp::NextScroll)?;
        let mut cursor = self.scrolls.get_mut(scroll_id).ok_or_else(|| {
            StoreError::not_found(format!("search_context_missing_exception: [{}]", scroll_id))
        })?;
        Ok(ScrollPage {
            scroll_id: Some(scroll_id.to_string()),
            hits: cursor.next_page(),
        })
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.enter(EngineOp::ClearScroll)?;
        self.scrolls.remove(scroll_id);
        Ok(())
    }
}

impl ScrollCursor {
    fn next_page(&mut self) -> Vec<Value> {
        let end = (self.position + self.size).min(self.hits.len());
        let page = self.hits[self.position..end].to_vec();
        self.position = end;
        page
    }
}

impl IndexAdmin for InMemoryEngine {
    fn get_index(&self, name: &str) -> Result<Value> {
        self.enter(EngineOp::GetIndex)?;
        let state = self.state.read();
        let mut response = Map::new();
        for physical in Self::resolve_read(&state, name)? {
            let Some(index_state) = state.indices.get(&physical) else {
                continue;
            };
            let aliases: Map<String, Value> = index_state
                .aliases
                .iter()
                .map(|(alias, is_write)| {
                    let flags = if *is_write {
                        json!({"is_write_index": true})
                    } else {
                        json!({})
                    };
                    (alias.clone(), flags)
                })
                .collect();
            response.insert(
                physical.clone(),
                json!({
                    "aliases": aliases,
                    "mappings": index_state.mappings,
                    "settings": index_state.settings,
                }),
            );
        }
        Ok(Value::Object(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn engine_with_alias() -> InMemoryEngine {
        let engine = InMemoryEngine::new();
        engine.create_index("live_thing", &json!({})).unwrap();
        engine.create_index("archived_thing", &json!({})).unwrap();
        engine.add_alias("live_thing", "thing", true).unwrap();
        engine.add_alias("archived_thing", "thing", false).unwrap();
        engine
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Single Document Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_create_conflict() {
        let engine = InMemoryEngine::new();
        engine.create("thing", "1", &json!({"a": 1})).unwrap();
        let err = engine.create("thing", "1", &json!({"a": 2})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let engine = InMemoryEngine::new();
        engine.create_index("thing", &json!({})).unwrap();
        let err = engine
            .update("thing", "1", &json!({"doc": {"a": 1}}))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_merges_nested_objects() {
        let engine = InMemoryEngine::new();
        engine
            .index("thing", "1", &json!({"meta": {"a": 1, "b": 2}, "n": 1}))
            .unwrap();
        engine
            .update("thing", "1", &json!({"doc": {"meta": {"b": 3}}}))
            .unwrap();
        assert_eq!(
            Value::Object(engine.document("thing", "1").unwrap()),
            json!({"meta": {"a": 1, "b": 3}, "n": 1})
        );
    }

    #[test]
    fn test_get_with_source_filter() {
        let engine = InMemoryEngine::new();
        engine.index("thing", "1", &json!({"a": 1, "b": 2})).unwrap();
        let mut params = Map::new();
        params.insert("_source".into(), json!(["a"]));
        let response = engine.get("thing", "1", &params).unwrap().unwrap();
        assert_eq!(response["_source"], json!({"a": 1}));
        assert_eq!(engine.get("thing", "2", &Map::new()).unwrap(), None);
        assert!(engine.get("nothing", "1", &Map::new()).unwrap_err().is_not_found());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Script Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_script_update_and_initial() {
        let engine = InMemoryEngine::new();
        let body = json!({
            "script": {"source": "ctx._source.n += params.by; ctx._source.tag = 'seen'", "params": {"by": 2}},
            "upsert": {"n": 10}
        });
        engine.update("thing", "1", &body).unwrap();
        assert_eq!(engine.document("thing", "1").unwrap()["n"], json!(10));

        engine.update("thing", "1", &body).unwrap();
        let source = engine.document("thing", "1").unwrap();
        assert_eq!(source["n"], json!(12));
        assert_eq!(source["tag"], json!("seen"));
    }

    #[test]
    fn test_script_rejects_unknown_statement() {
        let engine = InMemoryEngine::new();
        engine.index("thing", "1", &json!({})).unwrap();
        let err = engine
            .update("thing", "1", &json!({"script": "ctx.op = 'delete'"}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Engine);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bulk Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_bulk_item_statuses() {
        let engine = InMemoryEngine::new();
        let results = engine
            .bulk(&[
                WriteIntent::create("thing", "1", doc(json!({"a": 1}))),
                WriteIntent::create("thing", "1", doc(json!({"a": 2}))),
                WriteIntent::update("thing", "2", doc(json!({"a": 3}))),
                WriteIntent::upsert("thing", "3", doc(json!({"a": 4}))),
                WriteIntent::delete("thing", "9"),
            ])
            .unwrap();
        let statuses: Vec<u16> = results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![201, 409, 404, 201, 404]);
        assert_eq!(engine.call_count(EngineOp::Bulk), 1);
    }

    #[test]
    fn test_alias_write_routing() {
        let engine = engine_with_alias();
        let results = engine
            .bulk(&[WriteIntent::create("thing", "1", doc(json!({"a": 1})))])
            .unwrap();
        assert_eq!(results[0].index, "live_thing");
        assert!(engine.document("live_thing", "1").is_some());
    }

    #[test]
    fn test_alias_without_write_index_rejects_writes() {
        let engine = InMemoryEngine::new();
        engine.create_index("a", &json!({})).unwrap();
        engine.create_index("b", &json!({})).unwrap();
        engine.add_alias("a", "both", false).unwrap();
        engine.add_alias("b", "both", false).unwrap();
        let results = engine
            .bulk(&[WriteIntent::index("both", "1", doc(json!({})))])
            .unwrap();
        assert_eq!(results[0].status, 400);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Search Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_search_sort_and_window() {
        let engine = InMemoryEngine::new();
        for n in 0..5 {
            engine
                .index("thing", &format!("id-{}", n), &json!({"n": n}))
                .unwrap();
        }
        let response = engine
            .search(
                "thing",
                &json!({"query": {"range": {"n": {"gte": 1}}}, "sort": [{"n": "desc"}], "from": 1, "size": 2}),
            )
            .unwrap();
        assert_eq!(response["hits"]["total"]["value"], json!(4));
        let ns: Vec<Value> = crate::response::sources_from_response(&response)
            .iter()
            .map(|s| s["n"].clone())
            .collect();
        assert_eq!(ns, vec![json!(3), json!(2)]);
    }

    #[test]
    fn test_msearch_reports_missing_index_inline() {
        let engine = InMemoryEngine::new();
        engine.index("thing", "1", &json!({"a": 1})).unwrap();
        let response = engine
            .msearch(&[
                json!({"index": "thing"}),
                json!({"query": {"match_all": {}}}),
                json!({"index": "nothing"}),
                json!({"query": {"match_all": {}}}),
            ])
            .unwrap();
        let responses = response["responses"].as_array().unwrap();
        assert_eq!(responses[0]["hits"]["total"]["value"], json!(1));
        assert_eq!(responses[1]["status"], json!(404));
    }

    #[test]
    fn test_completion_suggest_with_contexts() {
        let engine = InMemoryEngine::new();
        engine
            .index("thing", "1", &json!({"text_suggest": {"input": ["Blue Widget"], "contexts": {"kind": ["w"]}}}))
            .unwrap();
        engine
            .index("thing", "2", &json!({"text_suggest": {"input": ["Blue Gadget"], "contexts": {"kind": ["g"]}}}))
            .unwrap();
        let response = engine
            .search(
                "thing",
                &json!({"suggest": {"s": {"prefix": "blu", "completion": {"field": "text_suggest", "contexts": {"kind": ["g"]}}}}}),
            )
            .unwrap();
        let options = crate::response::suggest_options(&response, "s");
        assert_eq!(options.len(), 1);
        assert_eq!(options[0]["text_suggest"]["input"][0], json!("Blue Gadget"));
    }

    #[test]
    fn test_profiled_search_reports_each_index() {
        let engine = engine_with_alias();
        engine.index("live_thing", "1", &json!({"n": 1})).unwrap();
        let response = engine
            .search("thing", &json!({"query": {"term": {"n": 1}}, "profile": true}))
            .unwrap();
        let shards = response["profile"]["shards"].as_array().unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0]["searches"][0]["query"][0]["type"], json!("term"));

        let plain = engine.search("thing", &json!({"query": {"match_all": {}}})).unwrap();
        assert!(plain.get("profile").is_none());
    }

    #[test]
    fn test_explain_match_and_miss() {
        let engine = InMemoryEngine::new();
        engine.index("thing", "1", &json!({"kind": "w"})).unwrap();

        let hit = engine
            .explain("thing", "1", &json!({"query": {"term": {"kind": "w"}}}))
            .unwrap();
        assert_eq!(hit["matched"], json!(true));
        assert_eq!(hit["explanation"]["value"], json!(1.0));

        let miss = engine
            .explain("thing", "1", &json!({"query": {"term": {"kind": "g"}}}))
            .unwrap();
        assert_eq!(miss["matched"], json!(false));

        let absent = engine.explain("thing", "2", &json!({})).unwrap();
        assert_eq!(absent["matched"], json!(false));
        assert!(absent.get("explanation").is_none());
        assert_eq!(engine.call_count(EngineOp::Explain), 3);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Maintenance Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_reindex_and_delete_by_query() {
        let engine = engine_with_alias();
        engine.index("live_thing", "1", &json!({"old": true})).unwrap();
        engine.index("live_thing", "2", &json!({"old": false})).unwrap();

        let query = json!({"term": {"old": true}});
        engine
            .reindex(&json!({
                "source": {"index": "live_thing", "query": query},
                "dest": {"index": "archived_thing"},
                "conflicts": "proceed"
            }))
            .unwrap();
        assert!(engine.document("archived_thing", "1").is_some());
        assert_eq!(engine.doc_count("thing"), 3);

        engine
            .delete_by_query("live_thing", &json!({"query": query}))
            .unwrap();
        assert_eq!(engine.doc_count("live_thing"), 1);
        assert_eq!(engine.doc_count("thing"), 2);
    }

    #[test]
    fn test_scroll_pages() {
        let engine = InMemoryEngine::new();
        for n in 0..5 {
            engine.index("thing", &n.to_string(), &json!({"n": n})).unwrap();
        }
        let first = engine
            .open_scroll("thing", &json!({"query": {"match_all": {}}}), 2, "1m")
            .unwrap();
        let scroll_id = first.scroll_id.clone().unwrap();
        assert_eq!(first.hits.len(), 2);
        assert_eq!(engine.next_scroll(&scroll_id, "1m").unwrap().hits.len(), 2);
        assert_eq!(engine.next_scroll(&scroll_id, "1m").unwrap().hits.len(), 1);
        assert!(engine.next_scroll(&scroll_id, "1m").unwrap().hits.is_empty());
        engine.clear_scroll(&scroll_id).unwrap();
        assert!(engine.next_scroll(&scroll_id, "1m").is_err());
    }

    #[test]
    fn test_get_index_reports_alias_flags() {
        let engine = engine_with_alias();
        let response = engine.get_index("thing").unwrap();
        assert_eq!(
            response["live_thing"]["aliases"]["thing"],
            json!({"is_write_index": true})
        );
        assert_eq!(response["archived_thing"]["aliases"]["thing"], json!({}));
        assert!(engine.get_index("nothing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let engine = InMemoryEngine::new();
        engine.fail_next(EngineOp::Refresh);
        engine.create_index("thing", &json!({})).unwrap();
        assert!(engine.refresh("thing").is_err());
        assert!(engine.refresh("thing").is_ok());
        assert_eq!(engine.call_count(EngineOp::Refresh), 2);
    }
}
