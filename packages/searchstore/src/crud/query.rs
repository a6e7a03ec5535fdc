//! Entity query description
//!
//! An [`EntityQuery`] is what CRUD services accept for searches: a plain
//! document of field values, a query clause, or a complete raw body, plus
//! the paging and result-shaping options the service applies.

use serde_json::{json, Map, Value};

use crate::domain::{Document, ExecMode};
use crate::transform::{Transform, TransformOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// What the query matches
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySpec {
    /// Every field must equal its value (`bool.must` of `term` clauses)
    Fields(Document),
    /// A query clause placed under `query`
    Clause(Value),
    /// A complete search body, sent as-is
    Raw(Value),
}

/// `{"bool": {"must": [{"term": {field: value}}, ...]}}`
pub fn fields_clause(fields: &Document) -> Value {
    let terms: Vec<Value> = fields
        .iter()
        .map(|(field, value)| {
            let mut term = Map::new();
            term.insert(field.clone(), value.clone());
            json!({ "term": term })
        })
        .collect();
    json!({ "bool": { "must": terms } })
}

/// `{"bool": {"must": [left, right]}}`
pub fn and_clauses(left: Value, right: Value) -> Value {
    json!({ "bool": { "must": [left, right] } })
}

/// Search request for a CRUD service
#[derive(Clone)]
pub struct EntityQuery {
    spec: QuerySpec,
    limit: Option<usize>,
    sort: Option<(String, SortDirection)>,
    fields: Option<Vec<String>>,
    options: TransformOptions,
    key: Option<String>,
    mode: ExecMode,
}

impl std::fmt::Debug for EntityQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityQuery")
            .field("spec", &self.spec)
            .field("limit", &self.limit)
            .field("sort", &self.sort)
            .field("fields", &self.fields)
            .field("options", &self.options)
            .field("key", &self.key)
            .field("mode", &self.mode)
            .finish()
    }
}

impl EntityQuery {
    fn new(spec: QuerySpec) -> Self {
        Self {
            spec,
            limit: None,
            sort: None,
            fields: None,
            options: TransformOptions::hits(),
            key: None,
            mode: ExecMode::Immediate,
        }
    }

    pub fn matching(fields: Document) -> Self {
        Self::new(QuerySpec::Fields(fields))
    }

    pub fn clause(clause: Value) -> Self {
        Self::new(QuerySpec::Clause(clause))
    }

    /// A full body; limit, sort and fields are not applied to it
    pub fn raw(body: Value) -> Self {
        Self::new(QuerySpec::Raw(body))
    }

    pub fn match_all() -> Self {
        Self::clause(json!({ "match_all": {} }))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some((field.into(), direction));
        self
    }

    /// Restrict returned sources to `fields`
    pub fn select(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Return the first hit source (or null) instead of the list
    pub fn first(mut self) -> Self {
        self.options.just_one = true;
        self
    }

    pub fn with_ids(mut self) -> Self {
        self.options.include_id = true;
        self
    }

    /// Return the engine response without extracting hit sources
    pub fn raw_response(mut self) -> Self {
        self.options.hits = false;
        self
    }

    pub fn map_result(mut self, custom: Transform) -> Self {
        self.options.custom = Some(custom);
        self
    }

    /// Register under `key` instead of executing now
    pub fn batched(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.mode = ExecMode::Batched;
        self
    }

    pub(crate) fn immediately(mut self) -> Self {
        self.key = None;
        self.mode = ExecMode::Immediate;
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn transform_options(&self) -> TransformOptions {
        self.options.clone()
    }

    /// Require `extra` to match as well. Raw bodies get it merged into their
    /// `query` (`match_all` when they have none).
    pub fn and_clause(mut self, extra: Value) -> Self {
        self.spec = match self.spec {
            QuerySpec::Fields(fields) => QuerySpec::Clause(and_clauses(fields_clause(&fields), extra)),
            QuerySpec::Clause(clause) => QuerySpec::Clause(and_clauses(clause, extra)),
            QuerySpec::Raw(mut body) => {
                if let Some(obj) = body.as_object_mut() {
                    let original = obj
                        .remove("query")
                        .unwrap_or_else(|| json!({ "match_all": {} }));
                    obj.insert("query".into(), and_clauses(original, extra));
                }
                QuerySpec::Raw(body)
            }
        };
        self
    }

    /// Search body with `default_limit` as `size` unless a limit was set
    pub fn body(&self, default_limit: usize) -> Value {
        let clause = match &self.spec {
            QuerySpec::Raw(body) => return body.clone(),
            QuerySpec::Fields(fields) => fields_clause(fields),
            QuerySpec::Clause(clause) => clause.clone(),
        };

        let mut body = Map::new();
        body.insert("query".into(), clause);
        body.insert("size".into(), json!(self.limit.unwrap_or(default_limit)));
        if let Some((field, direction)) = &self.sort {
            let mut order = Map::new();
            order.insert(field.clone(), json!({ "order": direction.as_str() }));
            body.insert("sort".into(), json!([order]));
        }
        if let Some(fields) = self.fields.as_ref().filter(|fields| !fields.is_empty()) {
            body.insert("_source".into(), json!(fields));
        }
        Value::Object(body)
    }
}
