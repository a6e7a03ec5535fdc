//! Query evaluation for the in-memory engine
//!
//! Covers the query DSL subset the store layer emits: `match_all`,
//! `match_none`, `term`, `terms`, `ids`, `range`, `exists`, `prefix`,
//! `match` and `bool`. Anything else is rejected with a 400.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};

use crate::domain::Document;
use crate::error::{Result, StoreError};

fn parse_error(message: impl Into<String>) -> StoreError {
    StoreError::engine(400, format!("parsing_exception: {}", message.into()))
}

/// Resolve a dotted field path inside a source document
pub fn field_value<'a>(source: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = source.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Values of a field, flattening one array level
fn field_values<'a>(id: &'a str, source: &'a Document, path: &str) -> Vec<Value> {
    if path == "_id" {
        return vec![Value::String(id.to_string())];
    }
    match field_value(source, path) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(value) => vec![value.clone()],
    }
}

/// `{field: value}` or `{field: {<inner>: value}}`
fn single_field<'a>(clause: &'a Value, kind: &str) -> Result<(&'a str, &'a Value)> {
    let object = clause
        .as_object()
        .filter(|object| object.len() == 1)
        .ok_or_else(|| parse_error(format!("[{}] query requires exactly one field", kind)))?;
    let (field, value) = object
        .iter()
        .next()
        .ok_or_else(|| parse_error(format!("[{}] query is empty", kind)))?;
    Ok((field.as_str(), value))
}

fn unwrap_inner<'a>(value: &'a Value, inner: &str) -> &'a Value {
    match value {
        Value::Object(object) => object.get(inner).unwrap_or(value),
        _ => value,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Total order used by sorting and ranges: numbers, then strings, then bools
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn as_clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single],
    }
}

/// Evaluate a query against one document
pub fn matches(query: &Value, id: &str, source: &Document) -> Result<bool> {
    let object = query
        .as_object()
        .ok_or_else(|| parse_error("query must be an object"))?;
    if object.is_empty() {
        return Ok(true);
    }
    let (kind, clause) = object
        .iter()
        .next()
        .ok_or_else(|| parse_error("empty query"))?;

    match kind.as_str() {
        "match_all" => Ok(true),
        "match_none" => Ok(false),
        "term" => {
            let (field, value) = single_field(clause, kind)?;
            let expected = unwrap_inner(value, "value");
            Ok(field_values(id, source, field)
                .iter()
                .any(|actual| values_equal(actual, expected)))
        }
        "terms" => {
            let (field, value) = single_field(clause, kind)?;
            let expected = value
                .as_array()
                .ok_or_else(|| parse_error("[terms] values must be an array"))?;
            let actual = field_values(id, source, field);
            Ok(expected
                .iter()
                .any(|e| actual.iter().any(|a| values_equal(a, e))))
        }
        "ids" => {
            let ids = clause
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| parse_error("[ids] requires values"))?;
            Ok(ids.iter().any(|v| v.as_str() == Some(id)))
        }
        "exists" => {
            let field = clause
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| parse_error("[exists] requires field"))?;
            Ok(!field_values(id, source, field).is_empty())
        }
        "prefix" => {
            let (field, value) = single_field(clause, kind)?;
            let prefix = unwrap_inner(value, "value")
                .as_str()
                .ok_or_else(|| parse_error("[prefix] value must be a string"))?;
            Ok(field_values(id, source, field)
                .iter()
                .any(|v| v.as_str().is_some_and(|s| s.starts_with(prefix))))
        }
        "match" => {
            let (field, value) = single_field(clause, kind)?;
            let query_value = unwrap_inner(value, "query");
            let wanted = match query_value {
                Value::String(text) => tokens(text),
                other => {
                    return Ok(field_values(id, source, field)
                        .iter()
                        .any(|v| values_equal(v, other)))
                }
            };
            let present: Vec<String> = field_values(id, source, field)
                .iter()
                .filter_map(Value::as_str)
                .flat_map(tokens)
                .collect();
            Ok(wanted.iter().any(|token| present.contains(token)))
        }
        "range" => {
            let (field, bounds) = single_field(clause, kind)?;
            let bounds = bounds
                .as_object()
                .ok_or_else(|| parse_error("[range] bounds must be an object"))?;
            let actual = field_values(id, source, field);
            Ok(actual.iter().any(|value| in_range(value, bounds)))
        }
        "bool" => matches_bool(clause, id, source),
        other => Err(parse_error(format!("unknown query [{}]", other))),
    }
}

fn in_range(value: &Value, bounds: &Map<String, Value>) -> bool {
    bounds.iter().all(|(op, bound)| {
        let ordering = compare_values(value, bound);
        match (op.as_str(), ordering) {
            ("gt", Some(o)) => o == Ordering::Greater,
            ("gte", Some(o)) => o != Ordering::Less,
            ("lt", Some(o)) => o == Ordering::Less,
            ("lte", Some(o)) => o != Ordering::Greater,
            ("format", _) | ("boost", _) => true,
            _ => false,
        }
    })
}

fn matches_bool(clause: &Value, id: &str, source: &Document) -> Result<bool> {
    let must = as_clauses(clause.get("must"));
    let filter = as_clauses(clause.get("filter"));
    let should = as_clauses(clause.get("should"));
    let must_not = as_clauses(clause.get("must_not"));

    for query in must.iter().chain(filter.iter()) {
        if !matches(query, id, source)? {
            return Ok(false);
        }
    }
    for query in &must_not {
        if matches(query, id, source)? {
            return Ok(false);
        }
    }

    let default_minimum = if must.is_empty() && filter.is_empty() && !should.is_empty() {
        1
    } else {
        0
    };
    let minimum = clause
        .get("minimum_should_match")
        .and_then(Value::as_u64)
        .map(|m| m as usize)
        .unwrap_or(default_minimum);
    if minimum == 0 {
        return Ok(true);
    }

    let mut matched = 0;
    for query in &should {
        if matches(query, id, source)? {
            matched += 1;
            if matched >= minimum {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Slice membership for `{id, max}` sliced scrolls
pub fn in_slice(doc_id: &str, slice: &Value) -> bool {
    let id = slice.get("id").and_then(Value::as_u64).unwrap_or(0);
    let max = slice.get("max").and_then(Value::as_u64).unwrap_or(1).max(1);
    let mut hasher = DefaultHasher::new();
    doc_id.hash(&mut hasher);
    hasher.finish() % max == id
}

/// Apply a `_source` filter (`false`, a field, a field list, or
/// `{includes, excludes}`); `None` drops the source
pub fn filter_source(source: &Document, filter: Option<&Value>) -> Option<Value> {
    let (includes, excludes): (Vec<&str>, Vec<&str>) = match filter {
        None | Some(Value::Null) | Some(Value::Bool(true)) => {
            return Some(Value::Object(source.clone()))
        }
        Some(Value::Bool(false)) => return None,
        Some(Value::String(field)) if field.is_empty() => return None,
        Some(Value::String(field)) => (vec![field.as_str()], Vec::new()),
        Some(Value::Array(fields)) => (fields.iter().filter_map(Value::as_str).collect(), Vec::new()),
        Some(Value::Object(spec)) => {
            let list = |key: &str| -> Vec<&str> {
                as_clauses(spec.get(key))
                    .into_iter()
                    .filter_map(Value::as_str)
                    .collect()
            };
            (list("includes"), list("excludes"))
        }
        Some(_) => return Some(Value::Object(source.clone())),
    };

    let mut filtered = Document::new();
    for (name, value) in source {
        let included = includes.is_empty()
            || includes
                .iter()
                .any(|inc| *inc == name.as_str() || inc.starts_with(&format!("{}.", name)));
        if included && !excludes.contains(&name.as_str()) {
            filtered.insert(name.clone(), value.clone());
        }
    }
    Some(Value::Object(filtered))
}

/// Sort key list: `"field"`, `{field: "desc"}` or `{field: {order}}`
pub fn sort_keys(sort: Option<&Value>) -> Result<Vec<(String, bool)>> {
    let mut keys = Vec::new();
    for spec in as_clauses(sort) {
        match spec {
            Value::String(field) => keys.push((field.clone(), false)),
            Value::Object(object) => {
                for (field, order) in object {
                    let order = unwrap_inner(order, "order")
                        .as_str()
                        .unwrap_or("asc");
                    keys.push((field.clone(), order.eq_ignore_ascii_case("desc")));
                }
            }
            _ => return Err(parse_error("unsupported sort specification")),
        }
    }
    Ok(keys)
}

/// Compare two documents by sort keys; missing values sort last
pub fn compare_by_keys(
    keys: &[(String, bool)],
    (a_id, a): (&str, &Document),
    (b_id, b): (&str, &Document),
) -> Ordering {
    for (field, descending) in keys {
        let left = field_values(a_id, a, field).into_iter().next();
        let right = field_values(b_id, b, field).into_iter().next();
        let ordering = match (&left, &right) {
            (Some(l), Some(r)) => {
                let o = compare_values(l, r).unwrap_or(Ordering::Equal);
                if *descending {
                    o.reverse()
                } else {
                    o
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
