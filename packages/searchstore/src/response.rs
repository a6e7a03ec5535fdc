//! Accessors over engine search responses
//!
//! Every accessor is total: missing paths yield empty collections, `Null`
//! or zero rather than errors.

use serde_json::{json, Map, Value};

pub const DEFAULT_PAGE_SIZE: usize = 10;

pub fn get_id(hit: &Value) -> Option<&str> {
    hit.get("_id").and_then(Value::as_str)
}

pub fn get_index(hit: &Value) -> Option<&str> {
    hit.get("_index").and_then(Value::as_str)
}

pub fn get_type(hit: &Value) -> Option<&str> {
    hit.get("_type").and_then(Value::as_str)
}

pub fn get_source(hit: &Value) -> Value {
    hit.get("_source").cloned().unwrap_or(Value::Null)
}

pub fn get_hits(response: &Value) -> Vec<Value> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

pub fn get_total(response: &Value) -> u64 {
    response
        .pointer("/hits/total/value")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

pub fn get_aggs(response: &Value) -> Value {
    response
        .get("aggregations")
        .cloned()
        .unwrap_or_else(|| json!({}))
}

pub fn get_sources(hits: &[Value]) -> Vec<Value> {
    hits.iter().map(get_source).collect()
}

pub fn get_ids(hits: &[Value]) -> Vec<String> {
    hits.iter()
        .filter_map(|hit| get_id(hit).map(str::to_string))
        .collect()
}

pub fn sources_from_response(response: &Value) -> Vec<Value> {
    get_sources(&get_hits(response))
}

pub fn ids_from_response(response: &Value) -> Vec<String> {
    get_ids(&get_hits(response))
}

/// `{_id: _source}` for every hit
pub fn sources_by_id(hits: &[Value]) -> Map<String, Value> {
    hits.iter()
        .filter_map(|hit| get_id(hit).map(|id| (id.to_string(), get_source(hit))))
        .collect()
}

pub fn sources_by_id_from_response(response: &Value) -> Map<String, Value> {
    sources_by_id(&get_hits(response))
}

/// Copy each hit's `_id` into its source as `uid`
pub fn include_ids(mut response: Value) -> Value {
    if let Some(hits) = response
        .pointer_mut("/hits/hits")
        .and_then(Value::as_array_mut)
    {
        for hit in hits.iter_mut() {
            let id = hit.get("_id").cloned().unwrap_or(Value::Null);
            if let Some(source) = hit.get_mut("_source").and_then(Value::as_object_mut) {
                source.insert("uid".into(), id);
            }
        }
    }
    response
}

/// Option sources of the first suggestion entry under `key`
pub fn suggest_options(response: &Value, key: &str) -> Vec<Value> {
    response
        .pointer(&format!("/suggest/{}/0/options", key))
        .and_then(Value::as_array)
        .map(|options| get_sources(options))
        .unwrap_or_default()
}

/// Bucket keys of a terms aggregation
pub fn bucket_keys(response: &Value, aggregation_path: &[&str]) -> Vec<Value> {
    let mut pointer = String::from("/aggregations");
    for name in aggregation_path {
        pointer.push('/');
        pointer.push_str(name);
    }
    pointer.push_str("/buckets");

    response
        .pointer(&pointer)
        .and_then(Value::as_array)
        .map(|buckets| {
            buckets
                .iter()
                .filter_map(|bucket| bucket.get("key").cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// `{total, <data_key>: [sources]}` page for API responses
pub fn paginate_response(
    result: &Value,
    data_key: &str,
    item_transformer: Option<&dyn Fn(Value) -> Value>,
) -> Value {
    let items: Vec<Value> = get_hits(result)
        .iter()
        .map(|hit| {
            let source = get_source(hit);
            match item_transformer {
                Some(transform) => transform(source),
                None => source,
            }
        })
        .collect();

    let mut page = Map::new();
    page.insert("total".into(), json!(get_total(result)));
    page.insert(data_key.to_string(), Value::Array(items));
    Value::Object(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response() -> Value {
        json!({
            "hits": {
                "total": {"value": 2, "relation": "eq"},
                "hits": [
                    {"_index": "thing_1", "_id": "a", "_type": "_doc", "_source": {"n": 1}},
                    {"_index": "thing_2", "_id": "b", "_type": "_doc", "_source": {"n": 2}}
                ]
            },
            "aggregations": {
                "types": {"buckets": [{"key": "x", "doc_count": 1}, {"key": "y", "doc_count": 1}]}
            },
            "suggest": {
                "s": [{"text": "th", "options": [{"_id": "a", "_source": {"n": 1}}]}]
            }
        })
    }

    #[test]
    fn test_hit_accessors() {
        let response = response();
        let hits = get_hits(&response);
        assert_eq!(hits.len(), 2);
        assert_eq!(get_id(&hits[0]), Some("a"));
        assert_eq!(get_index(&hits[1]), Some("thing_2"));
        assert_eq!(get_type(&hits[1]), Some("_doc"));
        assert_eq!(get_total(&response), 2);
        assert_eq!(ids_from_response(&response), vec!["a", "b"]);
        assert_eq!(sources_from_response(&response), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_missing_paths_are_empty() {
        let empty = json!({});
        assert!(get_hits(&empty).is_empty());
        assert_eq!(get_total(&empty), 0);
        assert_eq!(get_aggs(&empty), json!({}));
        assert!(suggest_options(&empty, "s").is_empty());
        assert_eq!(get_source(&empty), Value::Null);
    }

    #[test]
    fn test_include_ids() {
        let with_ids = include_ids(response());
        assert_eq!(
            sources_from_response(&with_ids),
            vec![json!({"n": 1, "uid": "a"}), json!({"n": 2, "uid": "b"})]
        );
    }

    #[test]
    fn test_sources_by_id() {
        let by_id = sources_by_id_from_response(&response());
        assert_eq!(by_id.get("b"), Some(&json!({"n": 2})));
    }

    #[test]
    fn test_suggest_and_buckets() {
        let response = response();
        assert_eq!(suggest_options(&response, "s"), vec![json!({"n": 1})]);
        assert_eq!(bucket_keys(&response, &["types"]), vec![json!("x"), json!("y")]);
    }

    #[test]
    fn test_paginate_response() {
        let double = |source: Value| json!({"twice": source["n"].as_i64().unwrap_or(0) * 2});
        let page = paginate_response(&response(), "data", Some(&double));
        assert_eq!(
            page,
            json!({"total": 2, "data": [{"twice": 2}, {"twice": 4}]})
        );
    }
}
