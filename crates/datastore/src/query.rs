//! Feathers-style query parameters for `find` requests.
//!
//! A query is a JSON object. Special keys and operator objects map to
//! bracketed query-string parameters (shown here before percent-encoding,
//! which the HTTP client applies to every key and value):
//!
//! | Query                              | Encoded                          |
//! |------------------------------------|----------------------------------|
//! | `{"$sort": {"createdAt": -1}}`     | `$sort[createdAt]=-1`            |
//! | `{"$select": ["a", "b"]}`          | `$select[]=a&$select[]=b`        |
//! | `{"state": {"$in": ["x", "y"]}}`   | `state[$in][]=x&state[$in][]=y`  |
//! | `{"epoch": {"$gte": 3}}`           | `epoch[$gte]=3`                  |
//! | `{"$limit": 10}`                   | `$limit=10`                      |
//! | `{"worker_id": "abc"}`             | `worker_id=abc`                  |
//!
//! `$or` is not supported and is dropped with a warning.

use serde_json::{Map, Value};

/// A `find` query: a JSON object of filters and special `$` keys.
pub type Query = Map<String, Value>;

/// Comparison operators encoded as `key[$op]=value`.
const COMPARISON_OPERATORS: &[&str] = &["$lt", "$lte", "$gt", "$gte", "$ne"];

/// Set operators encoded as `key[$op][]=value` per element.
const SET_OPERATORS: &[&str] = &["$in", "$nin"];

/// Flatten `query` into query-string key/value pairs, in query order.
///
/// Keys and values are returned unescaped.
pub fn encode_query(query: &Query) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for (key, value) in query {
        match (key.as_str(), value) {
            ("$sort", Value::Object(fields)) => {
                for (field, direction) in fields {
                    pairs.push((format!("$sort[{field}]"), scalar(direction)));
                }
            }
            ("$select", Value::Array(fields)) => {
                for field in fields {
                    pairs.push(("$select[]".to_string(), scalar(field)));
                }
            }
            ("$or", _) => {
                tracing::warn!("Query operator $or is not supported; dropping it");
            }
            (_, Value::Object(ops)) if is_operator_object(ops) => {
                encode_operators(key, ops, &mut pairs);
            }
            _ => pairs.push((key.clone(), scalar(value))),
        }
    }

    pairs
}

fn is_operator_object(ops: &Map<String, Value>) -> bool {
    ops.keys()
        .any(|op| SET_OPERATORS.contains(&op.as_str()) || COMPARISON_OPERATORS.contains(&op.as_str()))
}

fn encode_operators(key: &str, ops: &Map<String, Value>, pairs: &mut Vec<(String, String)>) {
    for (op, operand) in ops {
        if SET_OPERATORS.contains(&op.as_str()) {
            let values = match operand {
                Value::Array(values) => values.as_slice(),
                other => std::slice::from_ref(other),
            };
            for v in values {
                pairs.push((format!("{key}[{op}][]"), scalar(v)));
            }
        } else if COMPARISON_OPERATORS.contains(&op.as_str()) {
            pairs.push((format!("{key}[{op}]"), scalar(operand)));
        } else {
            tracing::warn!(key, op = %op, "Unknown query operator; dropping it");
        }
    }
}

/// Render a JSON value as a bare query-string value. Strings are emitted
/// without quotes; everything else uses its JSON text.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn q(value: Value) -> Query {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    /// `k=v&k=v`, unescaped, for readable assertions.
    fn joined(query: Value) -> String {
        encode_query(&q(query))
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    #[test]
    fn empty_query_has_no_pairs() {
        assert!(encode_query(&Query::new()).is_empty());
    }

    #[test]
    fn equality_and_paging() {
        assert_eq!(
            joined(json!({"$limit": 10, "$skip": 20, "worker_id": "abc"})),
            "$limit=10&$skip=20&worker_id=abc"
        );
    }

    #[test]
    fn sort_and_select() {
        let encoded = joined(json!({
            "$select": ["state", "worker_id"],
            "$sort": {"createdAt": -1}
        }));
        assert_eq!(encoded, "$select[]=state&$select[]=worker_id&$sort[createdAt]=-1");
    }

    #[test]
    fn set_operators_expand_per_value() {
        assert_eq!(
            joined(json!({"state": {"$in": ["pending", "running"]}})),
            "state[$in][]=pending&state[$in][]=running"
        );
        assert_eq!(joined(json!({"state": {"$nin": ["finished"]}})), "state[$nin][]=finished");
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(joined(json!({"epoch": {"$gte": 3, "$lt": 10}})), "epoch[$gte]=3&epoch[$lt]=10");
        assert_eq!(joined(json!({"state": {"$ne": "finished"}})), "state[$ne]=finished");
    }

    #[test]
    fn or_is_dropped() {
        assert_eq!(joined(json!({"$or": [{"a": 1}], "b": 2})), "b=2");
    }

    #[test]
    fn reserved_characters_are_escaped_on_the_wire() {
        let pairs = encode_query(&q(json!({"worker_id": "a&b=c+d #e"})));
        assert_eq!(pairs, vec![("worker_id".to_string(), "a&b=c+d #e".to_string())]);

        let request = reqwest::Client::new()
            .get("http://localhost/jobs")
            .query(&pairs)
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("worker_id=a%26b%3Dc%2Bd+%23e"));
    }
}
