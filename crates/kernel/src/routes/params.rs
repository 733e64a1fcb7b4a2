//! Request parameter decoding.
//!
//! Query strings use bracket notation for nested values: `parent[]=3`
//! appends to a sequence and `meta_query[0][key]=color` builds nested maps.
//! Decoded values are JSON strings; typing is left to the query compiler.

use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `[]`
    Push,
    /// `[name]`
    Key(String),
}

/// Decode a raw query string into a parameter map.
pub fn parse_query(raw: &str) -> Map<String, Value> {
    let mut params = Map::new();

    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        let (name, segments) = split_key(&key);
        if name.is_empty() {
            continue;
        }

        let slot = params.entry(name).or_insert(Value::Null);
        assign(slot, &segments, Value::String(value.into_owned()));
    }

    params
}

/// Decode a JSON request body. An empty body is an empty map.
pub fn parse_body(body: &[u8]) -> AppResult<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::BadRequest(
            "request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {e}"))),
    }
}

/// Split `name[a][]` into `name` and its bracket segments.
///
/// A key whose brackets do not close is taken literally.
fn split_key(key: &str) -> (String, Vec<Segment>) {
    let Some(open) = key.find('[') else {
        return (key.to_string(), Vec::new());
    };

    let name = &key[..open];
    let mut segments = Vec::new();
    let mut rest = &key[open..];

    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            return (key.to_string(), Vec::new());
        };
        let segment = &inner[..close];
        segments.push(if segment.is_empty() {
            Segment::Push
        } else {
            Segment::Key(segment.to_string())
        });
        rest = &inner[close + 1..];
    }

    // Trailing text after the last bracket is ignored.
    (name.to_string(), segments)
}

fn assign(slot: &mut Value, segments: &[Segment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *slot = value;
        return;
    };

    match first {
        Segment::Push => {
            if !slot.is_array() && !slot.is_object() {
                *slot = Value::Array(Vec::new());
            }
            match slot {
                Value::Array(items) => {
                    items.push(Value::Null);
                    if let Some(last) = items.last_mut() {
                        assign(last, rest, value);
                    }
                }
                Value::Object(map) => {
                    let index = map.len().to_string();
                    let entry = map.entry(index).or_insert(Value::Null);
                    assign(entry, rest, value);
                }
                _ => {}
            }
        }
        Segment::Key(key) => {
            if !slot.is_object() {
                // Named key on a sequence: keep the items under their indices.
                let indexed: Map<String, Value> = match slot.take() {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| (i.to_string(), item))
                        .collect(),
                    _ => Map::new(),
                };
                *slot = Value::Object(indexed);
            }

            if let Value::Object(map) = slot {
                let entry = map.entry(key.clone()).or_insert(Value::Null);
                assign(entry, rest, value);
            }
        }
    }
}
