//! Filter tree normalization.
//!
//! Client filters arrive in several shapes: a JSON-encoded string, a nested
//! object (including bracket-encoded query strings such as
//! `meta_query[0][key]=color`), or four flat parameters. All of them resolve
//! to one canonical [`MetaQuery`] or to "no filter".

use serde_json::{Map, Value};

use super::clause::build_clause;
use super::types::{MetaClause, MetaQuery, Relation};

/// Structured filter input, resolved once at entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterInput {
    /// JSON text still to be decoded.
    Encoded(String),
    /// Already-structured object or array.
    Structured(Value),
}

impl FilterInput {
    /// Classify a raw request parameter. Returns `None` for values that count
    /// as "not supplied" (null, empty string, empty object or array).
    pub fn from_param(raw: &Value) -> Option<Self> {
        match raw {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(FilterInput::Encoded(s.clone())),
            Value::Object(map) if map.is_empty() => None,
            Value::Array(items) if items.is_empty() => None,
            other => Some(FilterInput::Structured(other.clone())),
        }
    }
}

/// Flat meta filter parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatMetaParams {
    pub key: Option<String>,
    pub value: Option<Value>,
    pub compare: Option<String>,
    pub meta_type: Option<String>,
}

/// Normalize a structured filter into a canonical tree.
///
/// Undecodable or non-structured input yields `None`; it is never an error.
pub fn normalize(input: FilterInput) -> Option<MetaQuery> {
    let decoded = match input {
        FilterInput::Encoded(text) => match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "meta_query is not valid JSON; ignoring");
                return None;
            }
        },
        FilterInput::Structured(value) => value,
    };

    match decoded {
        Value::Object(map) => normalize_object(&map),
        Value::Array(items) => {
            let clauses = items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(build_clause)
                .collect();
            MetaQuery::from_clauses(Relation::And, clauses)
        }
        _ => None,
    }
}

fn normalize_object(map: &Map<String, Value>) -> Option<MetaQuery> {
    let relation = Relation::parse_or_default(map.get("relation").and_then(Value::as_str));

    let mut clauses: Vec<MetaClause> = map
        .iter()
        .filter(|(name, _)| name.as_str() != "relation")
        .filter_map(|(_, value)| value.as_object())
        .filter_map(build_clause)
        .collect();

    // Bare single-filter shorthand: {"key": "...", "value": "..."}.
    if clauses.is_empty() {
        clauses.extend(build_clause(map));
    }

    MetaQuery::from_clauses(relation, clauses)
}

/// Build the single clause described by the flat parameters.
///
/// Unlike the structured path, an empty-string `meta_value` counts as not
/// provided here. The two paths disagree on purpose for compatibility with
/// existing clients; do not unify them without a migration.
pub fn normalize_flat(params: &FlatMetaParams) -> Option<MetaQuery> {
    let mut object = Map::new();

    let key = params.key.as_deref().filter(|k| !k.is_empty())?;
    object.insert("key".to_string(), Value::String(key.to_string()));

    match &params.value {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if s.is_empty() => {}
        Some(value) => {
            object.insert("value".to_string(), value.clone());
        }
    }

    if let Some(compare) = &params.compare {
        object.insert("compare".to_string(), Value::String(compare.clone()));
    }
    if let Some(meta_type) = &params.meta_type {
        object.insert("type".to_string(), Value::String(meta_type.clone()));
    }

    build_clause(&object).map(MetaQuery::Clause)
}
