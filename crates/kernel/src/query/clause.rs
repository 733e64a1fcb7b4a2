//! Clause builder.
//!
//! Turns one loosely-typed JSON object into a validated [`MetaClause`].
//! Each field accepts a terse and a verbose spelling (`key` / `meta_key`).

use serde_json::{Map, Value};

use super::types::{MetaClause, MetaCompare, MetaType, MetaValue};

const KEY_ALIASES: [&str; 2] = ["key", "meta_key"];
const VALUE_ALIASES: [&str; 2] = ["value", "meta_value"];
const COMPARE_ALIASES: [&str; 2] = ["compare", "meta_compare"];
const TYPE_ALIASES: [&str; 2] = ["type", "meta_type"];

/// Build a clause from a JSON object.
///
/// Returns `None` when no non-empty key can be found under either alias.
/// An invalid `compare` or `type` drops that field only.
pub fn build_clause(input: &Map<String, Value>) -> Option<MetaClause> {
    let key = KEY_ALIASES
        .iter()
        .find_map(|alias| input.get(*alias).and_then(key_text))?;

    // Presence, not truthiness: "" and 0 are real values.
    let value = VALUE_ALIASES
        .iter()
        .find(|alias| input.contains_key(**alias))
        .and_then(|alias| input.get(*alias))
        .and_then(MetaValue::from_json);

    let compare = first_text(input, &COMPARE_ALIASES)
        .and_then(|raw| {
            let parsed = MetaCompare::parse(raw);
            if parsed.is_none() {
                tracing::debug!(key = %key, compare = %raw, "dropping unrecognized meta compare");
            }
            parsed
        })
        .unwrap_or_default();

    let meta_type = first_text(input, &TYPE_ALIASES).and_then(|raw| {
        let parsed = MetaType::parse(raw);
        if parsed.is_none() {
            tracing::debug!(key = %key, meta_type = %raw, "dropping unrecognized meta type");
        }
        parsed
    });

    Some(MetaClause {
        key,
        value,
        compare,
        meta_type,
    })
}

/// Key text: strings as-is, numbers stringified, empty means absent.
fn key_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// First non-empty string under any of the aliases.
fn first_text<'a>(input: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a str> {
    aliases.iter().find_map(|alias| {
        input
            .get(*alias)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    })
}
