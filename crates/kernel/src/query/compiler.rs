//! Collection query compiler.
//!
//! Combines the meta filter with the structural request parameters (parent,
//! paging, ordering) into the [`CollectionQuery`] handed to the executor.
//! Malformed parameters degrade to their defaults; compilation never fails.

use serde_json::{Map, Value};

use super::normalize::{FilterInput, FlatMetaParams, normalize, normalize_flat};
use super::types::{
    CollectionQuery, DEFAULT_PER_PAGE, MAX_PER_PAGE, MetaQuery, OrderBy, ParentFilter,
    SortDirection,
};
use crate::models::PostType;

/// Compile request parameters for a collection listing.
pub fn compile(post_type: PostType, params: &Map<String, Value>) -> CollectionQuery {
    let mut query = CollectionQuery::new(post_type);

    query.parent = params.get("parent").and_then(parent_filter);
    query.meta_query = meta_filter(params);

    query.page = params
        .get("page")
        .and_then(coerce_int)
        .filter(|p| *p >= 1)
        .and_then(|p| u32::try_from(p).ok())
        .unwrap_or(1);
    query.per_page = params
        .get("per_page")
        .and_then(coerce_int)
        .filter(|p| *p >= 1)
        .map(|p| p.min(i64::from(MAX_PER_PAGE)) as u32)
        .unwrap_or(DEFAULT_PER_PAGE);

    query.orderby = params
        .get("orderby")
        .and_then(Value::as_str)
        .and_then(|raw| orderby_for(post_type, raw))
        .unwrap_or_default();
    query.order = match params.get("order").and_then(Value::as_str) {
        Some(raw) if raw.eq_ignore_ascii_case("asc") => SortDirection::Asc,
        _ => SortDirection::Desc,
    };

    query
}

/// Resolve the meta filter. A supplied `meta_query` always wins, even when it
/// normalizes to nothing; the flat parameters are only read without one.
pub fn meta_filter(params: &Map<String, Value>) -> Option<MetaQuery> {
    if let Some(input) = params.get("meta_query").and_then(FilterInput::from_param) {
        return normalize(input);
    }

    let flat = FlatMetaParams {
        key: params.get("meta_key").and_then(scalar_text),
        value: params.get("meta_value").cloned(),
        compare: params.get("meta_compare").and_then(scalar_text),
        meta_type: params.get("meta_type").and_then(scalar_text),
    };
    normalize_flat(&flat)
}

/// Parent restriction from a scalar or sequence parameter.
///
/// Indexed objects (`parent[0]=3`) count as sequences. Only strictly
/// positive integers survive; an empty result means no filter.
pub fn parent_filter(raw: &Value) -> Option<ParentFilter> {
    let ids: Vec<u64> = match raw {
        Value::Array(items) => items.iter().filter_map(positive_id).collect(),
        Value::Object(map) => map.values().filter_map(positive_id).collect(),
        other => return positive_id(other).map(ParentFilter::Eq),
    };
    (!ids.is_empty()).then_some(ParentFilter::In(ids))
}

/// Allowed `orderby` values per post kind.
pub fn orderby_options(post_type: PostType) -> Vec<OrderBy> {
    let mut options = vec![OrderBy::Date, OrderBy::Id, OrderBy::Title, OrderBy::Parent];
    match post_type {
        PostType::Forum => {
            options.push(OrderBy::MenuOrder);
            options.push(OrderBy::LastActiveTime);
        }
        PostType::Topic => options.push(OrderBy::LastActiveTime),
        PostType::Reply => {}
    }
    options
}

fn orderby_for(post_type: PostType, raw: &str) -> Option<OrderBy> {
    orderby_options(post_type)
        .into_iter()
        .find(|option| option.as_str() == raw)
}

fn positive_id(value: &Value) -> Option<u64> {
    coerce_int(value)
        .filter(|id| *id > 0)
        .and_then(|id| u64::try_from(id).ok())
}

/// Integer coercion for request parameters.
///
/// Accepts integers, floats (truncated) and strings holding an integer or
/// decimal literal. Everything else is non-numeric.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::types::{MetaClause, MetaCompare, MetaValue};
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parent_sequence_drops_invalid_in_order() {
        assert_eq!(
            parent_filter(&json!(["3", "-1", "abc", "7"])),
            Some(ParentFilter::In(vec![3, 7]))
        );
    }

    #[test]
    fn parent_sequence_of_invalid_is_no_filter() {
        assert_eq!(parent_filter(&json!(["0", "-4", "x"])), None);
        assert_eq!(parent_filter(&json!([])), None);
    }

    #[test]
    fn parent_scalar() {
        assert_eq!(parent_filter(&json!("12")), Some(ParentFilter::Eq(12)));
        assert_eq!(parent_filter(&json!(12)), Some(ParentFilter::Eq(12)));
        assert_eq!(parent_filter(&json!("4.9")), Some(ParentFilter::Eq(4)));
        assert_eq!(parent_filter(&json!(0)), None);
        assert_eq!(parent_filter(&json!("-2")), None);
        assert_eq!(parent_filter(&json!("")), None);
        assert_eq!(parent_filter(&json!(null)), None);
        assert_eq!(parent_filter(&json!(true)), None);
    }

    #[test]
    fn parent_indexed_object() {
        assert_eq!(
            parent_filter(&json!({"0": "5", "1": "x", "2": 9})),
            Some(ParentFilter::In(vec![5, 9]))
        );
    }

    #[test]
    fn empty_filter_is_omitted() {
        let query = compile(
            PostType::Topic,
            &params(json!({"meta_query": {"a": {"value": 1}}})),
        );
        assert!(query.meta_query.is_none());

        let json = serde_json::to_value(&query).unwrap();
        assert!(json.get("meta_query").is_none());
    }

    #[test]
    fn structured_filter_takes_precedence() {
        let query = compile(
            PostType::Topic,
            &params(json!({
                "meta_query": "{\"key\":\"color\",\"value\":\"red\"}",
                "meta_key": "status",
                "meta_value": "open"
            })),
        );
        assert_eq!(
            query.meta_query,
            Some(MetaQuery::Clause(MetaClause::new(
                "color",
                MetaValue::String("red".to_string())
            )))
        );
    }

    #[test]
    fn unusable_structured_filter_does_not_fall_back() {
        let query = compile(
            PostType::Topic,
            &params(json!({"meta_query": "not json", "meta_key": "status"})),
        );
        assert!(query.meta_query.is_none());
    }

    #[test]
    fn flat_parameters_used_without_structured_filter() {
        let query = compile(
            PostType::Reply,
            &params(json!({"meta_key": "status", "meta_value": "", "meta_compare": "exists"})),
        );
        let clause = match query.meta_query.unwrap() {
            MetaQuery::Clause(clause) => clause,
            other => panic!("expected clause, got {other:?}"),
        };
        assert_eq!(clause.key, "status");
        assert_eq!(clause.compare, MetaCompare::Exists);
        assert!(clause.value.is_none());
    }

    #[test]
    fn empty_meta_query_param_falls_back_to_flat() {
        let query = compile(
            PostType::Reply,
            &params(json!({"meta_query": "", "meta_key": "status"})),
        );
        assert!(query.meta_query.is_some());
    }

    #[test]
    fn paging_defaults_and_bounds() {
        let query = compile(PostType::Topic, &Map::new());
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, DEFAULT_PER_PAGE);

        let query = compile(
            PostType::Topic,
            &params(json!({"page": "3", "per_page": "500"})),
        );
        assert_eq!(query.page, 3);
        assert_eq!(query.per_page, MAX_PER_PAGE);

        let query = compile(PostType::Topic, &params(json!({"page": "0", "per_page": "-1"})));
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, DEFAULT_PER_PAGE);
    }

    #[test]
    fn orderby_is_restricted_per_kind() {
        let forum = compile(
            PostType::Forum,
            &params(json!({"orderby": "menu_order", "order": "ASC"})),
        );
        assert_eq!(forum.orderby, OrderBy::MenuOrder);
        assert_eq!(forum.order, SortDirection::Asc);

        let reply = compile(PostType::Reply, &params(json!({"orderby": "menu_order"})));
        assert_eq!(reply.orderby, OrderBy::Date);

        let topic = compile(
            PostType::Topic,
            &params(json!({"orderby": "_bbp_last_active_time"})),
        );
        assert_eq!(topic.orderby, OrderBy::LastActiveTime);
        assert_eq!(topic.order, SortDirection::Desc);
    }
}
