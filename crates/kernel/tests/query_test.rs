#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Query compilation tests through the public API.

use serde_json::{Map, Value, json};

use agora_kernel::models::PostType;
use agora_kernel::query::{
    FilterInput, MetaCompare, MetaQuery, MetaType, MetaValue, PostQueryBuilder, Relation, compile,
    normalize,
};
use agora_kernel::routes::params::parse_query;

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn encoded_and_structured_filters_agree() {
    let text = r#"[{"key":"color","value":"red"},{"key":"size","compare":">","value":3,"type":"numeric"}]"#;
    let encoded = normalize(FilterInput::Encoded(text.to_string()));
    let structured = normalize(FilterInput::Structured(serde_json::from_str(text).unwrap()));

    assert_eq!(encoded, structured);
    let (relation, clauses) = encoded.as_ref().unwrap().parts();
    assert_eq!(relation, Relation::And);
    assert_eq!(clauses[1].compare, MetaCompare::Gt);
    assert_eq!(clauses[1].meta_type, Some(MetaType::Numeric));
}

#[test]
fn bracket_query_string_filter() {
    let raw = "meta_query%5Brelation%5D=OR\
               &meta_query%5B0%5D%5Bmeta_key%5D=status\
               &meta_query%5B0%5D%5Bmeta_value%5D=closed\
               &meta_query%5B1%5D%5Bkey%5D=status\
               &meta_query%5B1%5D%5Bcompare%5D=NOT%20EXISTS";

    let query = compile(PostType::Topic, &parse_query(raw));
    let Some(MetaQuery::Group { relation, clauses }) = query.meta_query else {
        panic!("expected a group");
    };

    assert_eq!(relation, Relation::Or);
    assert_eq!(clauses.len(), 2);
    assert_eq!(clauses[0].value, Some(MetaValue::String("closed".to_string())));
    assert_eq!(clauses[1].compare, MetaCompare::NotExists);
}

#[test]
fn single_valid_clause_collapses() {
    let query = compile(
        PostType::Reply,
        &params(json!({"meta_query": [{"key": ""}, {"key": "kept", "value": ""}]})),
    );

    let Some(MetaQuery::Clause(clause)) = query.meta_query else {
        panic!("expected a single clause");
    };
    assert_eq!(clause.key, "kept");
    assert_eq!(clause.value, Some(MetaValue::String(String::new())));
}

#[test]
fn invalid_operator_falls_back_to_equality() {
    let query = compile(
        PostType::Forum,
        &params(json!({"meta_key": "k", "meta_value": "v", "meta_compare": "; DROP"})),
    );

    let Some(MetaQuery::Clause(clause)) = query.meta_query else {
        panic!("expected a single clause");
    };
    assert_eq!(clause.compare, MetaCompare::Eq);
}

#[test]
fn compiled_query_pages_and_sorts() {
    let query = compile(
        PostType::Topic,
        &params(json!({
            "parent": ["4", "9"],
            "meta_query": {"key": "color", "value": "red"},
            "orderby": "title",
            "order": "asc",
            "per_page": "5",
            "page": "3"
        })),
    );

    let sql = PostQueryBuilder::new(&query).build();
    assert!(sql.contains("LIMIT 5"));
    assert!(sql.contains("OFFSET 10"));
    assert!(sql.contains("ASC"));
    assert!(sql.contains("'color'"));

    let count = PostQueryBuilder::new(&query).build_count();
    assert!(count.contains("COUNT"));
    assert!(!count.contains("LIMIT"));
}
