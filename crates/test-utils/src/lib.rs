//! Agora test utilities.
//!
//! Fixtures for integration testing: post records in their wire shape and
//! query-string builders for collection requests.

use std::collections::BTreeMap;

use serde_json::{Value as JsonValue, json};
use url::form_urlencoded;

/// Fixed creation time used by fixtures (2023-11-14T22:13:20Z).
pub const FIXTURE_CREATED: i64 = 1_700_000_000;

/// Create a test post with default values.
pub fn test_post(post_type: &str, id: i64, title: &str) -> TestPost {
    TestPost {
        id,
        post_type: post_type.to_string(),
        parent: 0,
        title: title.to_string(),
        content: String::new(),
        author_id: 1,
        created: FIXTURE_CREATED,
        menu_order: 0,
        meta: BTreeMap::new(),
    }
}

/// A test post builder for creating fixtures.
#[derive(Debug, Clone)]
pub struct TestPost {
    pub id: i64,
    pub post_type: String,
    pub parent: i64,
    pub title: String,
    pub content: String,
    pub author_id: i64,
    pub created: i64,
    pub menu_order: i32,
    pub meta: BTreeMap<String, String>,
}

impl TestPost {
    /// Set the parent post.
    pub fn with_parent(mut self, parent: i64) -> Self {
        self.parent = parent;
        self
    }

    /// Set the body.
    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    /// Set the author (0 for anonymous).
    pub fn with_author(mut self, author_id: i64) -> Self {
        self.author_id = author_id;
        self
    }

    /// Set the creation timestamp.
    pub fn created_at(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    /// Set the manual ordering weight.
    pub fn with_menu_order(mut self, menu_order: i32) -> Self {
        self.menu_order = menu_order;
        self
    }

    /// Add a metadata entry.
    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }

    /// The post as stored-record JSON.
    pub fn to_json(&self) -> JsonValue {
        json!({
            "id": self.id,
            "type": self.post_type,
            "parent": self.parent,
            "title": self.title,
            "content": self.content,
            "author_id": self.author_id,
            "created": self.created,
            "menu_order": self.menu_order,
            "meta": self.meta,
        })
    }
}

/// Encode `pairs` as a query string, bracket keys included.
pub fn query_string(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Bracket-encoded `meta_query` clauses with an optional relation.
pub fn meta_query_pairs(relation: Option<&str>, clauses: &[&[(&str, &str)]]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(relation) = relation {
        pairs.push(("meta_query[relation]".to_string(), relation.to_string()));
    }
    for (i, clause) in clauses.iter().enumerate() {
        for (field, value) in clause.iter() {
            pairs.push((format!("meta_query[{i}][{field}]"), value.to_string()));
        }
    }
    pairs
}

/// Path with an encoded query string.
pub fn with_query(path: &str, pairs: &[(String, String)]) -> String {
    let borrowed: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    format!("{path}?{}", query_string(&borrowed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_fixture_json() {
        let post = test_post("topic", 7, "Hello")
            .with_parent(2)
            .with_meta("_bbp_forum_id", "2");
        let json = post.to_json();

        assert_eq!(json["type"], "topic");
        assert_eq!(json["parent"], 2);
        assert_eq!(json["meta"]["_bbp_forum_id"], "2");
        assert_eq!(json["created"], FIXTURE_CREATED);
    }

    #[test]
    fn bracket_pairs() {
        let pairs = meta_query_pairs(Some("OR"), &[&[("key", "color"), ("value", "red")]]);
        assert_eq!(
            with_query("/x", &pairs),
            "/x?meta_query%5Brelation%5D=OR&meta_query%5B0%5D%5Bkey%5D=color&meta_query%5B0%5D%5Bvalue%5D=red"
        );
    }
}
