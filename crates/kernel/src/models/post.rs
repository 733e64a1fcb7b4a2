//! Post model.
//!
//! Forums, topics and replies share one record shape, distinguished by
//! `post_type`. Metadata lives in a separate key/value table and is attached
//! after loading.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Post kinds exposed through the REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Forum,
    Topic,
    Reply,
}

impl PostType {
    pub const ALL: [PostType; 3] = [PostType::Forum, PostType::Topic, PostType::Reply];

    /// Stored type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Forum => "forum",
            PostType::Topic => "topic",
            PostType::Reply => "reply",
        }
    }

    /// Collection path segment.
    pub fn rest_base(&self) -> &'static str {
        match self {
            PostType::Forum => "forums",
            PostType::Topic => "topics",
            PostType::Reply => "replies",
        }
    }

    pub fn from_rest_base(base: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.rest_base() == base)
    }

    /// Collection route, e.g. `/api/v1/topics`.
    pub fn collection_path(&self) -> String {
        format!("{API_PREFIX}/{}", self.rest_base())
    }

    /// Canonical URL path of one post, e.g. `/api/v1/topics/42`.
    pub fn item_path(&self, id: u64) -> String {
        format!("{API_PREFIX}/{}/{id}", self.rest_base())
    }
}

/// Mount point of the REST routes.
pub const API_PREFIX: &str = "/api/v1";

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown post type: {s}"))
    }
}

/// Post record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    /// Positive identifier.
    pub id: i64,

    /// Stored type name ("forum", "topic", "reply").
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub post_type: String,

    /// Parent post ID (0 for top level).
    pub parent: i64,

    pub title: String,

    pub content: String,

    /// Author user ID (0 for anonymous posts).
    pub author_id: i64,

    /// Unix timestamp when created.
    pub created: i64,

    /// Manual ordering weight.
    pub menu_order: i32,

    /// Metadata attached after loading.
    #[sqlx(skip)]
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl Post {
    /// Parsed post kind, if the stored type is one the API knows.
    pub fn kind(&self) -> Option<PostType> {
        self.post_type.parse().ok()
    }

    /// Metadata value, treating an empty string as missing.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
