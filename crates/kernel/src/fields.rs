//! Response fields, registered metadata and schemas.
//!
//! Posts are rendered with a fixed set of core fields, the computed fields
//! of their kind, and the metadata keys registered for that kind.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value, json};

use crate::models::{Post, PostType};
use crate::query::{MetaCompare, MetaType, orderby_options};
use crate::query::types::{DEFAULT_PER_PAGE, MAX_PER_PAGE};

pub const LAST_ACTIVE_TIME: &str = "_bbp_last_active_time";
pub const REPLY_COUNT: &str = "_bbp_reply_count";
pub const REPLY_TO: &str = "_bbp_reply_to";
pub const FORUM_ID: &str = "_bbp_forum_id";
pub const FORUM_TYPE: &str = "_bbp_forum_type";
pub const ANONYMOUS_NAME: &str = "_bbp_anonymous_name";
pub const ANONYMOUS_EMAIL: &str = "_bbp_anonymous_email";

/// Stored representation of a metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    String,
    Integer,
}

impl MetaKind {
    fn schema_type(&self) -> &'static str {
        match self {
            MetaKind::String => "string",
            MetaKind::Integer => "integer",
        }
    }
}

/// Metadata key exposed through the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredMeta {
    pub key: &'static str,
    pub kind: MetaKind,
    pub description: &'static str,
    /// Only exposed while anonymous contributions are open to the caller.
    pub anonymous_only: bool,
    /// Accepted on write but never rendered.
    pub write_only: bool,
}

impl RegisteredMeta {
    pub fn new(key: &'static str, kind: MetaKind, description: &'static str) -> Self {
        Self {
            key,
            kind,
            description,
            anonymous_only: false,
            write_only: false,
        }
    }

    fn anonymous(mut self) -> Self {
        self.anonymous_only = true;
        self
    }

    fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }
}

/// Metadata keys registered per post kind.
#[derive(Debug, Clone, Default)]
pub struct MetaRegistry {
    fields: HashMap<PostType, Vec<RegisteredMeta>>,
}

impl MetaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the forum metadata keys.
    pub fn forum_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(
            PostType::Forum,
            RegisteredMeta::new(LAST_ACTIVE_TIME, MetaKind::String, "Time of the last activity."),
        );
        registry.register(
            PostType::Forum,
            RegisteredMeta::new(FORUM_TYPE, MetaKind::String, "Forum or category."),
        );
        registry.register(
            PostType::Topic,
            RegisteredMeta::new(LAST_ACTIVE_TIME, MetaKind::String, "Time of the last activity."),
        );
        registry.register(
            PostType::Topic,
            RegisteredMeta::new(REPLY_COUNT, MetaKind::Integer, "Number of replies."),
        );
        registry.register(
            PostType::Topic,
            RegisteredMeta::new(FORUM_ID, MetaKind::Integer, "The forum the topic belongs to."),
        );
        registry.register(
            PostType::Reply,
            RegisteredMeta::new(REPLY_TO, MetaKind::Integer, "The reply this one answers."),
        );

        for post_type in [PostType::Topic, PostType::Reply] {
            registry.register(
                post_type,
                RegisteredMeta::new(
                    ANONYMOUS_NAME,
                    MetaKind::String,
                    "The name of the author of the post.",
                )
                .anonymous(),
            );
            registry.register(
                post_type,
                RegisteredMeta::new(
                    ANONYMOUS_EMAIL,
                    MetaKind::String,
                    "The email of the author of the post.",
                )
                .anonymous()
                .write_only(),
            );
        }

        registry
    }

    pub fn register(&mut self, post_type: PostType, meta: RegisteredMeta) {
        let fields = self.fields.entry(post_type).or_default();
        if fields.iter().any(|existing| existing.key == meta.key) {
            tracing::warn!(post_type = %post_type, key = meta.key, "meta key registered twice");
            return;
        }
        fields.push(meta);
    }

    /// Keys visible for a kind.
    pub fn fields(
        &self,
        post_type: PostType,
        anonymous_visible: bool,
    ) -> impl Iterator<Item = &RegisteredMeta> {
        self.fields
            .get(&post_type)
            .into_iter()
            .flatten()
            .filter(move |meta| anonymous_visible || !meta.anonymous_only)
    }

    pub fn len(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last activity of a forum or topic as a UNIX timestamp.
///
/// Falls back to the post date, then to the epoch.
pub fn last_active_time(post: &Post) -> i64 {
    post.meta_value(LAST_ACTIVE_TIME)
        .and_then(parse_timestamp)
        .or_else(|| (post.created > 0).then_some(post.created))
        .unwrap_or(0)
}

/// Parse a stored date: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), a bare date or
/// a UNIX timestamp.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    raw.parse::<i64>().ok()
}

fn format_date(timestamp: i64) -> Value {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()))
        .unwrap_or(Value::Null)
}

fn meta_json(meta: &RegisteredMeta, raw: Option<&str>) -> Value {
    match (meta.kind, raw) {
        (MetaKind::Integer, Some(raw)) => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::from(0)),
        (MetaKind::Integer, None) => Value::from(0),
        (MetaKind::String, raw) => Value::String(raw.unwrap_or_default().to_string()),
    }
}

/// Render a post as a REST response object.
///
/// `reply_count` is only used for replies.
pub fn render_post(
    post: &Post,
    registry: &MetaRegistry,
    anonymous_visible: bool,
    reply_count: Option<i64>,
) -> Value {
    let mut body = Map::new();
    body.insert("id".into(), Value::from(post.id));
    body.insert("type".into(), Value::String(post.post_type.clone()));
    body.insert("date".into(), format_date(post.created));
    body.insert("title".into(), json!({"rendered": post.title}));
    body.insert("content".into(), json!({"rendered": post.content}));
    body.insert("author".into(), Value::from(post.author_id));
    body.insert("parent".into(), Value::from(post.parent));

    let Some(kind) = post.kind() else {
        return Value::Object(body);
    };

    if kind == PostType::Forum {
        body.insert("menu_order".into(), Value::from(post.menu_order));
    }
    if matches!(kind, PostType::Forum | PostType::Topic) {
        body.insert(LAST_ACTIVE_TIME.into(), Value::from(last_active_time(post)));
    }
    if kind == PostType::Reply {
        body.insert(REPLY_COUNT.into(), Value::from(reply_count.unwrap_or(0)));
    }

    let meta: Map<String, Value> = registry
        .fields(kind, anonymous_visible)
        .filter(|meta| !meta.write_only)
        .map(|meta| (meta.key.to_string(), meta_json(meta, post.meta_value(meta.key))))
        .collect();
    body.insert("meta".into(), Value::Object(meta));

    body.insert(
        "_links".into(),
        json!({"self": [{"href": kind.item_path(post.id.max(0) as u64)}]}),
    );

    Value::Object(body)
}

/// JSON schema of one post of `post_type`.
pub fn item_schema(post_type: PostType, registry: &MetaRegistry, anonymous_visible: bool) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "id".into(),
        json!({"description": "Unique identifier for the post.", "type": "integer", "readonly": true}),
    );
    properties.insert(
        "date".into(),
        json!({"description": "The date the post was published.", "type": "string", "format": "date-time"}),
    );
    properties.insert(
        "title".into(),
        json!({"description": "The title for the post.", "type": "object"}),
    );
    properties.insert(
        "content".into(),
        json!({"description": "The content for the post.", "type": "object"}),
    );
    properties.insert(
        "author".into(),
        json!({"description": "The ID for the author of the post.", "type": "integer"}),
    );
    properties.insert(
        "parent".into(),
        json!({"description": "The ID for the parent of the post.", "type": "integer"}),
    );

    match post_type {
        PostType::Forum => {
            properties.insert(
                "menu_order".into(),
                json!({"description": "Menu order", "type": "integer"}),
            );
        }
        PostType::Topic => {}
        PostType::Reply => {
            properties.insert(
                REPLY_COUNT.into(),
                json!({"type": "integer", "readonly": true}),
            );
        }
    }
    if matches!(post_type, PostType::Forum | PostType::Topic) {
        properties.insert(
            LAST_ACTIVE_TIME.into(),
            json!({"type": "integer", "readonly": true}),
        );
    }

    let meta: Map<String, Value> = registry
        .fields(post_type, anonymous_visible)
        .map(|meta| {
            let mut schema = json!({
                "type": meta.kind.schema_type(),
                "description": meta.description,
            });
            if meta.write_only {
                schema["context"] = json!(["edit"]);
            }
            (meta.key.to_string(), schema)
        })
        .collect();
    properties.insert(
        "meta".into(),
        json!({"description": "Meta fields.", "type": "object", "properties": meta}),
    );

    json!({
        "$schema": "http://json-schema.org/draft-04/schema#",
        "title": post_type.as_str(),
        "type": "object",
        "properties": properties,
    })
}

/// Parameters accepted by a collection listing.
pub fn collection_params(post_type: PostType) -> Value {
    let compares: Vec<&str> = MetaCompare::ALL.iter().map(MetaCompare::as_str).collect();
    let types: Vec<&str> = MetaType::ALL.iter().map(MetaType::as_str).collect();
    let orderby: Vec<&str> = orderby_options(post_type)
        .iter()
        .map(|option| option.as_str())
        .collect();

    json!({
        "page": {
            "description": "Current page of the collection.",
            "type": "integer",
            "default": 1,
            "minimum": 1,
        },
        "per_page": {
            "description": "Maximum number of items to be returned in result set.",
            "type": "integer",
            "default": DEFAULT_PER_PAGE,
            "minimum": 1,
            "maximum": MAX_PER_PAGE,
        },
        "order": {
            "description": "Order sort attribute ascending or descending.",
            "type": "string",
            "default": "desc",
            "enum": ["asc", "desc"],
        },
        "orderby": {
            "description": "Sort collection by post attribute.",
            "type": "string",
            "default": "date",
            "enum": orderby,
        },
        "parent": {
            "description": "Limit result set to items with particular parent IDs.",
            "type": ["integer", "array"],
            "items": {"type": "integer"},
        },
        "meta_key": {
            "description": "Limit results to posts with a specific meta key.",
            "type": "string",
        },
        "meta_value": {
            "description": "Limit results to posts where meta_key has this value.",
            "type": ["string", "number", "boolean", "array"],
        },
        "meta_compare": {
            "description": "Comparison operator for meta_value.",
            "type": "string",
            "enum": compares,
        },
        "meta_type": {
            "description": "Data type of meta_value for sorting and comparison.",
            "type": "string",
            "enum": types,
        },
        "meta_query": {
            "description": "Advanced meta query, as a JSON string or using meta_query[0][key]=... syntax, with an optional relation.",
            "type": ["array", "object", "string"],
        },
    })
}
