//! Meta query types.
//!
//! Provides the validated vocabulary shared by the normalizer, the compiler
//! and the SQL builder:
//! - MetaCompare / MetaType: allow-listed operators and value types
//! - MetaClause: one key/compare/value/type condition
//! - MetaQuery: a single clause or an AND/OR group of clauses
//! - CollectionQuery: the compiled query handed to the executor

use serde::{Deserialize, Serialize};

/// Comparison operators accepted in a meta clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaCompare {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "BETWEEN")]
    Between,
    #[serde(rename = "NOT BETWEEN")]
    NotBetween,
    #[serde(rename = "EXISTS")]
    Exists,
    #[serde(rename = "NOT EXISTS")]
    NotExists,
    #[serde(rename = "REGEXP")]
    Regexp,
    #[serde(rename = "NOT REGEXP")]
    NotRegexp,
    #[serde(rename = "RLIKE")]
    Rlike,
}

impl MetaCompare {
    /// Every operator, in the order they are advertised to clients.
    pub const ALL: [MetaCompare; 17] = [
        MetaCompare::Eq,
        MetaCompare::NotEq,
        MetaCompare::Gt,
        MetaCompare::Gte,
        MetaCompare::Lt,
        MetaCompare::Lte,
        MetaCompare::Like,
        MetaCompare::NotLike,
        MetaCompare::In,
        MetaCompare::NotIn,
        MetaCompare::Between,
        MetaCompare::NotBetween,
        MetaCompare::Exists,
        MetaCompare::NotExists,
        MetaCompare::Regexp,
        MetaCompare::NotRegexp,
        MetaCompare::Rlike,
    ];

    /// Canonical wire/SQL spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaCompare::Eq => "=",
            MetaCompare::NotEq => "!=",
            MetaCompare::Gt => ">",
            MetaCompare::Gte => ">=",
            MetaCompare::Lt => "<",
            MetaCompare::Lte => "<=",
            MetaCompare::Like => "LIKE",
            MetaCompare::NotLike => "NOT LIKE",
            MetaCompare::In => "IN",
            MetaCompare::NotIn => "NOT IN",
            MetaCompare::Between => "BETWEEN",
            MetaCompare::NotBetween => "NOT BETWEEN",
            MetaCompare::Exists => "EXISTS",
            MetaCompare::NotExists => "NOT EXISTS",
            MetaCompare::Regexp => "REGEXP",
            MetaCompare::NotRegexp => "NOT REGEXP",
            MetaCompare::Rlike => "RLIKE",
        }
    }

    /// Validate a client-supplied operator.
    ///
    /// Matching is case-insensitive. Besides the canonical spellings, the
    /// mnemonics `eq`, `ne`/`neq`, `gt`, `gte`, `lt` and `lte` are accepted.
    /// Anything else yields `None` and must be dropped by the caller.
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();

        let alias = match upper.as_str() {
            "EQ" => Some(MetaCompare::Eq),
            "NE" | "NEQ" => Some(MetaCompare::NotEq),
            "GT" => Some(MetaCompare::Gt),
            "GTE" => Some(MetaCompare::Gte),
            "LT" => Some(MetaCompare::Lt),
            "LTE" => Some(MetaCompare::Lte),
            _ => None,
        };

        alias.or_else(|| Self::ALL.into_iter().find(|op| op.as_str() == upper))
    }

    /// Whether the operator ignores the clause value.
    pub fn is_existence(&self) -> bool {
        matches!(self, MetaCompare::Exists | MetaCompare::NotExists)
    }
}

/// Value type used to cast the stored meta value before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetaType {
    Numeric,
    Binary,
    Char,
    Date,
    Datetime,
    Decimal,
    Signed,
    Unsigned,
    Time,
}

impl MetaType {
    pub const ALL: [MetaType; 9] = [
        MetaType::Numeric,
        MetaType::Binary,
        MetaType::Char,
        MetaType::Date,
        MetaType::Datetime,
        MetaType::Decimal,
        MetaType::Signed,
        MetaType::Unsigned,
        MetaType::Time,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetaType::Numeric => "NUMERIC",
            MetaType::Binary => "BINARY",
            MetaType::Char => "CHAR",
            MetaType::Date => "DATE",
            MetaType::Datetime => "DATETIME",
            MetaType::Decimal => "DECIMAL",
            MetaType::Signed => "SIGNED",
            MetaType::Unsigned => "UNSIGNED",
            MetaType::Time => "TIME",
        }
    }

    /// Validate a client-supplied type tag (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        Self::ALL.into_iter().find(|ty| ty.as_str() == upper)
    }

    /// Whether values compared under this type are numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            MetaType::Numeric | MetaType::Decimal | MetaType::Signed | MetaType::Unsigned
        )
    }
}

/// Boolean relation joining the clauses of a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relation {
    #[default]
    And,
    Or,
}

impl Relation {
    /// Parse a relation, falling back to AND for anything unrecognized.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_uppercase()).as_deref() {
            Some("OR") => Relation::Or,
            _ => Relation::And,
        }
    }
}

/// Clause value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<MetaValue>),
}

impl MetaValue {
    /// Convert a JSON value. `null` and objects have no clause representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(MetaValue::Boolean(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(MetaValue::Integer)
                .or_else(|| n.as_f64().map(MetaValue::Float)),
            serde_json::Value::String(s) => Some(MetaValue::String(s.clone())),
            serde_json::Value::Array(items) => Some(MetaValue::List(
                items.iter().filter_map(MetaValue::from_json).collect(),
            )),
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
        }
    }

    /// Scalar text form, as stored meta values are compared when untyped.
    pub fn as_text(&self) -> Option<String> {
        match self {
            MetaValue::Boolean(b) => Some(if *b { "1" } else { "" }.to_string()),
            MetaValue::Integer(i) => Some(i.to_string()),
            MetaValue::Float(f) => Some(f.to_string()),
            MetaValue::String(s) => Some(s.clone()),
            MetaValue::List(_) => None,
        }
    }

    /// Scalar numeric form.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetaValue::Integer(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            MetaValue::String(s) => s.trim().parse().ok(),
            MetaValue::List(_) => None,
        }
    }

    /// List elements; a scalar is a one-element list, `"a, b"` splits on commas.
    pub fn items(&self) -> Vec<MetaValue> {
        match self {
            MetaValue::List(items) => items.clone(),
            MetaValue::String(s) if s.contains(',') => s
                .split(',')
                .map(|part| MetaValue::String(part.trim().to_string()))
                .collect(),
            other => vec![other.clone()],
        }
    }
}

/// A single validated meta condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaClause {
    /// Meta key; never empty.
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<MetaValue>,

    #[serde(default)]
    pub compare: MetaCompare,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub meta_type: Option<MetaType>,
}

impl MetaClause {
    /// Clause comparing `key` for equality with `value`.
    pub fn new(key: impl Into<String>, value: MetaValue) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            compare: MetaCompare::Eq,
            meta_type: None,
        }
    }
}

/// Canonical filter tree.
///
/// A group always holds at least two clauses; fewer collapse via
/// [`MetaQuery::from_clauses`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaQuery {
    Group {
        relation: Relation,
        clauses: Vec<MetaClause>,
    },
    Clause(MetaClause),
}

impl MetaQuery {
    /// Collapse an ordered clause list: none → `None`, one → that clause,
    /// more → a relation group.
    pub fn from_clauses(relation: Relation, mut clauses: Vec<MetaClause>) -> Option<Self> {
        match clauses.len() {
            0 => None,
            1 => clauses.pop().map(MetaQuery::Clause),
            _ => Some(MetaQuery::Group { relation, clauses }),
        }
    }

    /// Relation and clause list, treating a single clause as an AND of one.
    pub fn parts(&self) -> (Relation, &[MetaClause]) {
        match self {
            MetaQuery::Group { relation, clauses } => (*relation, clauses.as_slice()),
            MetaQuery::Clause(clause) => (Relation::And, std::slice::from_ref(clause)),
        }
    }
}

/// Parent restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentFilter {
    Eq(u64),
    In(Vec<u64>),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Sortable columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBy {
    #[default]
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "id")]
    Id,
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "parent")]
    Parent,
    #[serde(rename = "menu_order")]
    MenuOrder,
    #[serde(rename = "_bbp_last_active_time")]
    LastActiveTime,
}

impl OrderBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderBy::Date => "date",
            OrderBy::Id => "id",
            OrderBy::Title => "title",
            OrderBy::Parent => "parent",
            OrderBy::MenuOrder => "menu_order",
            OrderBy::LastActiveTime => "_bbp_last_active_time",
        }
    }
}

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

/// Compiled collection query handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub post_type: crate::models::PostType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentFilter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_query: Option<MetaQuery>,

    pub page: u32,
    pub per_page: u32,
    pub orderby: OrderBy,
    pub order: SortDirection,
}

impl CollectionQuery {
    /// Unfiltered first page for a post kind.
    pub fn new(post_type: crate::models::PostType) -> Self {
        Self {
            post_type,
            parent: None,
            meta_query: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            orderby: OrderBy::Date,
            order: SortDirection::Desc,
        }
    }
}
