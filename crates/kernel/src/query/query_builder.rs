//! Post query builder using SeaQuery.
//!
//! Renders a [`CollectionQuery`] against the `posts`/`postmeta` schema:
//! - each meta clause becomes an EXISTS subquery on `postmeta`
//! - relation groups become AND/OR conditions
//! - typed clauses cast the stored text value before comparing; values that
//!   do not have the shape of the type compare as NULL instead of failing
//! - parent, ordering and pagination map onto `posts` columns

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sea_query::{
    Alias, Asterisk, Cond, Expr, Order, PostgresQueryBuilder, Query, SelectStatement,
    SimpleExpr, Value,
};

use super::types::{
    CollectionQuery, MetaClause, MetaCompare, MetaType, MetaValue, OrderBy, ParentFilter,
    Relation, SortDirection,
};

pub(crate) const POSTS: &str = "posts";
pub(crate) const POSTMETA: &str = "postmeta";
const META_ALIAS: &str = "pm";

/// Columns selected for a post row.
const POST_COLUMNS: [&str; 8] = [
    "id",
    "type",
    "parent",
    "title",
    "content",
    "author_id",
    "created",
    "menu_order",
];

/// Query builder for post collections.
pub struct PostQueryBuilder<'a> {
    query: &'a CollectionQuery,
}

impl<'a> PostQueryBuilder<'a> {
    pub fn new(query: &'a CollectionQuery) -> Self {
        Self { query }
    }

    /// Build the page SELECT.
    pub fn build(&self) -> String {
        let mut select = Query::select();

        for column in POST_COLUMNS {
            select.column((Alias::new(POSTS), Alias::new(column)));
        }
        select.from(Alias::new(POSTS));

        self.add_conditions(&mut select);
        self.add_sorts(&mut select);

        let per_page = u64::from(self.query.per_page);
        let offset = u64::from(self.query.page.saturating_sub(1)) * per_page;
        select.limit(per_page);
        select.offset(offset);

        select.to_string(PostgresQueryBuilder)
    }

    /// Build a COUNT query for the total number of matches.
    pub fn build_count(&self) -> String {
        let mut select = Query::select();
        select.expr(Expr::col(Asterisk).count());
        select.from(Alias::new(POSTS));
        self.add_conditions(&mut select);
        select.to_string(PostgresQueryBuilder)
    }

    fn add_conditions(&self, select: &mut SelectStatement) {
        select.and_where(posts_col("type").eq(self.query.post_type.as_str()));

        match &self.query.parent {
            Some(ParentFilter::Eq(id)) => {
                select.and_where(posts_col("parent").eq(*id as i64));
            }
            Some(ParentFilter::In(ids)) => {
                select.and_where(posts_col("parent").is_in(ids.iter().map(|id| *id as i64)));
            }
            None => {}
        }

        if let Some(meta_query) = &self.query.meta_query {
            let (relation, clauses) = meta_query.parts();
            let mut cond = match relation {
                Relation::And => Cond::all(),
                Relation::Or => Cond::any(),
            };
            for clause in clauses {
                match clause_condition(clause) {
                    Some(expr) => cond = cond.add(expr),
                    None => {
                        // A clause the schema cannot express must restrict, not widen.
                        tracing::debug!(
                            key = %clause.key,
                            compare = clause.compare.as_str(),
                            "meta clause not expressible; matching nothing"
                        );
                        cond = cond.add(Expr::cust("FALSE"));
                    }
                }
            }
            select.cond_where(cond);
        }
    }

    fn add_sorts(&self, select: &mut SelectStatement) {
        let order = match self.query.order {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };

        let column = match self.query.orderby {
            OrderBy::Date => "created",
            OrderBy::Id => "id",
            OrderBy::Title => "title",
            OrderBy::Parent => "parent",
            OrderBy::MenuOrder => "menu_order",
            OrderBy::LastActiveTime => {
                select.order_by_expr(
                    Expr::cust(format!(
                        "(SELECT m.meta_value FROM {POSTMETA} m WHERE m.post_id = {POSTS}.id AND m.meta_key = '_bbp_last_active_time' LIMIT 1)"
                    )),
                    order.clone(),
                );
                select.order_by((Alias::new(POSTS), Alias::new("id")), order);
                return;
            }
        };

        select.order_by((Alias::new(POSTS), Alias::new(column)), order.clone());
        if column != "id" {
            select.order_by((Alias::new(POSTS), Alias::new("id")), order);
        }
    }
}

fn posts_col(name: &str) -> Expr {
    Expr::col((Alias::new(POSTS), Alias::new(name)))
}

fn meta_col(name: &str) -> Expr {
    Expr::col((Alias::new(META_ALIAS), Alias::new(name)))
}

/// EXISTS subquery matching one meta clause.
fn clause_condition(clause: &MetaClause) -> Option<SimpleExpr> {
    let mut sub = Query::select();
    sub.expr(Expr::val(1))
        .from_as(Alias::new(POSTMETA), Alias::new(META_ALIAS))
        .and_where(meta_col("post_id").equals((Alias::new(POSTS), Alias::new("id"))))
        .and_where(meta_col("meta_key").eq(clause.key.clone()));

    if clause.compare.is_existence() {
        let exists = Expr::exists(sub.to_owned());
        return Some(match clause.compare {
            MetaCompare::NotExists => exists.not(),
            _ => exists,
        });
    }

    sub.and_where(value_condition(clause)?);
    Some(Expr::exists(sub.to_owned()))
}

/// Comparison between the (possibly cast) stored value and the clause value.
fn value_condition(clause: &MetaClause) -> Option<SimpleExpr> {
    let value = clause.value.as_ref()?;
    let numeric = clause.meta_type.is_some_and(|t| t.is_numeric());
    let scalar = |v: &MetaValue| -> Option<Value> {
        if numeric {
            return v.as_f64().map(Value::from);
        }
        let text = v.as_text()?;
        match clause.meta_type {
            Some(ty @ (MetaType::Date | MetaType::Datetime | MetaType::Time)) => {
                temporal_literal(ty, &text).map(Value::from)
            }
            _ => Some(Value::from(text)),
        }
    };
    let target = || stored_value_expr(clause.meta_type);

    let expr = match clause.compare {
        MetaCompare::Eq => target().eq(scalar(value)?),
        MetaCompare::NotEq => target().ne(scalar(value)?),
        MetaCompare::Gt => target().gt(scalar(value)?),
        MetaCompare::Gte => target().gte(scalar(value)?),
        MetaCompare::Lt => target().lt(scalar(value)?),
        MetaCompare::Lte => target().lte(scalar(value)?),
        MetaCompare::Like => {
            target().like(format!("%{}%", escape_like_wildcards(&value.as_text()?)))
        }
        MetaCompare::NotLike => {
            target().not_like(format!("%{}%", escape_like_wildcards(&value.as_text()?)))
        }
        MetaCompare::In | MetaCompare::NotIn => {
            let values: Vec<Value> = value.items().iter().filter_map(&scalar).collect();
            if values.is_empty() {
                return None;
            }
            if clause.compare == MetaCompare::In {
                target().is_in(values)
            } else {
                target().is_not_in(values)
            }
        }
        MetaCompare::Between | MetaCompare::NotBetween => {
            let items = value.items();
            let [low, high] = items.as_slice() else {
                return None;
            };
            let (low, high) = (scalar(low)?, scalar(high)?);
            if clause.compare == MetaCompare::Between {
                target().between(low, high)
            } else {
                target().not_between(low, high)
            }
        }
        MetaCompare::Regexp | MetaCompare::Rlike | MetaCompare::NotRegexp => {
            let pattern = value.as_text()?;
            let op = if clause.compare == MetaCompare::NotRegexp {
                "!~"
            } else {
                "~"
            };
            Expr::cust_with_values(
                format!("\"{META_ALIAS}\".\"meta_value\" {op} $1"),
                [pattern],
            )
        }
        MetaCompare::Exists | MetaCompare::NotExists => return None,
    };

    Some(expr)
}

/// Stored value, cast to the clause type when it has one.
///
/// The cast only runs on text matching the type's shape; anything else is
/// NULL and fails every comparison.
fn stored_value_expr(meta_type: Option<MetaType>) -> Expr {
    match meta_type.and_then(pg_cast) {
        Some((pg_type, shape)) => Expr::expr(Expr::cust(format!(
            "CASE WHEN \"{META_ALIAS}\".\"meta_value\" ~ '{shape}' \
             THEN CAST(\"{META_ALIAS}\".\"meta_value\" AS {pg_type}) END"
        ))),
        None => meta_col("meta_value"),
    }
}

const DECIMAL_SHAPE: &str =
    r"^[[:space:]]*[-+]?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][-+]?[0-9]{1,3})?[[:space:]]*$";
const SIGNED_SHAPE: &str = r"^[[:space:]]*[-+]?[0-9]{1,18}[[:space:]]*$";
const UNSIGNED_SHAPE: &str = r"^[[:space:]]*\+?[0-9]{1,18}[[:space:]]*$";
const DATE_SHAPE: &str = r"^[0-9]{4}-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])([ T]([01][0-9]|2[0-3]):[0-5][0-9](:[0-5][0-9](\.[0-9]{1,6})?)?)?$";
const TIME_SHAPE: &str = r"^([01][0-9]|2[0-3]):[0-5][0-9](:[0-5][0-9](\.[0-9]{1,6})?)?$";

/// Postgres type and accepted text shape for a meta type. CHAR and BINARY
/// compare as stored text.
fn pg_cast(meta_type: MetaType) -> Option<(&'static str, &'static str)> {
    match meta_type {
        MetaType::Numeric => Some(("NUMERIC", DECIMAL_SHAPE)),
        MetaType::Decimal => Some(("DECIMAL", DECIMAL_SHAPE)),
        MetaType::Signed => Some(("BIGINT", SIGNED_SHAPE)),
        MetaType::Unsigned => Some(("BIGINT", UNSIGNED_SHAPE)),
        MetaType::Date => Some(("DATE", DATE_SHAPE)),
        MetaType::Datetime => Some(("TIMESTAMP", DATE_SHAPE)),
        MetaType::Time => Some(("TIME", TIME_SHAPE)),
        MetaType::Char | MetaType::Binary => None,
    }
}

/// Canonical literal for a client date, datetime or time value.
///
/// Unparseable values yield `None` so the clause matches nothing.
fn temporal_literal(meta_type: MetaType, raw: &str) -> Option<String> {
    let raw = raw.trim();
    let datetime = || {
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
    };

    match meta_type {
        MetaType::Date => datetime().map(|dt| dt.format("%Y-%m-%d").to_string()),
        MetaType::Datetime => datetime().map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        MetaType::Time => ["%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
            .map(|time| time.format("%H:%M:%S").to_string()),
        _ => Some(raw.to_string()),
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::PostType;
    use crate::query::types::MetaQuery;

    fn clause(key: &str, compare: MetaCompare, value: Option<MetaValue>) -> MetaClause {
        MetaClause {
            key: key.to_string(),
            value,
            compare,
            meta_type: None,
        }
    }

    fn with_meta(meta_query: MetaQuery) -> CollectionQuery {
        CollectionQuery {
            meta_query: Some(meta_query),
            ..CollectionQuery::new(PostType::Topic)
        }
    }

    #[test]
    fn unfiltered_page() {
        let query = CollectionQuery::new(PostType::Topic);
        let sql = PostQueryBuilder::new(&query).build();

        assert!(sql.contains("FROM \"posts\""), "{sql}");
        assert!(sql.contains("\"type\" = 'topic'"), "{sql}");
        assert!(sql.contains("LIMIT 10"), "{sql}");
        assert!(sql.contains("OFFSET 0"), "{sql}");
        assert!(sql.contains("ORDER BY \"posts\".\"created\" DESC"), "{sql}");
        assert!(!sql.contains("postmeta"), "{sql}");
    }

    #[test]
    fn pagination_offset() {
        let query = CollectionQuery {
            page: 3,
            per_page: 20,
            ..CollectionQuery::new(PostType::Reply)
        };
        let sql = PostQueryBuilder::new(&query).build();
        assert!(sql.contains("LIMIT 20"), "{sql}");
        assert!(sql.contains("OFFSET 40"), "{sql}");
    }

    #[test]
    fn parent_single_uses_equals() {
        let query = CollectionQuery {
            parent: Some(ParentFilter::Eq(5)),
            ..CollectionQuery::new(PostType::Topic)
        };
        let sql = PostQueryBuilder::new(&query).build_count();
        assert!(sql.contains("\"parent\" = 5"), "{sql}");
        assert!(sql.contains("COUNT(*)"), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");
    }

    #[test]
    fn parent_set_uses_in() {
        let query = CollectionQuery {
            parent: Some(ParentFilter::In(vec![3, 7])),
            ..CollectionQuery::new(PostType::Topic)
        };
        let sql = PostQueryBuilder::new(&query).build();
        assert!(sql.contains("\"parent\" IN (3, 7)"), "{sql}");
    }

    #[test]
    fn equality_clause_is_exists_subquery() {
        let query = with_meta(MetaQuery::Clause(MetaClause::new(
            "color",
            MetaValue::String("red".to_string()),
        )));
        let sql = PostQueryBuilder::new(&query).build();

        assert!(sql.contains("EXISTS (SELECT 1 FROM \"postmeta\" AS \"pm\""), "{sql}");
        assert!(sql.contains("\"meta_key\" = 'color'"), "{sql}");
        assert!(sql.contains("\"meta_value\" = 'red'"), "{sql}");
    }

    #[test]
    fn or_group_joins_with_or() {
        let query = with_meta(
            MetaQuery::from_clauses(
                Relation::Or,
                vec![
                    MetaClause::new("color", MetaValue::String("red".to_string())),
                    MetaClause::new("size", MetaValue::String("xl".to_string())),
                ],
            )
            .unwrap(),
        );
        let sql = PostQueryBuilder::new(&query).build();
        assert!(sql.contains(" OR "), "{sql}");
    }

    #[test]
    fn not_exists_negates_subquery() {
        let query = with_meta(MetaQuery::Clause(clause(
            "closed",
            MetaCompare::NotExists,
            None,
        )));
        let sql = PostQueryBuilder::new(&query).build();
        assert!(sql.contains("NOT EXISTS"), "{sql}");
        assert!(!sql.contains("\"meta_value\""), "{sql}");
    }

    #[test]
    fn numeric_type_casts_stored_value() {
        let mut typed = clause("size", MetaCompare::Gte, Some(MetaValue::Integer(10)));
        typed.meta_type = Some(MetaType::Numeric);
        let sql = PostQueryBuilder::new(&with_meta(MetaQuery::Clause(typed))).build();

        assert!(sql.contains("THEN CAST(\"pm\".\"meta_value\" AS NUMERIC) END"), "{sql}");
        assert!(sql.contains(">="), "{sql}");
    }

    /// Postgres POSIX classes used here behave the same under `regex`.
    fn shape_matcher(pattern: &str) -> impl Fn(&str) -> bool {
        let re = regex::Regex::new(pattern).unwrap();
        move |text: &str| re.is_match(text)
    }

    #[test]
    fn typed_cast_only_runs_on_matching_shape() {
        let mut typed = clause(
            "_bbp_last_active_time",
            MetaCompare::Gt,
            Some(MetaValue::Integer(5)),
        );
        typed.meta_type = Some(MetaType::Numeric);
        let sql = PostQueryBuilder::new(&with_meta(MetaQuery::Clause(typed))).build();

        assert!(
            sql.contains("CASE WHEN \"pm\".\"meta_value\" ~ '^[[:space:]]*[-+]?"),
            "{sql}"
        );

        let shape = shape_matcher(DECIMAL_SHAPE);
        assert!(shape("5"));
        assert!(shape(" -12.50 "));
        assert!(!shape("2024-01-01 10:00:00"));
        assert!(!shape(""));
    }

    #[test]
    fn date_shapes() {
        let date = shape_matcher(DATE_SHAPE);
        assert!(date("2024-01-01"));
        assert!(date("2024-01-01 10:00:00"));
        assert!(!date("2024-13-01"));
        assert!(!date("yesterday"));

        let time = shape_matcher(TIME_SHAPE);
        assert!(time("23:59:59"));
        assert!(!time("24:00"));
    }

    #[test]
    fn temporal_values_are_normalized_or_dropped() {
        assert_eq!(
            temporal_literal(MetaType::Date, "2024-02-03 04:05:06").as_deref(),
            Some("2024-02-03")
        );
        assert_eq!(
            temporal_literal(MetaType::Datetime, "2024-02-03").as_deref(),
            Some("2024-02-03 00:00:00")
        );
        assert_eq!(temporal_literal(MetaType::Time, "07:30").as_deref(), Some("07:30:00"));
        assert_eq!(temporal_literal(MetaType::Date, "soon"), None);

        let mut typed = clause("due", MetaCompare::Lt, Some(MetaValue::String("soon".into())));
        typed.meta_type = Some(MetaType::Date);
        let sql = PostQueryBuilder::new(&with_meta(MetaQuery::Clause(typed))).build();
        assert!(sql.contains("FALSE"), "{sql}");
        assert!(!sql.contains("'soon'"), "{sql}");
    }

    #[test]
    fn in_clause_lists_values() {
        let sql = PostQueryBuilder::new(&with_meta(MetaQuery::Clause(clause(
            "tag",
            MetaCompare::In,
            Some(MetaValue::String("a,b".to_string())),
        ))))
        .build();
        assert!(sql.contains("IN ('a', 'b')"), "{sql}");
    }

    #[test]
    fn between_requires_two_values() {
        let sql = PostQueryBuilder::new(&with_meta(MetaQuery::Clause(clause(
            "size",
            MetaCompare::Between,
            Some(MetaValue::List(vec![MetaValue::Integer(1)])),
        ))))
        .build();
        assert!(sql.contains("FALSE"), "{sql}");
    }

    #[test]
    fn like_escapes_wildcards() {
        let sql = PostQueryBuilder::new(&with_meta(MetaQuery::Clause(clause(
            "title",
            MetaCompare::Like,
            Some(MetaValue::String("100%".to_string())),
        ))))
        .build();
        assert!(sql.contains("LIKE"), "{sql}");
        assert!(!sql.contains("'%100%%'"), "{sql}");
    }

    #[test]
    fn regexp_uses_tilde() {
        let sql = PostQueryBuilder::new(&with_meta(MetaQuery::Clause(clause(
            "slug",
            MetaCompare::NotRegexp,
            Some(MetaValue::String("^draft".to_string())),
        ))))
        .build();
        assert!(sql.contains("!~ '^draft'"), "{sql}");
    }

    #[test]
    fn last_active_ordering_uses_meta_subselect() {
        let query = CollectionQuery {
            orderby: OrderBy::LastActiveTime,
            ..CollectionQuery::new(PostType::Forum)
        };
        let sql = PostQueryBuilder::new(&query).build();
        assert!(sql.contains("_bbp_last_active_time"), "{sql}");
    }

    #[test]
    fn escape_like_wildcards_function() {
        assert_eq!(escape_like_wildcards("a_b"), "a\\_b");
        assert_eq!(escape_like_wildcards("100%"), "100\\%");
    }
}
