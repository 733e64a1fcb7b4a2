//! Post collection query engine.
//!
//! This module provides:
//! - Types: MetaCompare, MetaType, MetaClause, MetaQuery, CollectionQuery
//! - Clause builder and filter tree normalizer for client meta filters
//! - Compiler from request parameters to a CollectionQuery
//! - PostQueryBuilder: SeaQuery-based SQL generation
//! - PostQueryExecutor: execution seam, with a PostgreSQL implementation

mod clause;
mod compiler;
mod executor;
mod normalize;
mod query_builder;
pub mod types;

pub use clause::build_clause;
pub use compiler::{coerce_int, compile, meta_filter, orderby_options, parent_filter};
pub use executor::{PgPostExecutor, PostPage, PostQueryExecutor};
pub use normalize::{FilterInput, FlatMetaParams, normalize, normalize_flat};
pub use query_builder::PostQueryBuilder;
pub(crate) use query_builder::{POSTMETA, POSTS};
pub use types::{
    CollectionQuery, MetaClause, MetaCompare, MetaQuery, MetaType, MetaValue, OrderBy,
    ParentFilter, Relation, SortDirection,
};
