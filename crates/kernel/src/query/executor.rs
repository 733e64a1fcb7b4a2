//! Query execution.
//!
//! The kernel only compiles queries; running them is delegated to a
//! [`PostQueryExecutor`]. [`PgPostExecutor`] is the PostgreSQL implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::query_builder::PostQueryBuilder;
use super::types::CollectionQuery;
use crate::models::{Post, PostType};

/// One page of posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl PostPage {
    /// Create a page with the total page count derived from `total`.
    pub fn new(posts: Vec<Post>, total: u64, page: u32, per_page: u32) -> Self {
        let total_pages = if per_page > 0 {
            total.div_ceil(u64::from(per_page)) as u32
        } else {
            1
        };

        Self {
            posts,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

/// Backing store for post queries.
#[async_trait]
pub trait PostQueryExecutor: Send + Sync {
    /// Run a compiled collection query.
    async fn query(&self, query: &CollectionQuery) -> Result<PostPage>;

    /// Load one post of the given kind with its metadata.
    async fn find(&self, post_type: PostType, id: i64) -> Result<Option<Post>>;

    /// Number of replies whose `_bbp_reply_to` meta points at each of
    /// `reply_ids`. Replies nothing points at may be left out.
    async fn reply_counts(&self, reply_ids: &[i64]) -> Result<HashMap<i64, i64>>;

    /// Whether the backing store is reachable.
    async fn healthy(&self) -> bool;
}

/// PostgreSQL executor over the `posts`/`postmeta` tables.
#[derive(Clone)]
pub struct PgPostExecutor {
    pool: PgPool,
}

impl PgPostExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_meta(&self, posts: &mut [Post]) -> Result<()> {
        if posts.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT post_id, meta_key, meta_value FROM postmeta WHERE post_id = ANY($1) ORDER BY meta_id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("failed to load post meta")?;

        let mut by_post: HashMap<i64, HashMap<String, String>> = HashMap::new();
        for (post_id, key, value) in rows {
            // First stored value wins, as single-valued meta reads do.
            by_post.entry(post_id).or_default().entry(key).or_insert(value);
        }

        for post in posts.iter_mut() {
            if let Some(meta) = by_post.remove(&post.id) {
                post.meta = meta;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl PostQueryExecutor for PgPostExecutor {
    async fn query(&self, query: &CollectionQuery) -> Result<PostPage> {
        let builder = PostQueryBuilder::new(query);

        let sql = builder.build();
        tracing::debug!(%sql, "executing post query");

        let mut posts: Vec<Post> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .context("failed to execute post query")?;

        let total: i64 = sqlx::query_scalar(&builder.build_count())
            .fetch_one(&self.pool)
            .await
            .context("failed to count posts")?;

        self.attach_meta(&mut posts).await?;

        Ok(PostPage::new(
            posts,
            total.max(0) as u64,
            query.page,
            query.per_page,
        ))
    }

    async fn find(&self, post_type: PostType, id: i64) -> Result<Option<Post>> {
        let post: Option<Post> = sqlx::query_as(
            "SELECT id, type, parent, title, content, author_id, created, menu_order FROM posts WHERE id = $1 AND type = $2",
        )
        .bind(id)
        .bind(post_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load post")?;

        let Some(post) = post else {
            return Ok(None);
        };

        let mut posts = [post];
        self.attach_meta(&mut posts).await?;
        let [post] = posts;
        Ok(Some(post))
    }

    async fn reply_counts(&self, reply_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        if reply_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let targets: Vec<String> = reply_ids.iter().map(i64::to_string).collect();
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT meta_value, COUNT(*) FROM postmeta WHERE meta_key = '_bbp_reply_to' AND meta_value = ANY($1) GROUP BY meta_value",
        )
        .bind(&targets)
        .fetch_all(&self.pool)
        .await
        .context("failed to count replies")?;

        Ok(rows
            .into_iter()
            .filter_map(|(target, count)| target.parse::<i64>().ok().map(|id| (id, count)))
            .collect())
    }

    async fn healthy(&self) -> bool {
        crate::db::check_health(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        let page = PostPage::new(vec![], 25, 2, 10);
        assert_eq!(page.total_pages, 3);

        let page = PostPage::new(vec![], 0, 1, 10);
        assert_eq!(page.total_pages, 0);
    }
}
