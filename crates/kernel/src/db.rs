//! Database pool and schema checks.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;
use crate::query::{POSTMETA, POSTS};

/// Create a PostgreSQL connection pool.
///
/// Legacy writes hold a connection for the whole handler call, so waiting
/// for one is bounded rather than left to the default.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Fail fast when the forum tables are missing.
pub async fn verify_schema(pool: &PgPool) -> Result<()> {
    for table in [POSTS, POSTMETA] {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to look up table {table}"))?;

        if !exists {
            bail!("table {table} does not exist");
        }
    }
    Ok(())
}

/// Check that the post store answers.
pub async fn check_health(pool: &PgPool) -> bool {
    sqlx::query(&format!("SELECT 1 FROM {POSTS} LIMIT 1"))
        .execute(pool)
        .await
        .is_ok()
}
