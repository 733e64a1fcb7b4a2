//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use sqlx::PgPool;
use tracing::info;

use crate::bridge::{LegacyBridge, LegacyHandlers, NonceIssuer};
use crate::config::Config;
use crate::fields::MetaRegistry;
use crate::init::{self, Registry};
use crate::permissions::ContributionPolicy;
use crate::query::{PgPostExecutor, PostQueryExecutor};
use crate::routes::RouteTable;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Collection and item reads.
    executor: Arc<dyn PostQueryExecutor>,

    /// Topic and reply writes.
    bridge: Arc<LegacyBridge>,

    /// Anonymous contribution policy, shared with the patched routes.
    policy: ContributionPolicy,

    /// Registered metadata keys.
    meta: MetaRegistry,

    /// Route permissions, checked by the permission middleware.
    routes: RwLock<RouteTable>,
}

impl AppState {
    /// Build state over a PostgreSQL pool and the given legacy handlers.
    pub fn new(config: &Config, pool: PgPool, handlers: Arc<dyn LegacyHandlers>) -> Result<Self> {
        let nonces = match &config.nonce_secret {
            Some(secret) => NonceIssuer::new(secret.as_bytes())?,
            None => {
                info!("NONCE_SECRET not set, using a per-process key");
                NonceIssuer::random()?
            }
        };

        let policy = ContributionPolicy::new(config.anonymous_contributions);
        let registry = init::bootstrap(policy).context("failed to initialize registry")?;

        Ok(Self::from_parts(
            Arc::new(PgPostExecutor::new(pool)),
            Arc::new(LegacyBridge::new(handlers, nonces)),
            registry,
        ))
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        executor: Arc<dyn PostQueryExecutor>,
        bridge: Arc<LegacyBridge>,
        registry: Registry,
    ) -> Self {
        let Registry {
            policy,
            meta,
            routes,
            ..
        } = registry;

        Self {
            inner: Arc::new(AppStateInner {
                executor,
                bridge,
                policy,
                meta,
                routes: RwLock::new(routes),
            }),
        }
    }

    pub fn executor(&self) -> &Arc<dyn PostQueryExecutor> {
        &self.inner.executor
    }

    pub fn bridge(&self) -> &Arc<LegacyBridge> {
        &self.inner.bridge
    }

    pub fn policy(&self) -> &ContributionPolicy {
        &self.inner.policy
    }

    pub fn meta(&self) -> &MetaRegistry {
        &self.inner.meta
    }

    pub fn routes(&self) -> &RwLock<RouteTable> {
        &self.inner.routes
    }

    /// Check if the backing store is reachable.
    pub async fn postgres_healthy(&self) -> bool {
        self.inner.executor.healthy().await
    }
}
