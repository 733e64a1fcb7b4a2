//! Request identity and contribution policy.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Capability allowing markup to bypass the legacy handlers' sanitizer.
pub const UNFILTERED_HTML: &str = "unfiltered_html";

/// Identity of the caller.
///
/// The authentication layer in front of the kernel inserts this into the
/// request extensions; requests without one are anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// User ID (0 for anonymous).
    pub id: u64,
    /// Whether the user is authenticated.
    pub authenticated: bool,
    /// Capability tags held by the user.
    pub capabilities: HashSet<String>,
}

impl UserContext {
    /// Create context for anonymous user.
    pub fn anonymous() -> Self {
        Self {
            id: 0,
            authenticated: false,
            capabilities: HashSet::new(),
        }
    }

    /// Create context for authenticated user.
    pub fn authenticated<I, S>(id: u64, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            authenticated: true,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if user holds a capability.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Process-wide contribution policy.
///
/// Clones share the same flag, so a change is visible to every holder on
/// its next read.
#[derive(Debug, Clone, Default)]
pub struct ContributionPolicy {
    anonymous: Arc<AtomicBool>,
}

impl ContributionPolicy {
    pub fn new(anonymous_allowed: bool) -> Self {
        Self {
            anonymous: Arc::new(AtomicBool::new(anonymous_allowed)),
        }
    }

    /// Whether anonymous users may create topics and replies.
    pub fn anonymous_allowed(&self) -> bool {
        self.anonymous.load(Ordering::Acquire)
    }

    pub fn set_anonymous_allowed(&self, allowed: bool) {
        self.anonymous.store(allowed, Ordering::Release);
        tracing::info!(allowed, "anonymous contribution policy changed");
    }
}
