//! Route permission table.
//!
//! Every REST route is registered here with one or more endpoint
//! descriptors, each pairing a set of HTTP methods with a permission
//! predicate. The permission middleware looks requests up by matched route
//! path and method.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use crate::permissions::{ContributionPolicy, UserContext};

/// Permission predicate evaluated against the caller.
pub type PermissionCheck = Arc<dyn Fn(&UserContext) -> bool + Send + Sync>;

/// Methods and permission of one endpoint on a route.
#[derive(Clone)]
pub struct EndpointDescriptor {
    pub methods: HashSet<Method>,
    pub permission: PermissionCheck,
}

impl EndpointDescriptor {
    pub fn new<I, F>(methods: I, permission: F) -> Self
    where
        I: IntoIterator<Item = Method>,
        F: Fn(&UserContext) -> bool + Send + Sync + 'static,
    {
        Self {
            methods: methods.into_iter().collect(),
            permission: Arc::new(permission),
        }
    }

    /// Endpoint open to everyone.
    pub fn public<I: IntoIterator<Item = Method>>(methods: I) -> Self {
        Self::new(methods, |_| true)
    }

    /// Endpoint requiring an authenticated caller.
    pub fn authenticated<I: IntoIterator<Item = Method>>(methods: I) -> Self {
        Self::new(methods, |user: &UserContext| user.authenticated)
    }

    pub fn handles(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    pub fn permits(&self, user: &UserContext) -> bool {
        (self.permission)(user)
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("EndpointDescriptor")
            .field("methods", &methods)
            .finish_non_exhaustive()
    }
}

/// Route path to endpoint descriptors.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Vec<EndpointDescriptor>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint to a route.
    pub fn register(&mut self, path: impl Into<String>, endpoint: EndpointDescriptor) {
        self.routes.entry(path.into()).or_default().push(endpoint);
    }

    /// Endpoint handling `method` on `path`.
    pub fn endpoint(&self, path: &str, method: &Method) -> Option<&EndpointDescriptor> {
        self.routes
            .get(path)?
            .iter()
            .find(|endpoint| endpoint.handles(method))
    }

    /// Whether `user` may call `method` on `path`.
    ///
    /// Returns `None` when the table has no endpoint for the pair.
    pub fn check(&self, path: &str, method: &Method, user: &UserContext) -> Option<bool> {
        self.endpoint(path, method)
            .map(|endpoint| endpoint.permits(user))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn endpoints_mut(&mut self, path: &str) -> Option<&mut Vec<EndpointDescriptor>> {
        self.routes.get_mut(path)
    }
}

/// Let anonymous callers reach the POST endpoints of `path` while the
/// policy allows it.
///
/// Every descriptor under `path` whose methods include POST gets a predicate
/// accepting authenticated callers, or anyone while the policy's anonymous
/// flag is set. The flag is read on each check, not at patch time. Other
/// descriptors and routes are left alone. Returns the number of descriptors
/// replaced.
pub fn patch_anonymous_writes(
    table: &mut RouteTable,
    path: &str,
    policy: &ContributionPolicy,
) -> usize {
    let Some(endpoints) = table.endpoints_mut(path) else {
        tracing::debug!(path, "no route to patch for anonymous writes");
        return 0;
    };

    let mut patched = 0;
    for endpoint in endpoints.iter_mut().filter(|e| e.handles(&Method::POST)) {
        let policy = policy.clone();
        endpoint.permission =
            Arc::new(move |user: &UserContext| user.authenticated || policy.anonymous_allowed());
        patched += 1;
    }

    tracing::debug!(path, patched, "patched POST endpoints for anonymous writes");
    patched
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const TOPICS: &str = "/api/v1/topics";

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table.register(
            TOPICS,
            EndpointDescriptor::public([Method::GET, Method::OPTIONS]),
        );
        table.register(TOPICS, EndpointDescriptor::authenticated([Method::POST]));
        table.register(
            "/api/v1/forums",
            EndpointDescriptor::public([Method::GET]),
        );
        table.register(
            "/api/v1/topics/{id}",
            EndpointDescriptor::authenticated([Method::POST, Method::PUT]),
        );
        table
    }

    #[test]
    fn lookup_by_method() {
        let table = table();
        let anon = UserContext::anonymous();

        assert_eq!(table.check(TOPICS, &Method::GET, &anon), Some(true));
        assert_eq!(table.check(TOPICS, &Method::POST, &anon), Some(false));
        assert_eq!(table.check(TOPICS, &Method::DELETE, &anon), None);
        assert_eq!(table.check("/nowhere", &Method::GET, &anon), None);
    }

    #[test]
    fn patched_post_follows_policy_at_call_time() {
        let mut table = table();
        let policy = ContributionPolicy::new(false);
        let anon = UserContext::anonymous();

        assert_eq!(patch_anonymous_writes(&mut table, TOPICS, &policy), 1);
        assert_eq!(table.check(TOPICS, &Method::POST, &anon), Some(false));

        policy.set_anonymous_allowed(true);
        assert_eq!(table.check(TOPICS, &Method::POST, &anon), Some(true));

        policy.set_anonymous_allowed(false);
        assert_eq!(table.check(TOPICS, &Method::POST, &anon), Some(false));

        let member = UserContext::authenticated(4, Vec::<String>::new());
        assert_eq!(table.check(TOPICS, &Method::POST, &member), Some(true));
    }

    #[test]
    fn other_routes_untouched() {
        let mut table = table();
        let policy = ContributionPolicy::new(true);
        let anon = UserContext::anonymous();

        patch_anonymous_writes(&mut table, TOPICS, &policy);

        assert_eq!(
            table.check("/api/v1/topics/{id}", &Method::POST, &anon),
            Some(false)
        );
        assert_eq!(table.check(TOPICS, &Method::GET, &anon), Some(true));
    }

    #[test]
    fn get_only_route_untouched() {
        let mut table = RouteTable::new();
        table.register(
            "/api/v1/forums",
            EndpointDescriptor::new([Method::GET], |user: &UserContext| user.id == 1),
        );
        let policy = ContributionPolicy::new(true);

        assert_eq!(patch_anonymous_writes(&mut table, "/api/v1/forums", &policy), 0);

        let anon = UserContext::anonymous();
        assert_eq!(
            table.check("/api/v1/forums", &Method::GET, &anon),
            Some(false)
        );
    }

    #[test]
    fn unknown_path_is_noop() {
        let mut table = table();
        let policy = ContributionPolicy::new(true);
        assert_eq!(patch_anonymous_writes(&mut table, "/api/v1/pages", &policy), 0);
        assert_eq!(table.len(), 3);
    }
}
