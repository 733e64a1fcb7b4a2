#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Tests drive the REAL kernel router, middleware, compiler and bridge.
//! Only the two external collaborators are replaced: the post store
//! ([`MemoryExecutor`]) and the legacy handlers ([`ScriptedHandlers`]).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agora_test_utils::TestPost;
use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use tower::ServiceExt;

use agora_kernel::bridge::{LegacyBridge, LegacyContext, LegacyHandlers, NonceIssuer};
use agora_kernel::init;
use agora_kernel::models::{Post, PostType};
use agora_kernel::permissions::{ContributionPolicy, UserContext};
use agora_kernel::query::{CollectionQuery, ParentFilter, PostPage, PostQueryExecutor};
use agora_kernel::routes;
use agora_kernel::state::AppState;

/// In-memory post store.
///
/// Filters by kind and parent only; meta filters are recorded, not applied.
#[derive(Default)]
pub struct MemoryExecutor {
    posts: Mutex<Vec<Post>>,
    queries: Mutex<Vec<CollectionQuery>>,
    count_calls: Mutex<usize>,
}

impl MemoryExecutor {
    pub fn insert(&self, post: TestPost) {
        let post: Post = serde_json::from_value(post.to_json()).unwrap();
        self.posts.lock().unwrap().push(post);
    }

    /// Number of reply-count lookups made.
    pub fn count_calls(&self) -> usize {
        *self.count_calls.lock().unwrap()
    }

    /// Last compiled query received.
    pub fn last_query(&self) -> Option<CollectionQuery> {
        self.queries.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PostQueryExecutor for MemoryExecutor {
    async fn query(&self, query: &CollectionQuery) -> Result<PostPage> {
        self.queries.lock().unwrap().push(query.clone());

        let matching: Vec<Post> = self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.kind() == Some(query.post_type))
            .filter(|p| match &query.parent {
                None => true,
                Some(ParentFilter::Eq(id)) => p.parent == *id as i64,
                Some(ParentFilter::In(ids)) => ids.contains(&(p.parent as u64)),
            })
            .cloned()
            .collect();

        let total = matching.len() as u64;
        let skip = ((query.page - 1) * query.per_page) as usize;
        let posts = matching
            .into_iter()
            .skip(skip)
            .take(query.per_page as usize)
            .collect();

        Ok(PostPage::new(posts, total, query.page, query.per_page))
    }

    async fn find(&self, post_type: PostType, id: i64) -> Result<Option<Post>> {
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id && p.kind() == Some(post_type))
            .cloned())
    }

    async fn reply_counts(&self, reply_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        *self.count_calls.lock().unwrap() += 1;

        let mut counts = HashMap::new();
        for post in self.posts.lock().unwrap().iter() {
            let Some(target) = post.meta_value("_bbp_reply_to").and_then(|v| v.parse().ok())
            else {
                continue;
            };
            if reply_ids.contains(&target) {
                *counts.entry(target).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn healthy(&self) -> bool {
        true
    }
}

/// What the scripted handlers do when called.
#[derive(Debug, Clone)]
pub enum Script {
    /// Redirect to the edited post, or to this ID on create.
    Redirect(u64),
    /// Report these errors in order.
    Errors(Vec<(&'static str, &'static str)>),
    /// Return without reporting anything.
    Silent,
}

/// A handler call as the handler saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub posted: Map<String, Value>,
    pub user: UserContext,
    pub nonce_valid: bool,
}

/// Legacy handler double.
pub struct ScriptedHandlers {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedHandlers {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn handle(&self, method: &'static str, ctx: &mut LegacyContext) {
        let action = ctx.action().unwrap();
        let nonce_valid = ctx.verify_request_nonce(&action.nonce_action());
        self.calls.lock().unwrap().push(Call {
            method,
            posted: ctx.posted().clone(),
            user: ctx.user().clone(),
            nonce_valid,
        });

        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Redirect(id) => ctx.redirect(action.target().unwrap_or(id)),
            Script::Errors(errors) => {
                for (code, message) in errors {
                    ctx.add_error(code, message);
                }
            }
            Script::Silent => {}
        }
    }
}

impl LegacyHandlers for ScriptedHandlers {
    fn new_topic(&self, ctx: &mut LegacyContext) {
        self.handle("new_topic", ctx);
    }

    fn new_reply(&self, ctx: &mut LegacyContext) {
        self.handle("new_reply", ctx);
    }

    fn edit_topic(&self, ctx: &mut LegacyContext) {
        self.handle("edit_topic", ctx);
    }

    fn edit_reply(&self, ctx: &mut LegacyContext) {
        self.handle("edit_reply", ctx);
    }
}

/// Test application wrapper using the REAL kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<MemoryExecutor>,
    pub handlers: Arc<ScriptedHandlers>,
    pub policy: ContributionPolicy,
}

impl TestApp {
    pub fn new(script: Script) -> Self {
        Self::with_policy(script, false)
    }

    pub fn with_policy(script: Script, anonymous_allowed: bool) -> Self {
        let store = Arc::new(MemoryExecutor::default());
        let handlers = ScriptedHandlers::new(script);
        let policy = ContributionPolicy::new(anonymous_allowed);

        let registry = init::bootstrap(policy.clone()).unwrap();
        let bridge = Arc::new(LegacyBridge::new(
            handlers.clone(),
            NonceIssuer::new(b"integration-tests").unwrap(),
        ));
        let state = AppState::from_parts(store.clone(), bridge, registry);

        Self {
            router: routes::app(state.clone()),
            state,
            store,
            handlers,
            policy,
        }
    }

    /// Send a request as `user` and return status, headers and JSON body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<UserContext>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };

        let mut request = builder.body(body).unwrap();
        if let Some(user) = user {
            request.extensions_mut().insert(user);
        }

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, headers, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Value) {
        self.send(Method::GET, uri, None, None).await
    }
}

/// An authenticated member without special capabilities.
pub fn member(id: u64) -> UserContext {
    UserContext::authenticated(id, Vec::<String>::new())
}
