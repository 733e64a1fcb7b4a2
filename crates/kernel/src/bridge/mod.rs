//! Legacy handler bridge.
//!
//! Topic and reply writes are performed by legacy handlers that read a
//! request from ambient state and report through an error channel. The
//! bridge stages a [`LegacyContext`] from a REST request, invokes exactly one
//! handler, and turns the context's outcome into a typed result.
//!
//! Invocations are serialized: the context sits behind a mutex held for the
//! whole stage, invoke and read sequence, and is reset when the sequence ends.

mod context;
mod handler;
mod nonce;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use axum::http::StatusCode;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub use context::{ErrorChannel, LegacyContext, LegacyError, NONCE_FIELD, Redirect};
pub use handler::{LegacyAction, LegacyHandlers, LegacySubtype};
pub use nonce::NonceIssuer;

use crate::permissions::UserContext;

/// Posted field holding the forum a topic or reply belongs to.
pub const FORUM_ID_FIELD: &str = "forum_id";

/// One write request for the legacy pipeline.
#[derive(Debug, Clone)]
pub struct LegacyBridgeRequest {
    pub subtype: LegacySubtype,
    /// Client-supplied ID on create; target ID on update.
    pub resource_id: Option<i64>,
    pub fields: Map<String, Value>,
    pub user: UserContext,
    /// Forum reference of the stored post, for updates.
    pub inherited_forum_id: Option<i64>,
}

impl LegacyBridgeRequest {
    pub fn new(subtype: LegacySubtype, fields: Map<String, Value>, user: UserContext) -> Self {
        Self {
            subtype,
            resource_id: None,
            fields,
            user,
            inherited_forum_id: None,
        }
    }

    pub fn with_resource_id(mut self, id: i64) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_inherited_forum_id(mut self, forum_id: Option<i64>) -> Self {
        self.inherited_forum_id = forum_id;
        self
    }
}

/// Successful bridge outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum BridgeOutcome {
    Created {
        resource_id: u64,
        #[serde(skip)]
        location: String,
    },
    Updated {
        resource_id: u64,
        #[serde(skip)]
        location: String,
    },
}

impl BridgeOutcome {
    pub fn resource_id(&self) -> u64 {
        match self {
            BridgeOutcome::Created { resource_id, .. } | BridgeOutcome::Updated { resource_id, .. } => {
                *resource_id
            }
        }
    }

    /// REST location of the written post.
    pub fn location(&self) -> &str {
        match self {
            BridgeOutcome::Created { location, .. } | BridgeOutcome::Updated { location, .. } => {
                location
            }
        }
    }
}

/// Bridge failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Create was called with a client-supplied ID.
    #[error("Cannot create existing post.")]
    PostExists,

    /// Update was called without a usable target ID.
    #[error("Invalid post ID.")]
    InvalidId,

    /// A handler reported a business-rule failure.
    #[error("{message}")]
    Handler { code: String, message: String },

    /// A handler returned without reporting an error or redirecting.
    #[error("Unreachable control structure reached.")]
    Unreachable,
}

impl BridgeError {
    pub fn code(&self) -> &str {
        match self {
            BridgeError::PostExists => "rest_post_exists",
            BridgeError::InvalidId => "rest_post_invalid_id",
            BridgeError::Handler { code, .. } => code,
            BridgeError::Unreachable => "control_structure_unreachable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::PostExists | BridgeError::InvalidId => StatusCode::BAD_REQUEST,
            BridgeError::Handler { .. } => StatusCode::FORBIDDEN,
            BridgeError::Unreachable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Whether a posted `id` names an existing post.
///
/// Only null, `false`, zero, `""`, `"0"` and empty collections count as
/// absent. Anything else is client-supplied, whether or not it parses.
fn is_supplied_id(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Invocation phases, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Idle,
    Staging,
    Invoking,
    ReadingOutcome,
    Success,
    Failure,
}

/// Locked context for one invocation; resets the context when dropped.
struct Invocation<'a> {
    ctx: MutexGuard<'a, LegacyContext>,
}

impl Deref for Invocation<'_> {
    type Target = LegacyContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl DerefMut for Invocation<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ctx
    }
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        self.ctx.reset();
        tracing::debug!(phase = ?BridgePhase::Idle, "legacy context reset");
    }
}

/// Adapter between REST writes and the legacy handlers.
pub struct LegacyBridge {
    handlers: Arc<dyn LegacyHandlers>,
    context: Mutex<LegacyContext>,
}

impl LegacyBridge {
    pub fn new(handlers: Arc<dyn LegacyHandlers>, nonces: NonceIssuer) -> Self {
        Self {
            handlers,
            context: Mutex::new(LegacyContext::new(nonces)),
        }
    }

    /// Create a topic or reply through the legacy pipeline.
    pub fn create(&self, request: LegacyBridgeRequest) -> Result<BridgeOutcome, BridgeError> {
        let posted_id = request.fields.get("id").filter(|id| is_supplied_id(id));
        if request.resource_id.is_some_and(|id| id != 0) || posted_id.is_some() {
            tracing::debug!(
                resource_id = ?request.resource_id,
                posted_id = ?posted_id,
                subtype = %request.subtype,
                "create with existing id rejected"
            );
            return Err(BridgeError::PostExists);
        }

        let action = LegacyAction::create(request.subtype);
        let redirect = self.invoke(action, request.fields, request.user)?;

        Ok(BridgeOutcome::Created {
            resource_id: redirect.resource_id,
            location: redirect.location,
        })
    }

    /// Edit a topic or reply through the legacy pipeline.
    pub fn update(&self, request: LegacyBridgeRequest) -> Result<BridgeOutcome, BridgeError> {
        let id = request
            .resource_id
            .filter(|id| *id > 0)
            .ok_or(BridgeError::InvalidId)? as u64;

        let mut fields = request.fields;
        fields.insert("id".to_string(), Value::from(id));
        if let Some(forum_id) = request.inherited_forum_id {
            fields
                .entry(FORUM_ID_FIELD)
                .or_insert_with(|| Value::from(forum_id));
        }

        let action = LegacyAction::edit(request.subtype, id);
        let redirect = self.invoke(action, fields, request.user)?;

        Ok(BridgeOutcome::Updated {
            resource_id: redirect.resource_id,
            location: redirect.location,
        })
    }

    fn invoke(
        &self,
        action: LegacyAction,
        fields: Map<String, Value>,
        user: UserContext,
    ) -> Result<Redirect, BridgeError> {
        let mut ctx = Invocation {
            ctx: self.context.lock(),
        };

        tracing::debug!(phase = ?BridgePhase::Staging, ?action, user = user.id, "staging legacy request");
        ctx.stage(action, fields, user);

        tracing::debug!(phase = ?BridgePhase::Invoking, ?action, "invoking legacy handler");
        handler::dispatch(self.handlers.as_ref(), action, &mut ctx);

        tracing::debug!(
            phase = ?BridgePhase::ReadingOutcome,
            errors = ctx.errors().len(),
            "reading legacy outcome"
        );

        if let Some(error) = ctx.errors().first() {
            tracing::info!(
                phase = ?BridgePhase::Failure,
                code = %error.code,
                message = %error.message,
                ?action,
                "legacy handler rejected request"
            );
            return Err(BridgeError::Handler {
                code: error.code.clone(),
                message: error.message.clone(),
            });
        }

        match ctx.take_redirect() {
            Some(redirect) => {
                tracing::debug!(
                    phase = ?BridgePhase::Success,
                    resource_id = redirect.resource_id,
                    "legacy handler succeeded"
                );
                Ok(redirect)
            }
            None => {
                tracing::error!(
                    ?action,
                    "legacy handler returned without an error or a redirect"
                );
                Err(BridgeError::Unreachable)
            }
        }
    }
}
