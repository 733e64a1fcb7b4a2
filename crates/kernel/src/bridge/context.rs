//! Ambient state shared with the legacy handlers.
//!
//! One [`LegacyContext`] lives inside the bridge. It is staged before each
//! handler call and reset afterwards, so no posted fields, nonces, errors or
//! redirects leak from one invocation into the next.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::handler::LegacyAction;
use super::nonce::NonceIssuer;
use crate::permissions::{UNFILTERED_HTML, UserContext};

/// Request field carrying the action nonce.
pub const NONCE_FIELD: &str = "_wpnonce";

/// Error reported by a legacy handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyError {
    pub code: String,
    pub message: String,
}

/// Errors accumulated during one handler call, in report order.
#[derive(Debug, Default)]
pub struct ErrorChannel {
    errors: Vec<LegacyError>,
}

impl ErrorChannel {
    pub fn add(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LegacyError {
            code: code.into(),
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// First reported error.
    pub fn first(&self) -> Option<&LegacyError> {
        self.errors.first()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    fn clear(&mut self) {
        self.errors.clear();
    }
}

/// Redirect captured from a successful handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub resource_id: u64,
    pub location: String,
}

/// State the legacy handlers read from and report into.
#[derive(Debug)]
pub struct LegacyContext {
    nonces: NonceIssuer,
    action: Option<LegacyAction>,
    user: UserContext,
    posted: Map<String, Value>,
    request: HashMap<String, String>,
    errors: ErrorChannel,
    redirect: Option<Redirect>,
}

impl LegacyContext {
    pub fn new(nonces: NonceIssuer) -> Self {
        Self {
            nonces,
            action: None,
            user: UserContext::anonymous(),
            posted: Map::new(),
            request: HashMap::new(),
            errors: ErrorChannel::default(),
            redirect: None,
        }
    }

    /// Stage posted fields, identity and nonces for one handler call.
    pub(crate) fn stage(&mut self, action: LegacyAction, fields: Map<String, Value>, user: UserContext) {
        self.reset();

        self.posted = fields;
        self.request.insert(
            NONCE_FIELD.to_string(),
            self.nonces.issue(&action.nonce_action(), user.id),
        );

        if user.has_capability(UNFILTERED_HTML) {
            let token = self.nonces.issue(&action.unfiltered_html_action(), user.id);
            self.posted
                .insert(action.unfiltered_html_field(), Value::String(token));
        }

        self.action = Some(action);
        self.user = user;
    }

    /// Clear everything staged or reported by the last call.
    pub(crate) fn reset(&mut self) {
        self.action = None;
        self.user = UserContext::anonymous();
        self.posted.clear();
        self.request.clear();
        self.errors.clear();
        self.redirect = None;
    }

    /// Action being performed, while staged.
    pub fn action(&self) -> Option<LegacyAction> {
        self.action
    }

    /// Acting user.
    pub fn user(&self) -> &UserContext {
        &self.user
    }

    /// All posted fields.
    pub fn posted(&self) -> &Map<String, Value> {
        &self.posted
    }

    /// One posted field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.posted.get(name)
    }

    /// Posted field as text; numbers are rendered, other shapes ignored.
    pub fn field_str(&self, name: &str) -> Option<String> {
        match self.posted.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Request-level value such as the action nonce.
    pub fn request_value(&self, name: &str) -> Option<&str> {
        self.request.get(name).map(String::as_str)
    }

    /// Consume the request nonce and check it against `action`.
    pub fn verify_request_nonce(&mut self, action: &str) -> bool {
        match self.request.remove(NONCE_FIELD) {
            Some(token) => self.nonces.verify(&token, action, self.user.id),
            None => false,
        }
    }

    /// Consume a nonce posted in `field` and check it against `action`.
    pub fn verify_posted_nonce(&mut self, field: &str, action: &str) -> bool {
        match self.posted.remove(field) {
            Some(Value::String(token)) => self.nonces.verify(&token, action, self.user.id),
            _ => false,
        }
    }

    /// Report an error.
    pub fn add_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.errors.add(code, message);
    }

    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    /// Redirect to the written post.
    ///
    /// The bridge turns this into the REST response instead of a browser
    /// redirect. Calls outside a staged invocation are ignored.
    pub fn redirect(&mut self, resource_id: u64) {
        let Some(action) = self.action else {
            tracing::warn!(resource_id, "redirect outside a legacy invocation ignored");
            return;
        };

        self.redirect = Some(Redirect {
            resource_id,
            location: action.subtype().post_type().item_path(resource_id),
        });
    }

    pub(crate) fn take_redirect(&mut self) -> Option<Redirect> {
        self.redirect.take()
    }
}
