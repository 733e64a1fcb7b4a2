//! Legacy handler seam.
//!
//! The legacy create/edit routines take no arguments and return nothing: they
//! read the staged [`LegacyContext`] and report through its error channel or
//! by redirecting to the resource they wrote.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::LegacyContext;
use crate::models::PostType;

/// Post kinds the legacy pipeline can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacySubtype {
    Topic,
    Reply,
}

impl LegacySubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacySubtype::Topic => "topic",
            LegacySubtype::Reply => "reply",
        }
    }

    pub fn post_type(&self) -> PostType {
        match self {
            LegacySubtype::Topic => PostType::Topic,
            LegacySubtype::Reply => PostType::Reply,
        }
    }
}

impl TryFrom<PostType> for LegacySubtype {
    type Error = PostType;

    fn try_from(post_type: PostType) -> Result<Self, Self::Error> {
        match post_type {
            PostType::Topic => Ok(LegacySubtype::Topic),
            PostType::Reply => Ok(LegacySubtype::Reply),
            other => Err(other),
        }
    }
}

impl fmt::Display for LegacySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One legacy write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyAction {
    NewTopic,
    NewReply,
    EditTopic(u64),
    EditReply(u64),
}

impl LegacyAction {
    pub fn create(subtype: LegacySubtype) -> Self {
        match subtype {
            LegacySubtype::Topic => LegacyAction::NewTopic,
            LegacySubtype::Reply => LegacyAction::NewReply,
        }
    }

    pub fn edit(subtype: LegacySubtype, id: u64) -> Self {
        match subtype {
            LegacySubtype::Topic => LegacyAction::EditTopic(id),
            LegacySubtype::Reply => LegacyAction::EditReply(id),
        }
    }

    pub fn subtype(&self) -> LegacySubtype {
        match self {
            LegacyAction::NewTopic | LegacyAction::EditTopic(_) => LegacySubtype::Topic,
            LegacyAction::NewReply | LegacyAction::EditReply(_) => LegacySubtype::Reply,
        }
    }

    /// ID of the post being edited; `None` for creation.
    pub fn target(&self) -> Option<u64> {
        match self {
            LegacyAction::NewTopic | LegacyAction::NewReply => None,
            LegacyAction::EditTopic(id) | LegacyAction::EditReply(id) => Some(*id),
        }
    }

    /// Action the request nonce is scoped to, e.g. `new-topic` or
    /// `edit-reply_42`.
    pub fn nonce_action(&self) -> String {
        match self.target() {
            None => format!("new-{}", self.subtype()),
            Some(id) => format!("edit-{}_{id}", self.subtype()),
        }
    }

    /// Action the unfiltered-markup nonce is scoped to, e.g.
    /// `unfiltered-html-topic_new` or `unfiltered-html-reply_42`.
    pub fn unfiltered_html_action(&self) -> String {
        match self.target() {
            None => format!("unfiltered-html-{}_new", self.subtype()),
            Some(id) => format!("unfiltered-html-{}_{id}", self.subtype()),
        }
    }

    /// Posted field carrying the unfiltered-markup nonce.
    pub fn unfiltered_html_field(&self) -> String {
        format!("_unfiltered_html_{}", self.subtype())
    }
}

/// The legacy create/edit routines.
///
/// Implementations may block; callers run the bridge off the async runtime.
pub trait LegacyHandlers: Send + Sync {
    fn new_topic(&self, ctx: &mut LegacyContext);

    fn new_reply(&self, ctx: &mut LegacyContext);

    fn edit_topic(&self, ctx: &mut LegacyContext);

    fn edit_reply(&self, ctx: &mut LegacyContext);
}

/// Invoke exactly one handler for the action.
pub(crate) fn dispatch(handlers: &dyn LegacyHandlers, action: LegacyAction, ctx: &mut LegacyContext) {
    match action {
        LegacyAction::NewTopic => handlers.new_topic(ctx),
        LegacyAction::NewReply => handlers.new_reply(ctx),
        LegacyAction::EditTopic(_) => handlers.edit_topic(ctx),
        LegacyAction::EditReply(_) => handlers.edit_reply(ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forums_are_not_writable() {
        assert_eq!(LegacySubtype::try_from(PostType::Forum), Err(PostType::Forum));
        assert_eq!(
            LegacySubtype::try_from(PostType::Reply),
            Ok(LegacySubtype::Reply)
        );
    }

    #[test]
    fn nonce_actions_are_scoped() {
        assert_eq!(LegacyAction::NewTopic.nonce_action(), "new-topic");
        assert_eq!(LegacyAction::EditReply(42).nonce_action(), "edit-reply_42");
        assert_eq!(
            LegacyAction::NewReply.unfiltered_html_action(),
            "unfiltered-html-reply_new"
        );
        assert_eq!(
            LegacyAction::EditTopic(9).unfiltered_html_action(),
            "unfiltered-html-topic_9"
        );
        assert_eq!(
            LegacyAction::EditTopic(9).unfiltered_html_field(),
            "_unfiltered_html_topic"
        );
    }
}
