//! PostgreSQL legacy handlers.
//!
//! Default [`LegacyHandlers`] for the `agora` binary. Each handler checks
//! its nonce, validates the posted fields, writes the post and its metadata,
//! and redirects to the written post. Failures are reported through the
//! context's error channel.
//!
//! Handlers block on the database; the bridge must be driven from a blocking
//! thread (`tokio::task::spawn_blocking`), never from an async task.

use std::future::Future;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use tokio::runtime::Handle;

use crate::bridge::{LegacyAction, LegacyContext, LegacyHandlers, LegacySubtype};
use crate::fields::{ANONYMOUS_EMAIL, ANONYMOUS_NAME, FORUM_ID, LAST_ACTIVE_TIME, REPLY_COUNT, REPLY_TO};

/// Capability allowing edits of other users' posts.
pub const MODERATE: &str = "moderate";

/// Validated fields of a new or edited post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub title: Option<String>,
    pub content: Option<String>,
    pub parent: i64,
    pub forum_id: Option<i64>,
    pub reply_to: Option<i64>,
    pub anonymous_name: Option<String>,
    pub anonymous_email: Option<String>,
}

/// Legacy handlers writing to the `posts`/`postmeta` tables.
#[derive(Clone)]
pub struct PgLegacyHandlers {
    pool: PgPool,
    runtime: Handle,
}

impl PgLegacyHandlers {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    fn block_on<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.runtime.block_on(fut)
    }

    fn create(&self, ctx: &mut LegacyContext, subtype: LegacySubtype) {
        let action = LegacyAction::create(subtype);
        if !ctx.verify_request_nonce(&action.nonce_action()) {
            ctx.add_error(
                format!("bbp_new_{subtype}_nonce"),
                "Are you sure you wanted to do that?",
            );
            return;
        }

        let Some(draft) = validate_new(ctx, subtype) else {
            return;
        };
        let author = ctx.user().id as i64;

        match self.block_on(insert_post(&self.pool, subtype, author, &draft)) {
            Ok(id) => {
                tracing::info!(id, %subtype, author, "legacy post created");
                ctx.redirect(id as u64);
            }
            Err(e) => {
                tracing::error!(error = %e, %subtype, "failed to create post");
                ctx.add_error(
                    format!("bbp_{subtype}_error"),
                    format!("The {subtype} could not be created."),
                );
            }
        }
    }

    fn edit(&self, ctx: &mut LegacyContext, subtype: LegacySubtype) {
        let Some(id) = ctx.action().and_then(|action| action.target()) else {
            ctx.add_error(format!("bbp_edit_{subtype}_id"), format!("{subtype} ID not found."));
            return;
        };
        let action = LegacyAction::edit(subtype, id);

        if !ctx.verify_request_nonce(&action.nonce_action()) {
            ctx.add_error(
                format!("bbp_edit_{subtype}_nonce"),
                "Are you sure you wanted to do that?",
            );
            return;
        }

        let author = match self.block_on(post_author(&self.pool, id as i64)) {
            Ok(Some(author)) => author,
            Ok(None) => {
                ctx.add_error(format!("bbp_edit_{subtype}_id"), format!("{subtype} ID not found."));
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, id, "failed to load post author");
                ctx.add_error(format!("bbp_edit_{subtype}_error"), "The post could not be loaded.");
                return;
            }
        };

        let user = ctx.user();
        let may_edit = user.authenticated
            && (user.id as i64 == author || user.has_capability(MODERATE));
        if !may_edit {
            ctx.add_error(
                format!("bbp_edit_{subtype}_permission"),
                format!("Sorry, you are not allowed to edit that {subtype}."),
            );
            return;
        }

        let Some(draft) = validate_edit(ctx, subtype) else {
            return;
        };

        match self.block_on(update_post(&self.pool, id as i64, &draft)) {
            Ok(()) => {
                tracing::info!(id, %subtype, "legacy post edited");
                ctx.redirect(id);
            }
            Err(e) => {
                tracing::error!(error = %e, id, "failed to edit post");
                ctx.add_error(
                    format!("bbp_edit_{subtype}_error"),
                    format!("The {subtype} could not be updated."),
                );
            }
        }
    }
}

impl LegacyHandlers for PgLegacyHandlers {
    fn new_topic(&self, ctx: &mut LegacyContext) {
        self.create(ctx, LegacySubtype::Topic);
    }

    fn new_reply(&self, ctx: &mut LegacyContext) {
        self.create(ctx, LegacySubtype::Reply);
    }

    fn edit_topic(&self, ctx: &mut LegacyContext) {
        self.edit(ctx, LegacySubtype::Topic);
    }

    fn edit_reply(&self, ctx: &mut LegacyContext) {
        self.edit(ctx, LegacySubtype::Reply);
    }
}

/// Text of a posted field given as a string or as `{"raw": ...}`.
fn text_field(ctx: &LegacyContext, name: &str) -> Option<String> {
    let text = match ctx.field(name)? {
        Value::String(s) => s.clone(),
        Value::Object(map) => map.get("raw")?.as_str()?.to_string(),
        _ => return None,
    };
    Some(text.trim().to_string())
}

fn int_field(ctx: &LegacyContext, name: &str) -> Option<i64> {
    ctx.field_str(name)
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
}

fn meta_text(ctx: &LegacyContext, key: &str) -> Option<String> {
    ctx.field("meta")?
        .get(key)?
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Post content, sanitized unless the unfiltered-markup nonce verifies.
fn content_field(ctx: &mut LegacyContext, action: LegacyAction) -> Option<String> {
    let unfiltered = ctx.verify_posted_nonce(
        &action.unfiltered_html_field(),
        &action.unfiltered_html_action(),
    );
    let content = text_field(ctx, "content")?;
    Some(if unfiltered {
        content
    } else {
        ammonia::clean(&content)
    })
}

fn check_anonymous(ctx: &mut LegacyContext, draft: &mut Draft) -> bool {
    if ctx.user().authenticated {
        return true;
    }

    draft.anonymous_name = meta_text(ctx, ANONYMOUS_NAME);
    draft.anonymous_email = meta_text(ctx, ANONYMOUS_EMAIL);

    let mut ok = true;
    if draft.anonymous_name.is_none() {
        ctx.add_error("bbp_anonymous_name", "Invalid author name submitted.");
        ok = false;
    }
    if !draft.anonymous_email.as_deref().is_some_and(|e| e.contains('@')) {
        ctx.add_error("bbp_anonymous_email", "Invalid email address submitted.");
        ok = false;
    }
    ok
}

/// Validate the posted fields of a new topic or reply.
pub fn validate_new(ctx: &mut LegacyContext, subtype: LegacySubtype) -> Option<Draft> {
    let action = LegacyAction::create(subtype);
    let mut draft = Draft {
        title: text_field(ctx, "title").filter(|t| !t.is_empty()),
        content: content_field(ctx, action).filter(|c| !c.is_empty()),
        ..Draft::default()
    };

    let mut ok = check_anonymous(ctx, &mut draft);

    match subtype {
        LegacySubtype::Topic => {
            draft.forum_id = int_field(ctx, "forum_id").or_else(|| int_field(ctx, "parent"));
            draft.parent = draft.forum_id.unwrap_or(0);
            if draft.title.is_none() {
                ctx.add_error("bbp_topic_title", "Your topic needs a title.");
                ok = false;
            }
            if draft.content.is_none() {
                ctx.add_error("bbp_topic_content", "Your topic cannot be empty.");
                ok = false;
            }
            if draft.forum_id.is_none() {
                ctx.add_error("bbp_topic_forum_id", "Forum ID is missing.");
                ok = false;
            }
        }
        LegacySubtype::Reply => {
            draft.parent = int_field(ctx, "topic_id")
                .or_else(|| int_field(ctx, "parent"))
                .unwrap_or(0);
            draft.forum_id = int_field(ctx, "forum_id");
            draft.reply_to = int_field(ctx, "reply_to");
            if draft.parent == 0 {
                ctx.add_error("bbp_reply_topic_id", "Topic ID is missing.");
                ok = false;
            }
            if draft.content.is_none() {
                ctx.add_error("bbp_reply_content", "Your reply cannot be empty.");
                ok = false;
            }
        }
    }

    ok.then_some(draft)
}

/// Validate the posted fields of an edit. Omitted fields stay unchanged.
pub fn validate_edit(ctx: &mut LegacyContext, subtype: LegacySubtype) -> Option<Draft> {
    let action = ctx.action()?;
    let title = text_field(ctx, "title");
    let content = content_field(ctx, action);

    let mut ok = true;
    if subtype == LegacySubtype::Topic && title.as_deref() == Some("") {
        ctx.add_error("bbp_edit_topic_title", "Your topic needs a title.");
        ok = false;
    }
    if content.as_deref() == Some("") {
        ctx.add_error(
            format!("bbp_edit_{subtype}_content"),
            format!("Your {subtype} cannot be empty."),
        );
        ok = false;
    }

    let draft = Draft {
        title,
        content,
        forum_id: int_field(ctx, "forum_id"),
        reply_to: int_field(ctx, "reply_to"),
        ..Draft::default()
    };
    ok.then_some(draft)
}

async fn set_meta(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    post_id: i64,
    key: &str,
    value: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM postmeta WHERE post_id = $1 AND meta_key = $2")
        .bind(post_id)
        .bind(key)
        .execute(&mut **tx)
        .await
        .context("failed to clear post meta")?;
    sqlx::query("INSERT INTO postmeta (post_id, meta_key, meta_value) VALUES ($1, $2, $3)")
        .bind(post_id)
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await
        .context("failed to write post meta")?;
    Ok(())
}

fn now_datetime() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn insert_post(pool: &PgPool, subtype: LegacySubtype, author: i64, draft: &Draft) -> Result<i64> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let now = chrono::Utc::now().timestamp();

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO posts (type, parent, title, content, author_id, created, menu_order) VALUES ($1, $2, $3, $4, $5, $6, 0) RETURNING id",
    )
    .bind(subtype.as_str())
    .bind(draft.parent)
    .bind(draft.title.as_deref().unwrap_or_default())
    .bind(draft.content.as_deref().unwrap_or_default())
    .bind(author)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert post")?;

    let active = now_datetime();
    if let Some(forum_id) = draft.forum_id {
        set_meta(&mut tx, id, FORUM_ID, &forum_id.to_string()).await?;
    }
    if let Some(name) = &draft.anonymous_name {
        set_meta(&mut tx, id, ANONYMOUS_NAME, name).await?;
    }
    if let Some(email) = &draft.anonymous_email {
        set_meta(&mut tx, id, ANONYMOUS_EMAIL, email).await?;
    }

    match subtype {
        LegacySubtype::Topic => {
            set_meta(&mut tx, id, LAST_ACTIVE_TIME, &active).await?;
            set_meta(&mut tx, id, REPLY_COUNT, "0").await?;
        }
        LegacySubtype::Reply => {
            if let Some(reply_to) = draft.reply_to {
                set_meta(&mut tx, id, REPLY_TO, &reply_to.to_string()).await?;
            }
            set_meta(&mut tx, draft.parent, LAST_ACTIVE_TIME, &active).await?;
            let replies: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM posts WHERE type = 'reply' AND parent = $1",
            )
            .bind(draft.parent)
            .fetch_one(&mut *tx)
            .await
            .context("failed to count topic replies")?;
            set_meta(&mut tx, draft.parent, REPLY_COUNT, &replies.to_string()).await?;
        }
    }

    tx.commit().await.context("failed to commit post")?;
    Ok(id)
}

async fn update_post(pool: &PgPool, id: i64, draft: &Draft) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query(
        "UPDATE posts SET title = COALESCE($2, title), content = COALESCE($3, content) WHERE id = $1",
    )
    .bind(id)
    .bind(draft.title.as_deref())
    .bind(draft.content.as_deref())
    .execute(&mut *tx)
    .await
    .context("failed to update post")?;

    if let Some(forum_id) = draft.forum_id {
        set_meta(&mut tx, id, FORUM_ID, &forum_id.to_string()).await?;
    }
    if let Some(reply_to) = draft.reply_to {
        set_meta(&mut tx, id, REPLY_TO, &reply_to.to_string()).await?;
    }

    tx.commit().await.context("failed to commit post")?;
    Ok(())
}

async fn post_author(pool: &PgPool, id: i64) -> Result<Option<i64>> {
    sqlx::query_scalar("SELECT author_id FROM posts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to load post author")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::bridge::NonceIssuer;
    use crate::permissions::{UNFILTERED_HTML, UserContext};
    use serde_json::{Map, json};

    fn staged(action: LegacyAction, fields: Value, user: UserContext) -> LegacyContext {
        let mut ctx = LegacyContext::new(NonceIssuer::new(b"legacy").unwrap());
        let fields: Map<String, Value> = fields.as_object().cloned().unwrap();
        ctx.stage(action, fields, user);
        ctx
    }

    fn member() -> UserContext {
        UserContext::authenticated(5, Vec::<String>::new())
    }

    fn codes(ctx: &LegacyContext) -> Option<String> {
        ctx.errors().first().map(|e| e.code.clone())
    }

    #[test]
    fn valid_topic() {
        let mut ctx = staged(
            LegacyAction::NewTopic,
            json!({"title": " Hello ", "content": "Body", "forum_id": "3"}),
            member(),
        );
        let draft = validate_new(&mut ctx, LegacySubtype::Topic).unwrap();

        assert_eq!(draft.title.as_deref(), Some("Hello"));
        assert_eq!(draft.forum_id, Some(3));
        assert_eq!(draft.parent, 3);
        assert!(!ctx.errors().has_errors());
    }

    #[test]
    fn topic_needs_title_first() {
        let mut ctx = staged(LegacyAction::NewTopic, json!({"content": "x"}), member());
        assert!(validate_new(&mut ctx, LegacySubtype::Topic).is_none());
        assert_eq!(codes(&ctx).as_deref(), Some("bbp_topic_title"));
        assert_eq!(ctx.errors().len(), 2);
    }

    #[test]
    fn reply_needs_topic() {
        let mut ctx = staged(LegacyAction::NewReply, json!({"content": "x"}), member());
        assert!(validate_new(&mut ctx, LegacySubtype::Reply).is_none());
        assert_eq!(codes(&ctx).as_deref(), Some("bbp_reply_topic_id"));
    }

    #[test]
    fn reply_reads_structured_content() {
        let mut ctx = staged(
            LegacyAction::NewReply,
            json!({"content": {"raw": "Thanks"}, "parent": 9, "reply_to": "4"}),
            member(),
        );
        let draft = validate_new(&mut ctx, LegacySubtype::Reply).unwrap();
        assert_eq!(draft.content.as_deref(), Some("Thanks"));
        assert_eq!(draft.parent, 9);
        assert_eq!(draft.reply_to, Some(4));
    }

    #[test]
    fn anonymous_author_required() {
        let mut ctx = staged(
            LegacyAction::NewReply,
            json!({"content": "x", "topic_id": 2}),
            UserContext::anonymous(),
        );
        assert!(validate_new(&mut ctx, LegacySubtype::Reply).is_none());
        assert_eq!(codes(&ctx).as_deref(), Some("bbp_anonymous_name"));

        let mut ctx = staged(
            LegacyAction::NewReply,
            json!({
                "content": "x",
                "topic_id": 2,
                "meta": {"_bbp_anonymous_name": "Guest", "_bbp_anonymous_email": "g@example.com"}
            }),
            UserContext::anonymous(),
        );
        let draft = validate_new(&mut ctx, LegacySubtype::Reply).unwrap();
        assert_eq!(draft.anonymous_name.as_deref(), Some("Guest"));
    }

    #[test]
    fn markup_sanitized_without_capability() {
        let body = json!({"title": "t", "forum_id": 1, "content": "<p>ok</p><script>x()</script>"});

        let mut ctx = staged(LegacyAction::NewTopic, body.clone(), member());
        let draft = validate_new(&mut ctx, LegacySubtype::Topic).unwrap();
        assert_eq!(draft.content.as_deref(), Some("<p>ok</p>"));

        let mut ctx = staged(
            LegacyAction::NewTopic,
            body,
            UserContext::authenticated(5, [UNFILTERED_HTML]),
        );
        let draft = validate_new(&mut ctx, LegacySubtype::Topic).unwrap();
        assert!(draft.content.unwrap().contains("<script>"));
    }

    #[test]
    fn edit_keeps_omitted_fields() {
        let mut ctx = staged(
            LegacyAction::EditTopic(4),
            json!({"forum_id": 7}),
            member(),
        );
        let draft = validate_edit(&mut ctx, LegacySubtype::Topic).unwrap();
        assert_eq!(draft.title, None);
        assert_eq!(draft.content, None);
        assert_eq!(draft.forum_id, Some(7));
    }

    #[test]
    fn edit_rejects_blank_title() {
        let mut ctx = staged(LegacyAction::EditTopic(4), json!({"title": "  "}), member());
        assert!(validate_edit(&mut ctx, LegacySubtype::Topic).is_none());
        assert_eq!(codes(&ctx).as_deref(), Some("bbp_edit_topic_title"));
    }
}
