//! Forum, topic and reply endpoints.
//!
//! Reads compile request parameters into a collection query for the
//! executor. Topic and reply writes go through the legacy bridge.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get};
use axum::{Json, Router};
use serde_json::{Value, json};

use super::item_route;
use super::params::{parse_body, parse_query};
use crate::bridge::{BridgeOutcome, LegacyBridgeRequest, LegacySubtype};
use crate::error::{AppError, AppResult};
use crate::fields::{self, FORUM_ID};
use crate::models::{API_PREFIX, Post, PostType};
use crate::permissions::UserContext;
use crate::query::compile;
use crate::state::AppState;

/// Total matching posts.
pub const TOTAL_HEADER: &str = "x-wp-total";

/// Total pages at the requested page size.
pub const TOTAL_PAGES_HEADER: &str = "x-wp-totalpages";

/// Create the post routes for every kind.
pub fn router() -> Router<AppState> {
    PostType::ALL
        .into_iter()
        .fold(Router::new(), |router, post_type| {
            router
                .route(&post_type.collection_path(), collection_routes(post_type))
                .route(&item_route(post_type), item_routes(post_type))
        })
}

fn collection_routes(post_type: PostType) -> MethodRouter<AppState> {
    let routes = get(
        move |State(state): State<AppState>, RawQuery(query): RawQuery, user: UserContext| {
            list_posts(state, post_type, query, user)
        },
    )
    .options(move |State(state): State<AppState>, user: UserContext| {
        describe_collection(state, post_type, user)
    });

    match LegacySubtype::try_from(post_type) {
        Ok(subtype) => routes.post(
            move |State(state): State<AppState>, user: UserContext, body: Bytes| {
                create_post(state, subtype, user, body)
            },
        ),
        Err(_) => routes,
    }
}

fn item_routes(post_type: PostType) -> MethodRouter<AppState> {
    let routes = get(
        move |State(state): State<AppState>, Path(id): Path<i64>, user: UserContext| {
            get_post(state, post_type, id, user)
        },
    );

    match LegacySubtype::try_from(post_type) {
        Ok(subtype) => {
            let update = move |State(state): State<AppState>,
                               Path(id): Path<i64>,
                               user: UserContext,
                               body: Bytes| {
                update_post(state, subtype, id, user, body)
            };
            routes.post(update.clone()).put(update)
        }
        Err(_) => routes,
    }
}

/// Whether anonymous-only fields are shown to this caller.
fn anonymous_visible(state: &AppState, user: &UserContext) -> bool {
    !user.authenticated && state.policy().anonymous_allowed()
}

/// Reply counts for the replies among `posts`, in one executor call.
async fn reply_counts(state: &AppState, posts: &[Post]) -> AppResult<HashMap<i64, i64>> {
    let ids: Vec<i64> = posts
        .iter()
        .filter(|post| post.kind() == Some(PostType::Reply))
        .map(|post| post.id)
        .collect();

    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(state.executor().reply_counts(&ids).await?)
}

fn render(
    state: &AppState,
    post: &Post,
    user: &UserContext,
    reply_counts: &HashMap<i64, i64>,
) -> Value {
    let reply_count = (post.kind() == Some(PostType::Reply))
        .then(|| reply_counts.get(&post.id).copied().unwrap_or(0));

    fields::render_post(
        post,
        state.meta(),
        anonymous_visible(state, user),
        reply_count,
    )
}

async fn render_one(state: &AppState, post: &Post, user: &UserContext) -> AppResult<Value> {
    let counts = reply_counts(state, std::slice::from_ref(post)).await?;
    Ok(render(state, post, user, &counts))
}

async fn list_posts(
    state: AppState,
    post_type: PostType,
    raw_query: Option<String>,
    user: UserContext,
) -> AppResult<Response> {
    let params = parse_query(raw_query.as_deref().unwrap_or_default());
    let query = compile(post_type, &params);
    tracing::debug!(
        post_type = %post_type,
        query = %serde_json::to_string(&query).unwrap_or_default(),
        "compiled collection query"
    );

    let page = state.executor().query(&query).await?;

    let counts = reply_counts(&state, &page.posts).await?;
    let items: Vec<Value> = page
        .posts
        .iter()
        .map(|post| render(&state, post, &user, &counts))
        .collect();

    let mut headers = HeaderMap::new();
    headers.insert(TOTAL_HEADER, HeaderValue::from(page.total));
    headers.insert(TOTAL_PAGES_HEADER, HeaderValue::from(page.total_pages));

    Ok((headers, Json(items)).into_response())
}

async fn get_post(
    state: AppState,
    post_type: PostType,
    id: i64,
    user: UserContext,
) -> AppResult<Json<Value>> {
    if id <= 0 {
        return Err(AppError::InvalidPostId);
    }

    let post = state
        .executor()
        .find(post_type, id)
        .await?
        .ok_or(AppError::InvalidPostId)?;

    Ok(Json(render_one(&state, &post, &user).await?))
}

async fn describe_collection(
    state: AppState,
    post_type: PostType,
    user: UserContext,
) -> Json<Value> {
    let mut methods = vec!["GET"];
    if LegacySubtype::try_from(post_type).is_ok() {
        methods.push("POST");
    }

    Json(json!({
        "namespace": API_PREFIX.trim_start_matches('/'),
        "methods": methods,
        "endpoints": [{
            "methods": ["GET"],
            "args": fields::collection_params(post_type),
        }],
        "schema": fields::item_schema(post_type, state.meta(), anonymous_visible(&state, &user)),
    }))
}

async fn create_post(
    state: AppState,
    subtype: LegacySubtype,
    user: UserContext,
    body: Bytes,
) -> AppResult<Response> {
    let fields = parse_body(&body)?;
    let request = LegacyBridgeRequest::new(subtype, fields, user.clone());

    let bridge = state.bridge().clone();
    let outcome = tokio::task::spawn_blocking(move || bridge.create(request))
        .await
        .map_err(|e| anyhow::anyhow!("legacy create task failed: {e}"))??;

    written(&state, subtype, outcome, &user, StatusCode::CREATED).await
}

async fn update_post(
    state: AppState,
    subtype: LegacySubtype,
    id: i64,
    user: UserContext,
    body: Bytes,
) -> AppResult<Response> {
    let fields = parse_body(&body)?;

    if id <= 0 {
        return Err(AppError::InvalidPostId);
    }
    let existing = state
        .executor()
        .find(subtype.post_type(), id)
        .await?
        .ok_or(AppError::InvalidPostId)?;
    let forum_id = existing.meta_value(FORUM_ID).and_then(|raw| raw.parse::<i64>().ok());

    let request = LegacyBridgeRequest::new(subtype, fields, user.clone())
        .with_resource_id(id)
        .with_inherited_forum_id(forum_id);

    let bridge = state.bridge().clone();
    let outcome = tokio::task::spawn_blocking(move || bridge.update(request))
        .await
        .map_err(|e| anyhow::anyhow!("legacy update task failed: {e}"))??;

    written(&state, subtype, outcome, &user, StatusCode::OK).await
}

/// Respond to a successful write with the stored post and its location.
async fn written(
    state: &AppState,
    subtype: LegacySubtype,
    outcome: BridgeOutcome,
    user: &UserContext,
    status: StatusCode,
) -> AppResult<Response> {
    let location = HeaderValue::from_str(outcome.location())
        .map_err(|e| anyhow::anyhow!("invalid location header: {e}"))?;

    let id = i64::try_from(outcome.resource_id()).map_err(|_| AppError::InvalidPostId)?;
    let body = match state.executor().find(subtype.post_type(), id).await? {
        Some(post) => render_one(state, &post, user).await?,
        None => {
            tracing::warn!(id, "written post not readable, returning outcome only");
            serde_json::to_value(&outcome).map_err(anyhow::Error::from)?
        }
    };

    Ok((status, [(header::LOCATION, location)], Json(body)).into_response())
}
