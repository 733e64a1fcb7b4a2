//! Route permission middleware.
//!
//! Looks the matched route and method up in the route table and rejects
//! callers the endpoint's permission predicate refuses. Requests for
//! endpoints the table does not know pass through.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::AppError;
use crate::permissions::UserContext;
use crate::state::AppState;

/// Middleware enforcing the route table's permissions.
///
/// Must be installed with `route_layer` so the matched path is known.
pub async fn enforce_route_permissions(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(path) = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
    else {
        return next.run(request).await;
    };

    let user = request
        .extensions()
        .get::<UserContext>()
        .cloned()
        .unwrap_or_default();

    let allowed = state.routes().read().check(&path, request.method(), &user);

    if allowed == Some(false) {
        debug!(
            path = %path,
            method = %request.method(),
            user = user.id,
            "route permission denied"
        );
        return AppError::Unauthorized.into_response();
    }

    next.run(request).await
}
