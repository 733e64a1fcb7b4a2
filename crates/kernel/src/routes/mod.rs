//! HTTP route handlers.

pub mod health;
pub mod params;
pub mod posts;
pub mod table;

use axum::Router;
use axum::http::Method;

pub use table::{EndpointDescriptor, PermissionCheck, RouteTable, patch_anonymous_writes};

use crate::bridge::LegacySubtype;
use crate::error::AppError;
use crate::models::PostType;
use crate::state::AppState;

pub const HEALTH_PATH: &str = "/health";

/// Item route pattern of a post kind, as matched by the router.
pub fn item_route(post_type: PostType) -> String {
    format!("{}/{{id}}", post_type.collection_path())
}

pub fn register_health_route(table: &mut RouteTable) {
    table.register(HEALTH_PATH, EndpointDescriptor::public([Method::GET]));
}

/// Register the permissions of a post kind's routes.
///
/// Reads are public. Writes, for the kinds that have them, need an
/// authenticated caller.
pub fn register_post_routes(table: &mut RouteTable, post_type: PostType) {
    let collection = post_type.collection_path();
    let item = item_route(post_type);

    table.register(
        collection.as_str(),
        EndpointDescriptor::public([Method::GET, Method::OPTIONS]),
    );
    table.register(item.as_str(), EndpointDescriptor::public([Method::GET]));

    if LegacySubtype::try_from(post_type).is_ok() {
        table.register(collection, EndpointDescriptor::authenticated([Method::POST]));
        table.register(
            item,
            EndpointDescriptor::authenticated([Method::POST, Method::PUT]),
        );
    }
}

/// The API router with route permissions enforced.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(posts::router())
        .fallback(|| async { AppError::NotFound })
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::enforce_route_permissions,
        ))
        .with_state(state)
}
