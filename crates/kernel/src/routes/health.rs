//! Liveness endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::HEALTH_PATH;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    postgres: bool,
    /// Current anonymous contribution policy.
    anonymous_contributions: bool,
    /// Number of paths with registered permissions.
    routes: usize,
}

/// 200 while the post store answers, 503 otherwise.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let postgres = state.postgres_healthy().await;
    let routes = state.routes().read().len();

    let (status_code, status) = match postgres {
        true => (StatusCode::OK, "healthy"),
        false => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            postgres,
            anonymous_contributions: state.policy().anonymous_allowed(),
            routes,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new().route(HEALTH_PATH, get(health_check))
}
