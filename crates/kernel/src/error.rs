//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::bridge::BridgeError;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("No route was found matching the URL and request method.")]
    NotFound,

    #[error("Invalid post ID.")]
    InvalidPostId,

    #[error("Sorry, you are not allowed to do that.")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound | AppError::InvalidPostId => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Bridge(e) => e.status(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            AppError::Internal(_) | AppError::Database(_) => "internal_error",
            AppError::NotFound => "rest_no_route",
            AppError::InvalidPostId => "rest_post_invalid_id",
            AppError::Unauthorized => "rest_forbidden",
            AppError::BadRequest(_) => "rest_invalid_param",
            AppError::Bridge(e) => e.code(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Infrastructure failures are logged, not echoed.
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "internal server error".to_string()
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = json!({
            "code": self.code(),
            "message": message,
            "data": {"status": status.as_u16()},
        });

        (status, Json(body)).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
