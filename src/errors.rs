use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::retry::Retryable;

/// Failure of a single call to the marketplace API.
#[derive(Debug, Error)]
pub enum MeliError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("rate limited by remote")]
    RateLimited { retry_after: Option<u64> },

    #[error("remote rejected request with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl Retryable for MeliError {
    /// Network failures and 5xx are transient; everything the remote answered
    /// deliberately (4xx, 429) is not.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeliError::Timeout | MeliError::Transport(_) | MeliError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for MeliError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            MeliError::Timeout
        } else if e.is_decode() {
            MeliError::Decode(e.to_string())
        } else {
            MeliError::Transport(e.to_string())
        }
    }
}

/// Token store could not produce a valid access token.
#[derive(Debug, Error)]
pub enum AuthRefreshError {
    #[error("no refresh credential available")]
    MissingCredential,

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token refresh request failed: {0}")]
    Remote(#[from] MeliError),

    #[error("token endpoint returned an unusable lifetime: expires_in = {0}")]
    InvalidGrant(i64),

    #[error("token storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("product {0} has no marketplace listing")]
    NotListed(i64),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authorization failed: {0}")]
    Auth(#[from] AuthRefreshError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::ProductNotFound(_) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "product_not_found",
                self.to_string(),
            ),
            AppError::NotListed(_) => (
                StatusCode::CONFLICT,
                "invalid_request_error",
                "product_not_listed",
                self.to_string(),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                msg.clone(),
            ),
            AppError::Auth(e) => {
                tracing::warn!("marketplace authorization failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "marketplace_auth_failed",
                    "marketplace authorization failed".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
