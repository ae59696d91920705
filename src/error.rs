//! Error types for Trainyard
//!
//! Every failure a pipeline stage or route handler can produce is an
//! `AppError`. Converting one into a response does not decide the final
//! body on its own: the error rides along in the response extensions so the
//! error funnel (see [`crate::api::error_funnel`]) can log it once and write
//! the client-safe rendering.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::container::ContainerError;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// No authenticated identity on the request (401)
    #[error("Authentication required")]
    Unauthenticated,

    /// Unsafe method without a token minted from the session secret (403)
    #[error("Invalid CSRF token")]
    CsrfMismatch,

    /// Webhook signature did not verify (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Malformed request body (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// OAuth provider or GitHub API failure (500)
    #[error("Upstream provider error: {0}")]
    UpstreamProvider(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encryption/decryption error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Dependency wiring failed (500, fatal at startup)
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Opaque failure raised by a route handler (500)
    #[error("Handler error: {0}")]
    Handler(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamProvider(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    /// Status code, metric label and client-safe message for this error.
    ///
    /// Server-class errors never expose their inner detail.
    pub fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                self.to_string(),
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::CsrfMismatch => (StatusCode::FORBIDDEN, "csrf_mismatch", self.to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", self.to_string()),
            AppError::UpstreamProvider(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream_provider",
                "Internal server error".to_string(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database",
                "Internal server error".to_string(),
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config",
                "Internal server error".to_string(),
            ),
            AppError::Encryption(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encryption",
                "Internal server error".to_string(),
            ),
            AppError::Container(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "container",
                "Internal server error".to_string(),
            ),
            AppError::Handler(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "handler",
                "Internal server error".to_string(),
            ),
        }
    }

    /// Render the client-facing response without any funnel bookkeeping.
    pub fn render(&self) -> Response {
        let (status, _, message) = self.classify();
        let body = Json(serde_json::json!({
            "error": message,
        }));
        (status, body).into_response()
    }
}

/// Error carried in response extensions until the funnel consumes it.
#[derive(Debug, Clone)]
pub struct FunneledError(pub Arc<AppError>);

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// The status and body are already client-safe; the error itself is
    /// attached so the funnel can log it exactly once.
    fn into_response(self) -> Response {
        let mut response = self.render();
        response
            .extensions_mut()
            .insert(FunneledError(Arc::new(self)));
        response
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
