//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format to signed-in users.

use axum::{
    Router,
    http::header::CONTENT_TYPE,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::auth::require_auth;
use crate::error::AppError;
use crate::metrics::REGISTRY;

/// Metrics endpoint handler
///
/// Returns all metrics in Prometheus text format.
async fn metrics_handler() -> Result<Response, AppError> {
    let encoder = TextEncoder::new();
    let metrics_text = encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::Handler(e.into()))?;

    Ok(([(CONTENT_TYPE, encoder.format_type().to_owned())], metrics_text).into_response())
}

/// Create metrics router
///
/// Exposes the `/metrics` endpoint behind authentication.
pub fn metrics_router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(require_auth))
}
