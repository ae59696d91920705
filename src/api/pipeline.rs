//! Outer request pipeline
//!
//! `log_requests` wraps everything and records one line plus metrics per
//! request. `error_funnel` sits just inside it: any [`AppError`] raised by a
//! later stage or a handler, and any handler panic caught by
//! [`handler_panicked`], is logged here exactly once and rendered with its
//! fixed status code and a client-safe body.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::Method,
    http::header::{CONTENT_LENGTH, CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::services::ServeDir;

use crate::AppState;
use crate::error::{AppError, FunneledError};
use crate::metrics::{ERRORS_TOTAL, HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Route template for metric labels, so IDs do not explode cardinality
fn endpoint_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Request logger
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let endpoint = endpoint_label(&request);
    let started = Instant::now();

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &endpoint, status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str(), &endpoint])
        .observe(elapsed.as_secs_f64());

    tracing::info!(
        %method,
        path = %path,
        status = status.as_u16(),
        latency_ms = elapsed.as_millis() as u64,
        "Request completed"
    );
    response
}

/// Error funnel
///
/// Responses carrying a [`FunneledError`] are re-rendered from the error
/// itself. Headers set on the way out (cookies) are kept.
pub async fn error_funnel(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let endpoint = endpoint_label(&request);

    let response = next.run(request).await;
    let Some(FunneledError(error)) = response.extensions().get::<FunneledError>().cloned() else {
        return response;
    };

    let (status, kind, _) = error.classify();
    if status.is_server_error() {
        tracing::error!(%method, path = %path, kind, error = %error, "Request failed");
    } else {
        tracing::warn!(%method, path = %path, kind, error = %error, "Request rejected");
    }
    ERRORS_TOTAL.with_label_values(&[kind, &endpoint]).inc();

    let (mut parts, _) = response.into_parts();
    let (rendered, body) = error.render().into_parts();
    parts.status = rendered.status;
    parts.headers.remove(CONTENT_LENGTH);
    if let Some(content_type) = rendered.headers.get(CONTENT_TYPE) {
        parts.headers.insert(CONTENT_TYPE, content_type.clone());
    }
    parts.extensions.remove::<FunneledError>();
    Response::from_parts(parts, body)
}

/// Static-file check
///
/// GET and HEAD requests naming a file that exists under
/// `server.static_dir` are answered here, without a session or CSRF token.
/// Everything else continues down the pipeline.
pub async fn serve_static(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return next.run(request).await;
    }

    let static_dir = &state.config.server.static_dir;
    let Some(file) = static_file_path(static_dir, request.uri().path()) else {
        return next.run(request).await;
    };
    let is_file = tokio::fs::metadata(&file)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false);
    if !is_file {
        return next.run(request).await;
    }

    match ServeDir::new(static_dir).try_call(request).await {
        Ok(response) => response.map(Body::new),
        Err(error) => AppError::Handler(error.into()).into_response(),
    }
}

/// File a request path points at, if it stays inside `static_dir`
fn static_file_path(static_dir: &Path, uri_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(uri_path).ok()?;
    let mut path = static_dir.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            segment if segment.contains('\\') => return None,
            segment => path.push(segment),
        }
    }
    Some(path)
}

/// Panic handler for `CatchPanicLayer`
///
/// Turns a panicking handler into a funneled 500.
pub fn handler_panicked(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    AppError::Handler(anyhow::anyhow!("handler panicked: {detail}")).into_response()
}
