//! Repo endpoints and the GitHub webhook receiver

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::Repo;
use crate::error::AppError;
use crate::metrics::WEBHOOKS_RECEIVED_TOTAL;
use crate::service::{HookReceipt, RepoUpdate};

/// GitHub caps payloads at 25 MB; pushes this app cares about are far smaller.
const WEBHOOK_BODY_LIMIT: usize = 5 * 1024 * 1024;

/// GET /api/repos
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<Vec<Repo>>, AppError> {
    Ok(Json(state.repos.find_all(&identity).await?))
}

/// GET /api/repos/search/:owner/:repo
///
/// Looks the repository up on GitHub and starts tracking it.
pub async fn search(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<Repo>, AppError> {
    Ok(Json(state.repos.search(&identity, &owner, &name).await?))
}

/// GET /api/repos/:key
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key): Path<String>,
) -> Result<Json<Repo>, AppError> {
    Ok(Json(state.repos.find_one(&identity, &key).await?))
}

/// PUT /api/repos/:key
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key): Path<String>,
    body: Result<Json<RepoUpdate>, JsonRejection>,
) -> Result<Json<Repo>, AppError> {
    let Json(update) = body?;
    Ok(Json(state.repos.update_one(&identity, &key, update).await?))
}

/// DELETE /api/repos/:key
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.repos.destroy_one(&identity, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Webhook router
///
/// Mounted outside the CSRF stage: GitHub authenticates deliveries with
/// `X-Hub-Signature-256` instead.
pub fn webhook_router() -> Router<AppState> {
    Router::new()
        .route("/api/repos/:key/hook", post(receive_hook))
        .layer(RequestBodyLimitLayer::new(WEBHOOK_BODY_LIMIT))
}

/// POST /api/repos/:key/hook
async fn receive_hook(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HookReceipt>, AppError> {
    let event = header_str(&headers, "x-github-event").unwrap_or("unknown");
    let signature = header_str(&headers, "x-hub-signature-256");

    let result = state.repos.hook(&key, event, signature, &body).await;

    let outcome = if result.is_ok() { "accepted" } else { "rejected" };
    WEBHOOKS_RECEIVED_TOTAL
        .with_label_values(&[event_label(event), outcome])
        .inc();
    result.map(Json)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Bounded label set for the webhook counter
fn event_label(event: &str) -> &'static str {
    match event {
        "push" => "push",
        "ping" => "ping",
        _ => "other",
    }
}
