//! API layer
//!
//! HTTP handlers for:
//! - The signed-in user (`/api/user`)
//! - Models and repos (`/api/models`, `/api/repos`)
//! - The GitHub webhook receiver
//! - Metrics (Prometheus)
//! - The outer pipeline stages (request logger, error funnel)

mod metrics;
mod models;
mod pipeline;
mod repos;
mod user;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::AppState;
use crate::auth::{logout, require_auth};

pub use metrics::metrics_router;
pub use pipeline::{error_funnel, handler_panicked, log_requests, serve_static};
pub use repos::webhook_router;

/// Create the `/api` router
///
/// `/user` and `/logout` answer anonymous callers; everything else
/// requires a signed-in user.
pub fn api_router() -> Router<AppState> {
    let public = Router::new()
        .route("/user", get(user::current_user))
        .route("/logout", get(logout));

    let protected = Router::new()
        .route("/user/repos", get(user::user_repos))
        .route("/models", get(models::list).post(models::create))
        .route(
            "/models/:key",
            get(models::show).put(models::update).delete(models::destroy),
        )
        .route("/models/:key/train", post(models::train))
        .route("/repos", get(repos::list))
        .route("/repos/search/:owner/:repo", get(repos::search))
        .route(
            "/repos/:key",
            get(repos::show).put(repos::update).delete(repos::destroy),
        )
        .route_layer(middleware::from_fn(require_auth));

    public.merge(protected)
}
