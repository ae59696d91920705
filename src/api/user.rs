//! Signed-in user endpoints

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser};
use crate::error::AppError;
use crate::github::GitHubRepo;

/// GET /api/user
///
/// The profile of the signed-in user, or `{}` for anonymous callers.
pub async fn current_user(
    State(state): State<AppState>,
    MaybeUser(identity): MaybeUser,
) -> Result<Json<Value>, AppError> {
    let Some(identity) = identity else {
        return Ok(Json(json!({})));
    };
    let profile = serde_json::to_value(state.users.profile(&identity))
        .map_err(|e| AppError::Handler(e.into()))?;
    Ok(Json(profile))
}

/// GET /api/user/repos
pub async fn user_repos(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<Vec<GitHubRepo>>, AppError> {
    Ok(Json(state.users.repos(&identity).await?))
}
