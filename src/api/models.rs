//! Model endpoints
//!
//! Every route here sits behind `require_auth`.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::Model;
use crate::error::AppError;
use crate::service::{ModelUpdate, NewModel};

/// GET /api/models
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<Vec<Model>>, AppError> {
    Ok(Json(state.models.find_all(&identity).await?))
}

/// POST /api/models
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    body: Result<Json<NewModel>, JsonRejection>,
) -> Result<(StatusCode, Json<Model>), AppError> {
    let Json(new) = body?;
    let model = state.models.create_one(&identity, new).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// GET /api/models/:key
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key): Path<String>,
) -> Result<Json<Model>, AppError> {
    Ok(Json(state.models.find_one(&identity, &key).await?))
}

/// PUT /api/models/:key
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key): Path<String>,
    body: Result<Json<ModelUpdate>, JsonRejection>,
) -> Result<Json<Model>, AppError> {
    let Json(update) = body?;
    Ok(Json(state.models.update_one(&identity, &key, update).await?))
}

/// DELETE /api/models/:key
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.models.destroy_one(&identity, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/models/:key/train
pub async fn train(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key): Path<String>,
) -> Result<(StatusCode, Json<Model>), AppError> {
    let model = state.models.train_one(&identity, &key).await?;
    Ok((StatusCode::ACCEPTED, Json(model)))
}
