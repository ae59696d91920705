//! Model service
//!
//! CRUD over a user's models plus the training request.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::user::owner_id;
use crate::auth::Identity;
use crate::data::{Database, EntityId, Model, ModelStatus};
use crate::error::AppError;

const MAX_NAME_CHARS: usize = 100;

/// Body of `POST /api/models`
#[derive(Debug, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub description: Option<String>,
    /// Repo ID to bind the model to
    pub repo_id: Option<String>,
}

/// Body of `PUT /api/models/:key`
///
/// `repo_id: null` unbinds the repo, an absent field leaves it alone.
#[derive(Debug, Default, Deserialize)]
pub struct ModelUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub repo_id: Option<Option<String>>,
}

fn deserialize_some<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Model service
pub struct ModelService {
    db: Arc<Database>,
}

impl ModelService {
    /// Create new model service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn find_all(&self, identity: &Identity) -> Result<Vec<Model>, AppError> {
        self.db.list_models(owner_id(identity)?).await
    }

    /// Fetch one model owned by the user
    ///
    /// A model owned by someone else is reported as `NotFound`.
    pub async fn find_one(&self, identity: &Identity, key: &str) -> Result<Model, AppError> {
        let owner = owner_id(identity)?;
        self.db
            .get_model(key)
            .await?
            .filter(|model| model.owner_id == owner)
            .ok_or(AppError::NotFound)
    }

    pub async fn create_one(&self, identity: &Identity, new: NewModel) -> Result<Model, AppError> {
        let owner = owner_id(identity)?;
        let name = normalize_name(&new.name)?;
        if let Some(repo_id) = &new.repo_id {
            self.ensure_repo_owned(owner, repo_id).await?;
        }

        let now = Utc::now();
        let model = Model {
            id: EntityId::new().0,
            owner_id: owner,
            name,
            description: normalize_optional_text(new.description),
            repo_id: new.repo_id,
            status: ModelStatus::Idle,
            training_requested_at: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_model(&model).await?;

        tracing::info!(model_id = %model.id, user = %identity.login, "Model created");
        Ok(model)
    }

    pub async fn update_one(
        &self,
        identity: &Identity,
        key: &str,
        update: ModelUpdate,
    ) -> Result<Model, AppError> {
        let mut model = self.find_one(identity, key).await?;

        if let Some(name) = update.name {
            model.name = normalize_name(&name)?;
        }
        if let Some(description) = update.description {
            model.description = normalize_optional_text(Some(description));
        }
        if let Some(repo_id) = update.repo_id {
            if let Some(repo_id) = &repo_id {
                self.ensure_repo_owned(model.owner_id, repo_id).await?;
            }
            model.repo_id = repo_id;
        }

        model.updated_at = Utc::now();
        self.db.update_model(&model).await?;
        Ok(model)
    }

    pub async fn destroy_one(&self, identity: &Identity, key: &str) -> Result<(), AppError> {
        if !self.db.delete_model(owner_id(identity)?, key).await? {
            return Err(AppError::NotFound);
        }
        tracing::info!(model_id = key, user = %identity.login, "Model deleted");
        Ok(())
    }

    /// Request training
    ///
    /// Idempotent while a request is already pending.
    pub async fn train_one(&self, identity: &Identity, key: &str) -> Result<Model, AppError> {
        let mut model = self.find_one(identity, key).await?;
        if model.status == ModelStatus::Training {
            return Ok(model);
        }

        let now = Utc::now();
        model.status = ModelStatus::Training;
        model.training_requested_at = Some(now);
        model.updated_at = now;
        self.db.update_model(&model).await?;

        tracing::info!(model_id = %model.id, repo_id = ?model.repo_id, "Training requested");
        Ok(model)
    }

    async fn ensure_repo_owned(&self, owner: i64, repo_id: &str) -> Result<(), AppError> {
        self.db
            .get_repo(repo_id)
            .await?
            .filter(|repo| repo.owner_id == owner)
            .map(|_| ())
            .ok_or(AppError::NotFound)
    }
}

fn normalize_name(name: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::BadRequest(format!(
            "name must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(normalize_name("  classifier ").unwrap(), "classifier");
        assert!(matches!(normalize_name("   "), Err(AppError::BadRequest(_))));
        assert!(matches!(
            normalize_name(&"x".repeat(MAX_NAME_CHARS + 1)),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn update_distinguishes_null_from_absent_repo() {
        let absent: ModelUpdate = serde_json::from_str(r#"{"name":"n"}"#).unwrap();
        assert_eq!(absent.repo_id, None);

        let cleared: ModelUpdate = serde_json::from_str(r#"{"repo_id":null}"#).unwrap();
        assert_eq!(cleared.repo_id, Some(None));

        let bound: ModelUpdate = serde_json::from_str(r#"{"repo_id":"01HX"}"#).unwrap();
        assert_eq!(bound.repo_id, Some(Some("01HX".to_string())));
    }
}
