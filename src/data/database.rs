//! SQLite database operations
//!
//! All database access goes through this module.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Handler(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Repos
    // =========================================================================

    /// List repos tracked by `owner_id`, most recently updated first
    pub async fn list_repos(&self, owner_id: i64) -> Result<Vec<Repo>, AppError> {
        let repos = sqlx::query_as::<_, Repo>(
            "SELECT * FROM repos WHERE owner_id = ? ORDER BY updated_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(repos)
    }

    pub async fn get_repo(&self, id: &str) -> Result<Option<Repo>, AppError> {
        let repo = sqlx::query_as::<_, Repo>("SELECT * FROM repos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(repo)
    }

    /// Insert a repo, or refresh the GitHub metadata of an existing one
    ///
    /// Keyed on (owner_id, github_id); the stored ID and hook state survive.
    ///
    /// # Returns
    /// The stored row
    pub async fn upsert_repo(&self, repo: &Repo) -> Result<Repo, AppError> {
        let stored = sqlx::query_as::<_, Repo>(
            r#"
            INSERT INTO repos (
                id, owner_id, github_id, owner, name, full_name, private, html_url,
                description, default_branch, hooked, hook_id, last_event, last_event_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_id, github_id) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                full_name = excluded.full_name,
                private = excluded.private,
                html_url = excluded.html_url,
                description = excluded.description,
                default_branch = excluded.default_branch,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&repo.id)
        .bind(repo.owner_id)
        .bind(repo.github_id)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.full_name)
        .bind(repo.private)
        .bind(&repo.html_url)
        .bind(&repo.description)
        .bind(&repo.default_branch)
        .bind(repo.hooked)
        .bind(repo.hook_id)
        .bind(&repo.last_event)
        .bind(repo.last_event_at)
        .bind(repo.created_at)
        .bind(repo.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    /// Persist the mutable fields of a repo
    pub async fn update_repo(&self, repo: &Repo) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE repos
            SET description = ?, hooked = ?, hook_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&repo.description)
        .bind(repo.hooked)
        .bind(repo.hook_id)
        .bind(repo.updated_at)
        .bind(&repo.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a repo owned by `owner_id`
    ///
    /// # Returns
    /// Whether a row was deleted
    pub async fn delete_repo(&self, owner_id: i64, id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE models SET repo_id = NULL WHERE repo_id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM repos WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record an inbound webhook event on a repo
    ///
    /// # Returns
    /// Whether the repo exists
    pub async fn record_repo_event(
        &self,
        id: &str,
        event: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE repos SET last_event = ?, last_event_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(event)
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// List models owned by `owner_id`, newest first
    pub async fn list_models(&self, owner_id: i64) -> Result<Vec<Model>, AppError> {
        let models = sqlx::query_as::<_, Model>(
            "SELECT * FROM models WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(models)
    }

    pub async fn get_model(&self, id: &str) -> Result<Option<Model>, AppError> {
        let model = sqlx::query_as::<_, Model>("SELECT * FROM models WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(model)
    }

    pub async fn insert_model(&self, model: &Model) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO models (
                id, owner_id, name, description, repo_id, status,
                training_requested_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(model.owner_id)
        .bind(&model.name)
        .bind(&model.description)
        .bind(&model.repo_id)
        .bind(model.status)
        .bind(model.training_requested_at)
        .bind(model.created_at)
        .bind(model.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the mutable fields of a model
    pub async fn update_model(&self, model: &Model) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE models
            SET name = ?, description = ?, repo_id = ?, status = ?,
                training_requested_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&model.name)
        .bind(&model.description)
        .bind(&model.repo_id)
        .bind(model.status)
        .bind(model.training_requested_at)
        .bind(model.updated_at)
        .bind(&model.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a model owned by `owner_id`
    ///
    /// # Returns
    /// Whether a row was deleted
    pub async fn delete_model(&self, owner_id: i64, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM models WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every trained or training model bound to `repo_id` as stale
    ///
    /// # Returns
    /// Number of models marked
    pub async fn mark_models_stale(
        &self,
        repo_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE models SET status = ?, updated_at = ? WHERE repo_id = ? AND status = ?",
        )
        .bind(ModelStatus::Stale)
        .bind(at)
        .bind(repo_id)
        .bind(ModelStatus::Training)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
