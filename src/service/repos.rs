//! Repo service
//!
//! Repositories a user found through search, their webhook registration on
//! GitHub, and the inbound webhook receiver.

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::user::{access_token, owner_id};
use crate::auth::Identity;
use crate::config::AppConfig;
use crate::data::{Database, EntityId, Repo};
use crate::error::AppError;
use crate::github::{GitHubClient, GitHubRepo};

type HmacSha256 = Hmac<Sha256>;

/// Fields a user may change on a tracked repo
#[derive(Debug, Default, Deserialize)]
pub struct RepoUpdate {
    pub description: Option<String>,
    /// Register (`true`) or remove (`false`) the push webhook
    pub hooked: Option<bool>,
}

/// Outcome of an accepted webhook delivery
#[derive(Debug, Clone, Serialize)]
pub struct HookReceipt {
    pub repo_id: String,
    pub event: String,
    /// Models moved to `stale` by this delivery
    pub stale_models: u64,
}

/// Repo service
pub struct RepoService {
    db: Arc<Database>,
    github: Arc<GitHubClient>,
    config: Arc<AppConfig>,
}

impl RepoService {
    /// Create new repo service
    pub fn new(db: Arc<Database>, github: Arc<GitHubClient>, config: Arc<AppConfig>) -> Self {
        Self { db, github, config }
    }

    /// Look a repository up on GitHub and start tracking it
    ///
    /// # Errors
    /// `NotFound` if GitHub does not know the repository or hides it from
    /// the user
    pub async fn search(
        &self,
        identity: &Identity,
        owner: &str,
        name: &str,
    ) -> Result<Repo, AppError> {
        let token = access_token(identity)?;
        let found = self
            .github
            .repo(token, owner, name)
            .await?
            .ok_or(AppError::NotFound)?;

        let repo = self
            .db
            .upsert_repo(&new_repo(owner_id(identity)?, found))
            .await?;
        tracing::info!(repo = %repo.full_name, user = %identity.login, "Repo tracked");
        Ok(repo)
    }

    pub async fn find_all(&self, identity: &Identity) -> Result<Vec<Repo>, AppError> {
        self.db.list_repos(owner_id(identity)?).await
    }

    /// Fetch one repo owned by the user
    ///
    /// A repo owned by someone else is reported as `NotFound`.
    pub async fn find_one(&self, identity: &Identity, key: &str) -> Result<Repo, AppError> {
        let owner = owner_id(identity)?;
        self.db
            .get_repo(key)
            .await?
            .filter(|repo| repo.owner_id == owner)
            .ok_or(AppError::NotFound)
    }

    /// Apply a user update
    ///
    /// Turning `hooked` on registers a push webhook pointing back at this
    /// instance; turning it off removes it.
    pub async fn update_one(
        &self,
        identity: &Identity,
        key: &str,
        update: RepoUpdate,
    ) -> Result<Repo, AppError> {
        let mut repo = self.find_one(identity, key).await?;

        if let Some(description) = update.description {
            repo.description = Some(description).filter(|text| !text.trim().is_empty());
        }

        match update.hooked {
            Some(true) if repo.hook_id.is_none() => {
                let token = access_token(identity)?;
                let hook_id = self
                    .github
                    .create_hook(token, &repo.full_name, &self.config.webhook_url(&repo.id))
                    .await?;
                repo.hook_id = Some(hook_id as i64);
                repo.hooked = true;
                tracing::info!(repo = %repo.full_name, hook_id, "Webhook registered");
            }
            Some(false) => {
                if let Some(hook_id) = repo.hook_id.take() {
                    let token = access_token(identity)?;
                    self.github
                        .delete_hook(token, &repo.full_name, hook_id as u64)
                        .await?;
                    tracing::info!(repo = %repo.full_name, hook_id, "Webhook removed");
                }
                repo.hooked = false;
            }
            _ => {}
        }

        repo.updated_at = Utc::now();
        self.db.update_repo(&repo).await?;
        Ok(repo)
    }

    /// Stop tracking a repo
    ///
    /// The GitHub webhook is removed on a best-effort basis.
    pub async fn destroy_one(&self, identity: &Identity, key: &str) -> Result<(), AppError> {
        let repo = self.find_one(identity, key).await?;

        if let (Some(hook_id), Ok(token)) = (repo.hook_id, access_token(identity)) {
            if let Err(error) = self
                .github
                .delete_hook(token, &repo.full_name, hook_id as u64)
                .await
            {
                tracing::warn!(%error, repo = %repo.full_name, "Failed to remove webhook");
            }
        }

        if !self.db.delete_repo(owner_id(identity)?, &repo.id).await? {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    /// Receive a GitHub webhook delivery
    ///
    /// # Arguments
    /// * `key` - Repo ID from the hook URL
    /// * `event` - `X-GitHub-Event` header
    /// * `signature` - `X-Hub-Signature-256` header
    /// * `body` - Raw request body the signature covers
    ///
    /// # Errors
    /// `InvalidSignature` unless the body is signed with the webhook secret
    pub async fn hook(
        &self,
        key: &str,
        event: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<HookReceipt, AppError> {
        verify_hub_signature(self.github.webhook_secret(), signature, body)?;

        let now = Utc::now();
        if !self.db.record_repo_event(key, event, now).await? {
            return Err(AppError::NotFound);
        }

        let stale_models = if event == "push" {
            self.db.mark_models_stale(key, now).await?
        } else {
            0
        };

        tracing::info!(repo_id = key, event, stale_models, "Webhook accepted");
        Ok(HookReceipt {
            repo_id: key.to_string(),
            event: event.to_string(),
            stale_models,
        })
    }
}

fn new_repo(owner_id: i64, found: GitHubRepo) -> Repo {
    let now = Utc::now();
    Repo {
        id: EntityId::new().0,
        owner_id,
        github_id: found.id as i64,
        owner: found.owner.login,
        name: found.name,
        full_name: found.full_name,
        private: found.private,
        html_url: found.html_url,
        description: found.description,
        default_branch: found.default_branch,
        hooked: false,
        hook_id: None,
        last_event: None,
        last_event_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Check `sha256=<hex>` against the HMAC of `body` in constant time
pub fn verify_hub_signature(
    secret: &str,
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), AppError> {
    let signature = signature
        .and_then(|value| value.strip_prefix("sha256="))
        .ok_or(AppError::InvalidSignature)?;
    let expected = hex::decode(signature).map_err(|_| AppError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature)
}

/// Compute the `X-Hub-Signature-256` header value for `body`
pub fn hub_signature(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let signature = hub_signature("hook-secret", body).unwrap();
        assert!(verify_hub_signature("hook-secret", Some(&signature), body).is_ok());
    }

    #[test]
    fn signature_rejects_other_secret_and_body() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let signature = hub_signature("hook-secret", body).unwrap();

        assert!(matches!(
            verify_hub_signature("other-secret", Some(&signature), body),
            Err(AppError::InvalidSignature)
        ));
        assert!(matches!(
            verify_hub_signature("hook-secret", Some(&signature), b"{}"),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn signature_requires_sha256_prefix() {
        for header in [None, Some(""), Some("sha1=abcd"), Some("sha256=zz")] {
            assert!(matches!(
                verify_hub_signature("hook-secret", header, b"{}"),
                Err(AppError::InvalidSignature)
            ));
        }
    }
}
