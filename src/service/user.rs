//! User service
//!
//! Profile of the signed-in user and the repositories GitHub lists for them.

use std::sync::Arc;

use serde::Serialize;

use crate::auth::Identity;
use crate::error::AppError;
use crate::github::{GitHubClient, GitHubRepo};

/// Public view of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: u64,
    pub login: String,
    pub avatar_url: String,
}

impl From<&Identity> for UserProfile {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            login: identity.login.clone(),
            avatar_url: identity.avatar_url.clone(),
        }
    }
}

/// User service
pub struct UserService {
    github: Arc<GitHubClient>,
}

impl UserService {
    /// Create new user service
    pub fn new(github: Arc<GitHubClient>) -> Self {
        Self { github }
    }

    pub fn profile(&self, identity: &Identity) -> UserProfile {
        identity.into()
    }

    /// Repositories visible to the user on GitHub
    ///
    /// # Errors
    /// `Unauthenticated` if the session carries no access token
    pub async fn repos(&self, identity: &Identity) -> Result<Vec<GitHubRepo>, AppError> {
        let token = access_token(identity)?;
        self.github.user_repos(token).await
    }
}

/// Access token of an identity, required for any GitHub call
pub(crate) fn access_token(identity: &Identity) -> Result<&str, AppError> {
    identity
        .access_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthenticated)
}

/// Database owner key of an identity
pub(crate) fn owner_id(identity: &Identity) -> Result<i64, AppError> {
    i64::try_from(identity.id).map_err(|_| AppError::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_exposes_only_public_fields() {
        let identity = Identity {
            id: 1,
            login: "octocat".to_string(),
            avatar_url: "https://avatars.example.com/1".to_string(),
            access_token: Some("gho_secret".to_string()),
        };

        let profile = serde_json::to_value(UserProfile::from(&identity)).unwrap();
        assert_eq!(
            profile,
            serde_json::json!({
                "id": 1,
                "login": "octocat",
                "avatar_url": "https://avatars.example.com/1",
            })
        );
    }

    #[test]
    fn missing_access_token_is_unauthenticated() {
        let identity = Identity {
            id: 1,
            login: "octocat".to_string(),
            avatar_url: String::new(),
            access_token: None,
        };
        assert!(matches!(
            access_token(&identity),
            Err(AppError::Unauthenticated)
        ));
    }
}
