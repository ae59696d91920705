//! GitHub client
//!
//! OAuth code exchange plus the handful of REST calls the app needs:
//! the authenticated user, their repositories, and webhook management.

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::GitHubOAuthConfig;
use crate::error::AppError;

const GITHUB_JSON: &str = "application/vnd.github+json";

/// GitHub token response
///
/// GitHub answers a bad grant with `200 OK` and an `error` field.
#[derive(Debug, Deserialize)]
struct GitHubTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GitHub user info
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: u64,
    pub avatar_url: String,
}

/// Repository owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubOwner {
    pub login: String,
}

/// Repository as returned by the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: GitHubOwner,
    pub private: bool,
    pub html_url: String,
    pub description: Option<String>,
    pub default_branch: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateHookRequest<'a> {
    name: &'static str,
    active: bool,
    events: [&'static str; 1],
    config: HookConfig<'a>,
}

#[derive(Debug, Serialize)]
struct HookConfig<'a> {
    url: &'a str,
    content_type: &'static str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedHook {
    id: u64,
}

/// GitHub OAuth and REST client
pub struct GitHubClient {
    http: Arc<reqwest::Client>,
    config: GitHubOAuthConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubOAuthConfig, http: Arc<reqwest::Client>) -> Self {
        Self { http, config }
    }

    pub fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    /// Authorization URL the browser is redirected to
    ///
    /// The requested scope follows the configured access level.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, AppError> {
        let url = url::Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", self.config.access_level.scopes()),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::Config(format!("invalid auth.github.authorize_url: {e}")))?;
        Ok(url.into())
    }

    /// Exchange an authorization code for an access token
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, AppError> {
        let response: GitHubTokenResponse = self
            .http
            .post(&self.config.token_url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(AppError::UpstreamProvider(format!(
                "token exchange rejected: {} ({})",
                error,
                response.error_description.unwrap_or_default()
            )));
        }

        response
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::UpstreamProvider("token response had no access_token".into()))
    }

    /// GET /user
    pub async fn user(&self, token: &str) -> Result<GitHubUser, AppError> {
        let user = self
            .api_get(token, "/user")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(user)
    }

    /// GET /user/repos
    pub async fn user_repos(&self, token: &str) -> Result<Vec<GitHubRepo>, AppError> {
        let repos = self
            .api_get(token, "/user/repos")
            .query(&[
                ("per_page", "100"),
                ("sort", "updated"),
                ("affiliation", "owner,collaborator,organization_member"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(repos)
    }

    /// GET /repos/{owner}/{repo}
    ///
    /// # Returns
    /// `None` when the repository does not exist or is not visible
    pub async fn repo(
        &self,
        token: &str,
        owner: &str,
        name: &str,
    ) -> Result<Option<GitHubRepo>, AppError> {
        let path = format!(
            "/repos/{}/{}",
            urlencoding::encode(owner),
            urlencoding::encode(name)
        );
        let response = self.api_get(token, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let repo = response.error_for_status()?.json().await?;
        Ok(Some(repo))
    }

    /// POST /repos/{owner}/{repo}/hooks
    ///
    /// # Returns
    /// The GitHub hook ID
    pub async fn create_hook(
        &self,
        token: &str,
        full_name: &str,
        callback_url: &str,
    ) -> Result<u64, AppError> {
        let request = CreateHookRequest {
            name: "web",
            active: true,
            events: ["push"],
            config: HookConfig {
                url: callback_url,
                content_type: "json",
                secret: &self.config.webhook_secret,
            },
        };

        let hook: CreatedHook = self
            .http
            .post(self.api_url(&format!("/repos/{}/hooks", full_name)))
            .bearer_auth(token)
            .header(ACCEPT, HeaderValue::from_static(GITHUB_JSON))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(hook.id)
    }

    /// DELETE /repos/{owner}/{repo}/hooks/{id}
    ///
    /// A hook that is already gone counts as deleted.
    pub async fn delete_hook(
        &self,
        token: &str,
        full_name: &str,
        hook_id: u64,
    ) -> Result<(), AppError> {
        let response = self
            .http
            .delete(self.api_url(&format!("/repos/{}/hooks/{}", full_name, hook_id)))
            .bearer_auth(token)
            .header(ACCEPT, HeaderValue::from_static(GITHUB_JSON))
            .send()
            .await?;
        if response.status() != StatusCode::NOT_FOUND {
            response.error_for_status()?;
        }
        Ok(())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn api_get(&self, token: &str, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.api_url(path))
            .bearer_auth(token)
            .header(ACCEPT, HeaderValue::from_static(GITHUB_JSON))
    }
}
