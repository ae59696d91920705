//! Common test utilities for E2E tests
//!
//! `TestServer` runs the real router against a temporary SQLite database and
//! an in-process fake of the GitHub OAuth + REST endpoints.

#![allow(dead_code)]

pub mod fake_github;

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use trainyard::{AppState, config};

pub use fake_github::FakeGitHub;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub github: Arc<FakeGitHub>,
    pub _temp_dir: TempDir,
    /// Client without cookies that does not follow redirects
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        trainyard::metrics::init_metrics();

        let github = FakeGitHub::start().await;

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Bind first so the public URL (webhook callbacks) is known
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = test_config(&github.url(""), db_path, addr.port());

        // Initialize app state
        let state = AppState::new(config).await.unwrap();
        let app = trainyard::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            github,
            _temp_dir: temp_dir,
            client: no_redirect_client(None),
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// A fresh browser: its own cookie jar, no redirects followed
    pub fn browser(&self) -> Browser {
        let jar = Arc::new(Jar::default());
        Browser {
            base: self.addr.clone(),
            client: no_redirect_client(Some(jar.clone())),
            jar,
        }
    }

    /// A browser signed in through the OAuth flow as `login`
    ///
    /// The fake provider accepts any code and treats it as the login.
    pub async fn login(&self, login: &str) -> Browser {
        let browser = self.browser();

        let redirect = browser.get("/auth/github").await;
        assert!(redirect.status().is_redirection());
        let state = query_param(location(&redirect), "state").expect("state in authorize URL");

        let callback = browser
            .get(&format!("/auth/github/callback?code={login}&state={state}"))
            .await;
        assert_eq!(location(&callback), "/", "login as {login} failed");

        browser
    }
}

/// Configuration pointing the app at the fake provider
pub fn test_config(github_url: &str, db_path: std::path::PathBuf, port: u16) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            domain: format!("localhost:{}", port),
            protocol: "http".to_string(),
            static_dir: std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("public"),
        },
        database: config::DatabaseConfig { path: db_path },
        auth: config::AuthConfig {
            session_secret: "test-secret-key-that-is-32-bytes-long!!".to_string(),
            session_max_age: 604800,
            encrypt_session: true,
            failure_redirect: "/login".to_string(),
            github: config::GitHubOAuthConfig {
                client_id: "test-client-id".to_string(),
                client_secret: "test-client-secret".to_string(),
                authorize_url: format!("{}/login/oauth/authorize", github_url),
                token_url: format!("{}/login/oauth/access_token", github_url),
                api_url: github_url.to_string(),
                access_level: config::AccessLevel::Public,
                webhook_secret: WEBHOOK_SECRET.to_string(),
            },
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

fn no_redirect_client(jar: Option<Arc<Jar>>) -> reqwest::Client {
    let builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(10));
    let builder = match jar {
        Some(jar) => builder.cookie_provider(jar),
        None => builder,
    };
    builder.build().expect("failed to build test client")
}

/// Cookie-carrying client bound to one server
pub struct Browser {
    base: String,
    pub client: reqwest::Client,
    jar: Arc<Jar>,
}

impl Browser {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Current value of cookie `name`
    pub fn cookie(&self, name: &str) -> Option<String> {
        let url = reqwest::Url::parse(&self.base).unwrap();
        let header = self.jar.cookies(&url)?;
        header
            .to_str()
            .ok()?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    /// CSRF token from the script-readable cookie
    ///
    /// Issues a GET first if no token has been handed out yet.
    pub async fn csrf_token(&self) -> String {
        if let Some(token) = self.cookie("XSRF-TOKEN") {
            return token;
        }
        self.get("/api/user").await;
        self.cookie("XSRF-TOKEN").expect("XSRF-TOKEN cookie issued")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn get_json(&self, path: &str) -> (u16, Value) {
        json_of(self.get(path).await).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> (u16, Value) {
        let token = self.csrf_token().await;
        let response = self
            .client
            .post(self.url(path))
            .header("X-XSRF-TOKEN", token)
            .json(&body)
            .send()
            .await
            .unwrap();
        json_of(response).await
    }

    pub async fn put_json(&self, path: &str, body: Value) -> (u16, Value) {
        let token = self.csrf_token().await;
        let response = self
            .client
            .put(self.url(path))
            .header("X-XSRF-TOKEN", token)
            .json(&body)
            .send()
            .await
            .unwrap();
        json_of(response).await
    }

    pub async fn delete(&self, path: &str) -> u16 {
        let token = self.csrf_token().await;
        self.client
            .delete(self.url(path))
            .header("X-XSRF-TOKEN", token)
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    }
}

/// Status plus JSON body (`Null` for empty or non-JSON bodies)
pub async fn json_of(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap();
    (status, serde_json::from_str(&text).unwrap_or(Value::Null))
}

pub fn location(response: &reqwest::Response) -> &str {
    response
        .headers()
        .get("location")
        .and_then(|value| value.to_str().ok())
        .expect("location header")
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let url = reqwest::Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// All `Set-Cookie` headers of a response
pub fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}
