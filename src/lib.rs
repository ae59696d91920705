//! Trainyard - GitHub-authenticated backend for training models from
//! hooked repositories
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Request Pipeline (Axum)                   │
//! │  - Request logger, error funnel, panic catcher              │
//! │  - Session, CSRF, identity, auth gate                       │
//! │  - Static files, front end for everything else              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Users, repos, models                                     │
//! │  - GitHub OAuth + REST client                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers and the outer pipeline stages
//! - `auth`: GitHub OAuth, sessions, CSRF, auth middleware
//! - `container`: Dependency container the application is wired from
//! - `service`: Business logic layer
//! - `github`: GitHub API client
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod container;
pub mod data;
pub mod error;
pub mod github;
pub mod metrics;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

use container::{Container, names};

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers
///
/// This struct is cloned for each request; every field is resolved once
/// from the [`Container`].
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// GitHub OAuth + REST client
    pub github: Arc<github::GitHubClient>,

    /// Session cookie codec
    pub sessions: Arc<auth::SessionCodec>,

    /// CSRF token issuer
    pub csrf: Arc<auth::CsrfGuard>,

    pub users: Arc<service::UserService>,
    pub repos: Arc<service::RepoService>,
    pub models: Arc<service::ModelService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Register everything in a container
    /// 3. Resolve the state from it
    ///
    /// # Errors
    /// Returns error if the database is unreachable or wiring fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!("Database connected");

        let container = build_container(config, db)?;
        let state = Self::from_container(&container)?;

        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Resolve the state from a wired container
    pub fn from_container(container: &Container) -> Result<Self, error::AppError> {
        Ok(Self {
            config: container.get(names::CONFIG)?,
            db: container.get(names::DATABASE)?,
            github: container.get(names::GITHUB)?,
            sessions: container.get(names::SESSION_CODEC)?,
            csrf: container.get(names::CSRF_GUARD)?,
            users: container.get(names::USERS)?,
            repos: container.get(names::REPOS)?,
            models: container.get(names::MODELS)?,
        })
    }
}

/// Register the application's dependencies
///
/// `config` and `db` are constants; everything else is built lazily by a
/// factory the first time it is resolved.
pub fn build_container(
    config: config::AppConfig,
    db: data::Database,
) -> Result<Container, error::AppError> {
    use crate::config::AppConfig;

    let mut container = Container::new();

    container.register_value(names::CONFIG, config)?;
    container.register_value(names::DATABASE, db)?;

    container.register_factory(names::HTTP_CLIENT, &[], |_| {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Trainyard/", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_CLIENT_TIMEOUT)
            .build()?;
        Ok(client)
    })?;

    container.register_factory(
        names::GITHUB,
        &[names::CONFIG, names::HTTP_CLIENT],
        |deps| {
            let config = deps.get::<AppConfig>(names::CONFIG)?;
            let http = deps.get::<reqwest::Client>(names::HTTP_CLIENT)?;
            Ok(github::GitHubClient::new(config.auth.github.clone(), http))
        },
    )?;

    container.register_factory(names::SESSION_CODEC, &[names::CONFIG], |deps| {
        let config = deps.get::<AppConfig>(names::CONFIG)?;
        Ok(auth::SessionCodec::new(
            &config.auth.session_secret,
            config.auth.session_max_age,
            config.auth.encrypt_session,
        )
        .with_secure_cookies(config.should_use_secure_cookies()))
    })?;

    container.register_factory(names::CSRF_GUARD, &[names::CONFIG], |deps| {
        let config = deps.get::<AppConfig>(names::CONFIG)?;
        Ok(auth::CsrfGuard::new(config.should_use_secure_cookies()))
    })?;

    container.register_factory(names::USERS, &[names::GITHUB], |deps| {
        Ok(service::UserService::new(deps.get(names::GITHUB)?))
    })?;

    container.register_factory(
        names::REPOS,
        &[names::DATABASE, names::GITHUB, names::CONFIG],
        |deps| {
            Ok(service::RepoService::new(
                deps.get(names::DATABASE)?,
                deps.get(names::GITHUB)?,
                deps.get(names::CONFIG)?,
            ))
        },
    )?;

    container.register_factory(names::MODELS, &[names::DATABASE], |deps| {
        Ok(service::ModelService::new(deps.get(names::DATABASE)?))
    })?;

    Ok(container)
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
///
/// # Pipeline (outermost first)
/// 1. Trace (spans only, failures are logged by the funnel)
/// 2. Request logger
/// 3. Error funnel and panic catcher
/// 4. Static-file check for files that exist under `static_dir`
/// 5. Session (not applied to the webhook)
/// 6. CSRF and identity (not applied to the webhook)
/// 7. Auth gate on protected routes
///
/// Paths no route claims get the front end's `index.html` from inside
/// steps 5-6, so page loads receive a session and a CSRF token.
pub fn build_router(state: AppState) -> Router {
    let front_end = ServeFile::new(state.config.server.static_dir.join("index.html"));

    let secured = Router::new()
        .merge(auth::auth_router())
        .nest("/api", api::api_router())
        .merge(api::metrics_router())
        .fallback_service(front_end)
        .layer(middleware::from_fn(auth::attach_identity))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::csrf_protect,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::session_layer,
        ));

    Router::new()
        .merge(secured)
        .merge(api::webhook_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::serve_static,
        ))
        .layer(CatchPanicLayer::custom(api::handler_panicked))
        .layer(middleware::from_fn(api::error_funnel))
        .layer(middleware::from_fn(api::log_requests))
        .layer(TraceLayer::new_for_http().on_failure(()))
        .with_state(state)
}
