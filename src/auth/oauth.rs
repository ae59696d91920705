//! GitHub OAuth flow
//!
//! Implements the OAuth 2.0 authorization code flow with GitHub.

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::session::{Identity, Session};
use crate::AppState;
use crate::error::AppError;
use crate::metrics::OAUTH_LOGINS_TOTAL;

/// Cookie holding the `state` parameter between redirect and callback
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

const OAUTH_STATE_PATH: &str = "/auth/github";
const OAUTH_STATE_MAX_AGE_SECS: i64 = 600;
const OAUTH_STATE_BYTES: usize = 24;

/// Create authentication router
///
/// Routes:
/// - GET /auth/github - Redirect to GitHub
/// - GET /auth/github/callback - OAuth callback
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/github", get(github_redirect))
        .route("/auth/github/callback", get(github_callback))
}

// =============================================================================
// GitHub OAuth
// =============================================================================

/// GET /auth/github
///
/// Redirects user to GitHub authorization page.
///
/// # Steps
/// 1. Generate random state
/// 2. Store state in a short-lived cookie scoped to the callback
/// 3. Redirect to GitHub with client_id, redirect_uri, scope, state
async fn github_redirect(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let oauth_state = generate_oauth_state();
    let location = state
        .github
        .authorize_url(&state.config.oauth_callback_url(), &oauth_state)?;

    let cookie = Cookie::build((OAUTH_STATE_COOKIE, oauth_state))
        .path(OAUTH_STATE_PATH)
        .http_only(true)
        .secure(state.config.should_use_secure_cookies())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(OAUTH_STATE_MAX_AGE_SECS))
        .build();

    Ok((jar.add(cookie), Redirect::to(&location)))
}

/// Query parameters from GitHub callback
#[derive(Debug, Deserialize)]
struct GitHubCallbackQuery {
    /// Authorization code
    code: Option<String>,
    /// State echoed back by GitHub
    state: Option<String>,
    /// Set when the user denied access
    error: Option<String>,
}

/// GET /auth/github/callback
///
/// Handles OAuth callback from GitHub.
///
/// # Steps
/// 1. Verify state against the cookie
/// 2. Exchange code for access token
/// 3. Fetch user info from GitHub
/// 4. Create session, set cookies
/// 5. Redirect to home
///
/// Every failure lands on the configured failure path instead of an
/// error page.
async fn github_callback(
    State(state): State<AppState>,
    Query(query): Query<GitHubCallbackQuery>,
    jar: CookieJar,
) -> Response {
    let expected_state = jar
        .get(OAUTH_STATE_COOKIE)
        .map(|cookie| cookie.value().to_owned());
    let jar = jar.remove(Cookie::build((OAUTH_STATE_COOKIE, "")).path(OAUTH_STATE_PATH));

    let login = match complete_login(&state, query, expected_state.as_deref()).await {
        Ok(session) => login_cookies(&state, &session).map(|cookies| (session, cookies)),
        Err(error) => Err(error),
    };

    match login {
        Ok((session, (session_cookie, csrf_cookie))) => {
            OAUTH_LOGINS_TOTAL.with_label_values(&["success"]).inc();
            if let Some(identity) = &session.identity {
                tracing::info!(user = %identity.login, github_id = identity.id, "User signed in");
            }
            (jar.add(session_cookie).add(csrf_cookie), Redirect::to("/")).into_response()
        }
        Err(error) => {
            OAUTH_LOGINS_TOTAL.with_label_values(&["failure"]).inc();
            tracing::warn!(%error, "GitHub sign-in failed");
            (jar, Redirect::to(&state.config.auth.failure_redirect)).into_response()
        }
    }
}

async fn complete_login(
    state: &AppState,
    query: GitHubCallbackQuery,
    expected_state: Option<&str>,
) -> Result<Session, AppError> {
    if let Some(error) = query.error {
        return Err(AppError::UpstreamProvider(format!(
            "authorization denied: {error}"
        )));
    }

    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        return Err(AppError::BadRequest(
            "callback is missing code or state".to_string(),
        ));
    };
    verify_oauth_state(expected_state, &returned_state)?;

    let redirect_uri = state.config.oauth_callback_url();
    let access_token = state.github.exchange_code(&code, &redirect_uri).await?;
    let user = state.github.user(&access_token).await?;

    let identity = Identity {
        id: user.id,
        login: user.login,
        avatar_url: user.avatar_url,
        access_token: Some(access_token),
    };
    Ok(Session::authenticated(identity, state.sessions.max_age()))
}

/// Session cookie plus a CSRF token minted from the new session's secret
fn login_cookies(
    state: &AppState,
    session: &Session,
) -> Result<(Cookie<'static>, Cookie<'static>), AppError> {
    let session_cookie = state.sessions.cookie(session)?;
    let csrf_token = state.csrf.issue(&session.csrf_secret)?;
    Ok((session_cookie, state.csrf.token_cookie(csrf_token)))
}

// =============================================================================
// Logout
// =============================================================================

/// GET /api/logout
///
/// Clears session cookie and redirects to the front end.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    (jar.remove(state.sessions.removal_cookie()), Redirect::to("/"))
}

// =============================================================================
// Helpers
// =============================================================================

/// Generate a random OAuth state value
fn generate_oauth_state() -> String {
    let mut bytes = [0_u8; OAUTH_STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare the state GitHub echoed with the one stored in the cookie
fn verify_oauth_state(expected: Option<&str>, returned: &str) -> Result<(), AppError> {
    let expected = expected.ok_or(AppError::Unauthenticated)?;
    if expected.is_empty() || !bool::from(expected.as_bytes().ct_eq(returned.as_bytes())) {
        return Err(AppError::Unauthenticated);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_states_are_unique() {
        let a = generate_oauth_state();
        let b = generate_oauth_state();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), OAUTH_STATE_BYTES);
    }

    #[test]
    fn state_must_match_cookie() {
        assert!(verify_oauth_state(Some("abc"), "abc").is_ok());
        assert!(matches!(
            verify_oauth_state(Some("abc"), "abd"),
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(
            verify_oauth_state(None, "abc"),
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(
            verify_oauth_state(Some(""), ""),
            Err(AppError::Unauthenticated)
        ));
    }
}
