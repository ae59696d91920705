//! Authentication middleware
//!
//! The secured stages of the request pipeline, outermost first:
//! 1. `session_layer` decodes (or creates) the session and re-signs it
//! 2. `csrf_protect` checks unsafe methods and hands out tokens
//! 3. `attach_identity` exposes the signed-in identity to handlers
//! 4. `require_auth` gates the protected routes

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;

use super::csrf::{CSRF_COOKIE, CsrfGuard, token_from_headers};
use super::session::{Identity, SESSION_COOKIE, Session};
use crate::AppState;
use crate::error::AppError;

/// Whether `response` already sets cookie `name`
pub(crate) fn sets_cookie(response: &Response, name: &str) -> bool {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split_once('='))
        .any(|(cookie_name, _)| cookie_name.trim() == name)
}

pub(crate) fn append_cookie(response: &mut Response, cookie: Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(error) => {
            tracing::error!(%error, cookie = cookie.name(), "Failed to encode cookie header");
        }
    }
}

/// Session stage
///
/// A missing or unverifiable cookie yields a fresh anonymous session rather
/// than an error. Unless the handler already replaced or cleared the
/// session cookie, the session is re-signed with a slid expiry.
pub async fn session_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let session = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.decode(cookie.value()))
        .unwrap_or_else(|| Session::anonymous(state.sessions.max_age()));
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;
    if sets_cookie(&response, SESSION_COOKIE) {
        return response;
    }

    let refreshed = session.refreshed(state.sessions.max_age());
    match state.sessions.cookie(&refreshed) {
        Ok(cookie) => append_cookie(&mut response, cookie),
        Err(error) => tracing::error!(%error, "Failed to refresh session cookie"),
    }
    response
}

/// CSRF stage
///
/// Unsafe methods must echo a token minted from the session's secret.
/// Safe methods pass through and receive a fresh token cookie.
///
/// Must run inside `session_layer`.
pub async fn csrf_protect(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let secret = request
        .extensions()
        .get::<Session>()
        .map(|session| session.csrf_secret.clone())
        .ok_or(AppError::CsrfMismatch)?;

    if CsrfGuard::requires_token(request.method()) {
        let token = token_from_headers(request.headers()).ok_or(AppError::CsrfMismatch)?;
        state.csrf.verify(&secret, token)?;
        return Ok(next.run(request).await);
    }

    let token = state.csrf.issue(&secret)?;
    let mut response = next.run(request).await;
    // The OAuth callback rotates the secret and sets its own token.
    if !sets_cookie(&response, CSRF_COOKIE) {
        append_cookie(&mut response, state.csrf.token_cookie(token));
    }
    Ok(response)
}

/// Identity stage
///
/// Copies the session's identity, if any, into the request extensions.
pub async fn attach_identity(mut request: Request, next: Next) -> Response {
    let identity = request
        .extensions()
        .get::<Session>()
        .and_then(|session| session.identity.clone());
    if let Some(identity) = identity {
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

/// Middleware to require authentication
///
/// Rejects the request with `Unauthenticated` before the handler runs.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/api/models", ...)
///     .route_layer(middleware::from_fn(require_auth));
/// ```
pub async fn require_auth(request: Request, next: Next) -> Result<Response, AppError> {
    if request.extensions().get::<Identity>().is_none() {
        return Err(AppError::Unauthenticated);
    }
    Ok(next.run(request).await)
}

/// Extractor for current authenticated user
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(identity): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", identity.login)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AppError::Unauthenticated)
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<Identity>().cloned()))
    }
}
