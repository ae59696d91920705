//! GitHub OAuth authentication
//!
//! Handles:
//! - GitHub OAuth flow
//! - Signed session cookies
//! - CSRF tokens for unsafe methods
//! - Authentication middleware

pub mod csrf;
mod middleware;
mod oauth;
pub mod session;

pub use csrf::{CSRF_COOKIE, CsrfGuard};
pub use middleware::{
    CurrentUser, MaybeUser, attach_identity, csrf_protect, require_auth, session_layer,
};
pub use oauth::{OAUTH_STATE_COOKIE, auth_router, logout};
pub use session::{Identity, SESSION_COOKIE, Session, SessionCodec};
