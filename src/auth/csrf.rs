//! CSRF protection
//!
//! Tokens are stateless: `salt.base64(hmac_sha256(csrf_secret, salt))`, so
//! any token minted from the session's secret verifies. Safe methods get a
//! fresh token in a script-readable cookie; unsafe methods must echo one
//! back in a header.

use axum::http::{HeaderMap, Method};
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AppError;

/// Cookie the client script reads the token from
pub const CSRF_COOKIE: &str = "XSRF-TOKEN";

/// Headers a client may echo the token in, in lookup order
pub const CSRF_HEADERS: [&str; 2] = ["x-xsrf-token", "x-csrf-token"];

const SALT_BYTES: usize = 8;

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks anti-forgery tokens
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    secure_cookies: bool,
}

impl CsrfGuard {
    pub fn new(secure_cookies: bool) -> Self {
        Self { secure_cookies }
    }

    /// Whether `method` mutates state and therefore needs a token
    pub fn requires_token(method: &Method) -> bool {
        !matches!(
            *method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
        )
    }

    /// Mint a token bound to `secret`
    pub fn issue(&self, secret: &str) -> Result<String, AppError> {
        let mut salt = [0_u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = URL_SAFE_NO_PAD.encode(salt);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        mac.update(salt.as_bytes());
        let digest = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", salt, digest))
    }

    /// Check `token` against `secret` in constant time
    ///
    /// # Errors
    /// `CsrfMismatch` for malformed tokens or tokens minted from another
    /// secret
    pub fn verify(&self, secret: &str, token: &str) -> Result<(), AppError> {
        let (salt, digest_b64) = token.split_once('.').ok_or(AppError::CsrfMismatch)?;
        if salt.is_empty() {
            return Err(AppError::CsrfMismatch);
        }

        let digest = URL_SAFE_NO_PAD
            .decode(digest_b64)
            .map_err(|_| AppError::CsrfMismatch)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::CsrfMismatch)?;
        mac.update(salt.as_bytes());
        mac.verify_slice(&digest).map_err(|_| AppError::CsrfMismatch)
    }

    /// Token cookie readable by client script
    pub fn token_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((CSRF_COOKIE, token))
            .path("/")
            .http_only(false)
            .secure(self.secure_cookies)
            .same_site(SameSite::Strict)
            .build()
    }
}

/// Token echoed by the client, if any
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    CSRF_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}
