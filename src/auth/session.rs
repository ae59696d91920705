//! Session management
//!
//! Uses HMAC-signed (and optionally AES-GCM encrypted) tokens stored in
//! cookies. No server-side session storage needed.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "trainyard.sid";

const AES_GCM_NONCE_BYTES: usize = 12;
const CSRF_SECRET_BYTES: usize = 18;

type HmacSha256 = Hmac<Sha256>;

/// Identity attached by a successful GitHub login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// GitHub user ID
    pub id: u64,
    /// GitHub username
    pub login: String,
    /// Avatar URL from GitHub
    pub avatar_url: String,
    /// GitHub access token used for API calls on the user's behalf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// User session data
///
/// Every browser gets one: an anonymous session only carries the CSRF
/// secret, an authenticated one also carries the GitHub identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Secret the CSRF tokens for this session are minted from
    pub csrf_secret: String,
    /// Present once the OAuth callback succeeded
    pub identity: Option<Identity>,
    /// When session was created
    pub created_at: DateTime<Utc>,
    /// When session expires
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Fresh anonymous session
    pub fn anonymous(max_age: Duration) -> Self {
        let now = Utc::now();
        Self {
            csrf_secret: generate_csrf_secret(),
            identity: None,
            created_at: now,
            expires_at: now + max_age,
        }
    }

    /// Fresh session bound to `identity`
    ///
    /// The CSRF secret is rotated on login.
    pub fn authenticated(identity: Identity, max_age: Duration) -> Self {
        Self {
            identity: Some(identity),
            ..Self::anonymous(max_age)
        }
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Slide the expiry forward
    pub fn refreshed(mut self, max_age: Duration) -> Self {
        self.expires_at = Utc::now() + max_age;
        self
    }
}

fn generate_csrf_secret() -> String {
    let mut bytes = [0_u8; CSRF_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Converts sessions to and from cookie values
///
/// Token format: base64(payload).base64(hmac_sha256(payload)), where the
/// payload is the session JSON, or `nonce || ciphertext` when encryption is
/// enabled.
#[derive(Clone)]
pub struct SessionCodec {
    signing_key: Vec<u8>,
    cipher: Option<Aes256Gcm>,
    max_age: Duration,
    secure_cookies: bool,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("encrypted", &self.cipher.is_some())
            .field("max_age", &self.max_age)
            .field("secure_cookies", &self.secure_cookies)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// Create a codec
    ///
    /// # Arguments
    /// * `secret` - Shared secret for signing (and deriving the cipher key)
    /// * `max_age_secs` - Session lifetime in seconds
    /// * `encrypt` - Whether to encrypt the payload
    pub fn new(secret: &str, max_age_secs: i64, encrypt: bool) -> Self {
        let cipher = encrypt.then(|| {
            let key = Sha256::new()
                .chain_update(b"trainyard-session-encryption:")
                .chain_update(secret.as_bytes())
                .finalize();
            Aes256Gcm::new(&key)
        });

        Self {
            signing_key: secret.as_bytes().to_vec(),
            cipher,
            max_age: Duration::seconds(max_age_secs),
            secure_cookies: false,
        }
    }

    /// Mark issued cookies `Secure`
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Session cookie carrying `session`
    pub fn cookie(&self, session: &Session) -> Result<Cookie<'static>, AppError> {
        let value = self.encode(session)?;
        Ok(Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.max_age.num_seconds()))
            .build())
    }

    /// Cookie matching the session cookie's path, for removal
    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .http_only(true)
            .build()
    }

    /// Create a signed session token
    pub fn encode(&self, session: &Session) -> Result<String, AppError> {
        // 1. Serialize session to JSON
        let payload = serde_json::to_vec(session).map_err(|e| AppError::Handler(e.into()))?;

        // 2. Optionally encrypt
        let payload = match &self.cipher {
            Some(cipher) => encrypt_payload(cipher, &payload)?,
            None => payload,
        };

        // 3. Base64 encode and sign
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let signature_b64 = URL_SAFE_NO_PAD.encode(self.sign(payload_b64.as_bytes())?);

        Ok(format!("{}.{}", payload_b64, signature_b64))
    }

    /// Decode a cookie value
    ///
    /// Any failure (bad signature, tampered payload, expiry) yields `None`:
    /// the request is then treated as anonymous.
    pub fn decode(&self, token: &str) -> Option<Session> {
        match self.verify(token) {
            Ok(session) => Some(session),
            Err(error) => {
                tracing::debug!(%error, "Discarding unusable session cookie");
                None
            }
        }
    }

    /// Verify and decode a session token
    ///
    /// # Errors
    /// Returns error if signature is invalid, token is malformed or the
    /// session expired
    pub fn verify(&self, token: &str) -> Result<Session, AppError> {
        // 1. Split token into payload and signature
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(AppError::Unauthenticated)?;
        if signature_b64.contains('.') {
            return Err(AppError::Unauthenticated);
        }

        // 2. Verify HMAC signature
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AppError::Unauthenticated)?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AppError::InvalidSignature)?;

        // 3. Decode, decrypt and deserialize payload
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AppError::Unauthenticated)?;
        let payload = match &self.cipher {
            Some(cipher) => decrypt_payload(cipher, &payload)?,
            None => payload,
        };
        let session: Session =
            serde_json::from_slice(&payload).map_err(|_| AppError::Unauthenticated)?;

        // 4. Check if session is expired
        if session.is_expired() {
            return Err(AppError::Unauthenticated);
        }

        Ok(session)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, AppError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn encrypt_payload(cipher: &Aes256Gcm, data: &[u8]) -> Result<Vec<u8>, AppError> {
    let mut nonce = [0_u8; AES_GCM_NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), data)
        .map_err(|_| AppError::Encryption("session encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(AES_GCM_NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_payload(cipher: &Aes256Gcm, data: &[u8]) -> Result<Vec<u8>, AppError> {
    if data.len() <= AES_GCM_NONCE_BYTES {
        return Err(AppError::Unauthenticated);
    }

    let (nonce, ciphertext) = data.split_at(AES_GCM_NONCE_BYTES);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AppError::Unauthenticated)
}
