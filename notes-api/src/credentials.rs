//! Password hashing and bearer tokens.
//!
//! Passwords are stored as argon2id PHC strings. Tokens are
//! `base64url(claims json) "." base64url(HMAC-SHA256(secret, payload))`
//! and carry their own expiry, so verification needs no storage round trip.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{users::UserId, Error, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct Credentials {
    secret: Arc<[u8]>,
    ttl: Duration,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("secret", &"[redacted]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Credentials {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            ttl,
        }
    }

    pub fn from_config() -> Self {
        let config = crate::config();
        Self::new(&config.token_secret, Duration::hours(config.token_ttl_hours))
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Unexpected(format!("Failed to hash password: {e}")))
    }

    /// A malformed stored hash never verifies.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    }

    pub fn issue_token(&self, sub: UserId, username: &str, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub,
            username: username.to_owned(),
            email: email.to_owned(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        self.sign(&claims)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let (payload, signature) = token.split_once('.').ok_or(Error::Unauthorized)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| Error::Unauthorized)?;

        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| Error::Unauthorized)?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|json| serde_json::from_slice(&json).ok())
            .ok_or(Error::Unauthorized)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(Error::Unauthorized);
        }

        Ok(claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        let json = serde_json::to_vec(claims).map_err(|e| Error::Unexpected(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload)?.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| Error::Unexpected(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}
