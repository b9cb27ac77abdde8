// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sealed cookie sessions.
//!
//! The whole session map is serialized to JSON, encrypted with AES-256-GCM
//! (cookie name as associated data) and authenticated with HMAC-SHA256 over
//! `name|timestamp|ciphertext`. The cookie value is
//!
//! ```text
//! <unix timestamp>|<base64url(nonce || ciphertext)>|<base64url(mac)>
//! ```
//!
//! A cookie older than the configured max age no longer opens. There is no
//! server-side session table: the cookie is the session.

use std::collections::BTreeMap;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::Value;
use sha2::Sha256;

use crate::config::{CookieSettings, COOKIE_KEY_LEN};

type HmacSha256 = Hmac<Sha256>;

/// Name of the browser cookie holding the session.
pub const SESSION_COOKIE_NAME: &str = "wallet_session";

/// Single-use OIDC `state` value.
pub const STATE_KEY: &str = "oauth_state";

/// Single-use OIDC `nonce` value.
pub const NONCE_KEY: &str = "oauth_nonce";

/// Subject of the logged-in user.
pub const USER_SUB_KEY: &str = "user_sub";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed session cookie")]
    Malformed,

    #[error("session cookie signature mismatch")]
    BadSignature,

    #[error("session cookie expired")]
    Expired,

    #[error("failed to decrypt session cookie")]
    Decrypt,

    #[error("failed to encrypt session cookie")]
    Encrypt,

    #[error("invalid session payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Decrypted session contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    values: BTreeMap<String, Value>,
}

impl Session {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Loads and persists sessions through the request's cookies.
pub trait SessionStore: Send + Sync {
    /// Open the session carried by the request. No cookie opens as an empty
    /// session; a cookie that fails to verify or decrypt is an error.
    fn open(&self, jar: &CookieJar) -> Result<Session, SessionError>;

    /// Seal the session into a cookie to be added to the response.
    fn save(&self, session: &Session) -> Result<Cookie<'static>, SessionError>;
}

/// [`SessionStore`] keeping everything in a sealed cookie.
pub struct CookieSessionStore {
    enc_key: [u8; COOKIE_KEY_LEN],
    auth_key: [u8; COOKIE_KEY_LEN],
    max_age: Duration,
    secure: bool,
    rng: SystemRandom,
}

impl CookieSessionStore {
    pub fn new(settings: &CookieSettings) -> Self {
        Self {
            enc_key: settings.enc_key,
            auth_key: settings.auth_key,
            max_age: settings.max_age,
            secure: settings.secure,
            rng: SystemRandom::new(),
        }
    }

    fn aead_key(&self) -> Result<LessSafeKey, SessionError> {
        let key = UnboundKey::new(&AES_256_GCM, &self.enc_key).map_err(|_| SessionError::Encrypt)?;
        Ok(LessSafeKey::new(key))
    }

    fn mac(&self, timestamp: i64, body: &str) -> Result<HmacSha256, SessionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.auth_key)
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;
        mac.update(SESSION_COOKIE_NAME.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b"|");
        mac.update(body.as_bytes());
        Ok(mac)
    }

    fn seal(&self, plaintext: Vec<u8>, timestamp: i64) -> Result<String, SessionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SessionError::Encrypt)?;

        let mut in_out = plaintext;
        self.aead_key()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(SESSION_COOKIE_NAME.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| SessionError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        let body = Base64UrlUnpadded::encode_string(&sealed);

        let tag = self.mac(timestamp, &body)?.finalize().into_bytes();
        Ok(format!(
            "{timestamp}|{body}|{}",
            Base64UrlUnpadded::encode_string(&tag)
        ))
    }

    fn unseal(&self, value: &str, now: i64) -> Result<Vec<u8>, SessionError> {
        let mut parts = value.splitn(3, '|');
        let (Some(ts), Some(body), Some(tag)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(SessionError::Malformed);
        };

        let timestamp: i64 = ts.parse().map_err(|_| SessionError::Malformed)?;
        let tag = Base64UrlUnpadded::decode_vec(tag).map_err(|_| SessionError::Malformed)?;
        self.mac(timestamp, body)?
            .verify_slice(&tag)
            .map_err(|_| SessionError::BadSignature)?;

        let age = now.saturating_sub(timestamp);
        if age < 0 || age as u64 > self.max_age.as_secs() {
            return Err(SessionError::Expired);
        }

        let sealed = Base64UrlUnpadded::decode_vec(body).map_err(|_| SessionError::Malformed)?;
        if sealed.len() < NONCE_LEN {
            return Err(SessionError::Malformed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| SessionError::Malformed)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .aead_key()?
            .open_in_place(nonce, Aad::from(SESSION_COOKIE_NAME.as_bytes()), &mut in_out)
            .map_err(|_| SessionError::Decrypt)?;
        Ok(plaintext.to_vec())
    }
}

impl SessionStore for CookieSessionStore {
    fn open(&self, jar: &CookieJar) -> Result<Session, SessionError> {
        let Some(cookie) = jar.get(SESSION_COOKIE_NAME) else {
            return Ok(Session::default());
        };

        let plaintext = self.unseal(cookie.value(), chrono::Utc::now().timestamp())?;
        let values = serde_json::from_slice(&plaintext)?;
        Ok(Session { values })
    }

    fn save(&self, session: &Session) -> Result<Cookie<'static>, SessionError> {
        let plaintext = serde_json::to_vec(&session.values)?;
        let value = self.seal(plaintext, chrono::Utc::now().timestamp())?;

        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        Ok(Cookie::build((SESSION_COOKIE_NAME, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(max_age))
            .build())
    }
}
