// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OpenID Connect identity provider client.
//!
//! ## Flow
//!
//! 1. At startup the provider metadata is discovered from
//!    `<issuer>/.well-known/openid-configuration`, retried with a constant
//!    one second backoff so the server can start before the provider.
//! 2. Login builds an authorization-code URL carrying `state` and `nonce`.
//! 3. The callback exchanges the code at the token endpoint (client secret
//!    via HTTP basic auth) and verifies the returned ID token against the
//!    provider's JWKS: signature, `iss`, `aud`, `exp` and `nonce`.
//! 4. The profile endpoint calls `userinfo` with the stored access token.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::jwks::{JwksError, JwksManager};
use crate::config::OidcSettings;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Delay between provider discovery attempts.
const DISCOVERY_BACKOFF: Duration = Duration::from_secs(1);

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error("failed to exchange oauth2 code for token: {0}")]
    Exchange(String),

    #[error("failed to verify id_token: {0}")]
    Verification(String),

    #[error("id_token nonce does not match the login request")]
    NonceMismatch,

    #[error("failed to fetch user info: {0}")]
    UserInfo(String),

    #[error(transparent)]
    Jwks(#[from] JwksError),
}

/// Tokens returned by the token endpoint.
#[derive(Clone, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .finish()
    }
}

/// The identity provider operations used by the login flow.
#[async_trait]
pub trait OidcClient: Send + Sync {
    /// Authorization request URL carrying `state`, `nonce` and the scopes.
    fn auth_code_url(&self, state: &str, nonce: &str) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange(&self, code: &str) -> Result<OAuthToken, OidcError>;

    /// Verify a raw ID token and return its claims. The token's `nonce` claim
    /// must equal `nonce`.
    async fn verify_id_token(
        &self,
        raw_token: &str,
        nonce: &str,
    ) -> Result<Map<String, Value>, OidcError>;

    /// Fetch the user-info document for an access token.
    async fn user_info(&self, access_token: &str) -> Result<Value, OidcError>;
}

/// Subset of the discovery document this client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
}

/// [`OidcClient`] speaking to a real provider over HTTP.
pub struct HttpOidcClient {
    settings: OidcSettings,
    metadata: ProviderMetadata,
    authorization_url: Url,
    jwks: JwksManager,
    client: reqwest::Client,
}

impl HttpOidcClient {
    /// Discover the provider, retrying up to `max_retries` attempts.
    pub async fn discover(
        settings: OidcSettings,
        client: reqwest::Client,
        max_retries: u32,
    ) -> Result<Self, OidcError> {
        Self::discover_with_backoff(settings, client, max_retries, DISCOVERY_BACKOFF).await
    }

    pub async fn discover_with_backoff(
        settings: OidcSettings,
        client: reqwest::Client,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<Self, OidcError> {
        let url = format!(
            "{}{DISCOVERY_PATH}",
            settings.provider_url.trim_end_matches('/')
        );
        let attempts = max_retries.max(1);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match fetch_metadata(&client, &url).await {
                Ok(metadata) => {
                    tracing::info!(issuer = %metadata.issuer, "OIDC provider discovered");
                    return Self::from_metadata(settings, metadata, client);
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts = attempts, error = %e, "OIDC provider discovery failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        Err(OidcError::Discovery(last_error))
    }

    fn from_metadata(
        settings: OidcSettings,
        metadata: ProviderMetadata,
        client: reqwest::Client,
    ) -> Result<Self, OidcError> {
        let authorization_url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            OidcError::Discovery(format!(
                "invalid authorization_endpoint {:?}: {e}",
                metadata.authorization_endpoint
            ))
        })?;
        let jwks = JwksManager::new(metadata.jwks_uri.clone(), client.clone());

        Ok(Self {
            settings,
            metadata,
            authorization_url,
            jwks,
            client,
        })
    }

    fn scopes(&self) -> String {
        let mut scopes = vec!["openid".to_string()];
        scopes.extend(
            self.settings
                .scopes
                .iter()
                .filter(|s| s.as_str() != "openid")
                .cloned(),
        );
        scopes.join(" ")
    }
}

async fn fetch_metadata(client: &reqwest::Client, url: &str) -> Result<ProviderMetadata, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("GET {url} returned {status}"));
    }
    response.json().await.map_err(|e| e.to_string())
}

#[async_trait]
impl OidcClient for HttpOidcClient {
    fn auth_code_url(&self, state: &str, nonce: &str) -> String {
        let mut url = self.authorization_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.callback_url)
            .append_pair("scope", &self.scopes())
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        url.into()
    }

    async fn exchange(&self, code: &str) -> Result<OAuthToken, OidcError> {
        let response = self
            .client
            .post(&self.metadata.token_endpoint)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.settings.callback_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OidcError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::Exchange(format!(
                "POST token endpoint returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OidcError::Exchange(e.to_string()))
    }

    async fn verify_id_token(
        &self,
        raw_token: &str,
        nonce: &str,
    ) -> Result<Map<String, Value>, OidcError> {
        let header =
            decode_header(raw_token).map_err(|e| OidcError::Verification(e.to_string()))?;

        let (key, algorithm) = match &header.kid {
            Some(kid) => self.jwks.get_decoding_key(kid).await?,
            None => self.jwks.get_any_decoding_key().await?,
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[&self.metadata.issuer]);
        validation.set_audience(&[&self.settings.client_id]);

        let claims = decode::<Map<String, Value>>(raw_token, &key, &validation)
            .map_err(|e| OidcError::Verification(e.to_string()))?
            .claims;

        if claims.get("nonce").and_then(Value::as_str) != Some(nonce) {
            return Err(OidcError::NonceMismatch);
        }

        Ok(claims)
    }

    async fn user_info(&self, access_token: &str) -> Result<Value, OidcError> {
        let endpoint = self
            .metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| OidcError::UserInfo("provider has no userinfo endpoint".into()))?;

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OidcError::UserInfo(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::UserInfo(format!("GET userinfo returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| OidcError::UserInfo(e.to_string()))
    }
}
