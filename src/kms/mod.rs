// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Management Service client
//!
//! Private keys never leave the KMS. The server only ever sees key URLs and
//! public keys, and asks the KMS to sign on its behalf.
//!
//! ## Endpoints
//!
//! | Operation | Request | Response |
//! |-----------|---------|----------|
//! | create key store | `POST {kms}/v1/keystores` `{controller, edv?}` | `Location` or `{key_store_url}` |
//! | create key | `POST {keystore}/keys` `{key_type}` | `Location` or `{key_url}`, `{public_key}` |
//! | controller DID | `POST {keystore}/did` `{key_id}` | `{did}` |
//! | sign | `POST {key_url}/sign` `{message}` | `{signature}` |
//!
//! Binary values travel as unpadded base64url. Every call carries the
//! [`UserCredential`] headers.

pub mod signer;

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use reqwest::header::LOCATION;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::credential::UserCredential;

pub use signer::{KmsSigner, Signer, SignerError};

const KEY_STORES_PATH: &str = "/v1/keystores";

/// Key types the provisioning flow asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Signing key of the authorization key store.
    Ed25519,
    /// Key-agreement key used to wrap content-encryption keys.
    NistP256EcdhKw,
    /// HMAC key for the vault's encrypted indices.
    HmacSha256Tag256,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ED25519",
            KeyType::NistP256EcdhKw => "NISTP256ECDHKW",
            KeyType::HmacSha256Tag256 => "HMACSHA256Tag256",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KmsError {
    #[error("kms request failed: {0}")]
    Request(String),

    #[error("invalid kms response: {0}")]
    InvalidResponse(String),
}

/// Vault holding an EDV-backed key store's wrapped keys.
#[derive(Clone, PartialEq, Serialize)]
pub struct EdvBinding {
    pub vault_url: String,
    /// Serialized capability authorizing the KMS on the vault.
    pub capability: String,
}

impl std::fmt::Debug for EdvBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdvBinding")
            .field("vault_url", &self.vault_url)
            .field("capability", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateKeyStoreRequest {
    pub controller: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edv: Option<EdvBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStore {
    pub url: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedKey {
    pub key_url: String,
    pub key_id: String,
    pub public_key: Vec<u8>,
}

#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn create_key_store(
        &self,
        kms_url: &str,
        request: &CreateKeyStoreRequest,
        credential: &UserCredential,
    ) -> Result<KeyStore, KmsError>;

    async fn create_key(
        &self,
        key_store_url: &str,
        key_type: KeyType,
        credential: &UserCredential,
    ) -> Result<CreatedKey, KmsError>;

    /// Issue a DID controlled by the given key of the key store.
    async fn create_did(
        &self,
        key_store_url: &str,
        key_id: &str,
        credential: &UserCredential,
    ) -> Result<String, KmsError>;

    async fn sign(
        &self,
        key_url: &str,
        data: &[u8],
        credential: &UserCredential,
    ) -> Result<Vec<u8>, KmsError>;
}

#[derive(Deserialize)]
struct KeyStoreResponse {
    #[serde(default)]
    key_store_url: Option<String>,
}

#[derive(Default, Deserialize)]
struct KeyResponse {
    #[serde(default)]
    key_url: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
}

#[derive(Deserialize)]
struct DidResponse {
    did: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

/// [`KeyManager`] over the KMS REST API.
#[derive(Clone)]
pub struct HttpKeyManager {
    client: reqwest::Client,
}

impl HttpKeyManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST a JSON body, returning the `Location` header and the parsed body.
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        credential: &UserCredential,
    ) -> Result<(Option<String>, Value), KmsError> {
        let response = credential
            .apply(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| KmsError::Request(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(KmsError::Request(format!(
                "POST {url} returned {status}: {text}"
            )));
        }

        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| KmsError::InvalidResponse(format!("POST {url} invalid JSON: {e}")))?
        };
        Ok((location, value))
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, KmsError> {
    serde_json::from_value(value).map_err(|e| KmsError::InvalidResponse(format!("{what}: {e}")))
}

/// Last path segment of a resource URL.
pub(crate) fn last_segment(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl KeyManager for HttpKeyManager {
    async fn create_key_store(
        &self,
        kms_url: &str,
        request: &CreateKeyStoreRequest,
        credential: &UserCredential,
    ) -> Result<KeyStore, KmsError> {
        let url = format!("{}{KEY_STORES_PATH}", kms_url.trim_end_matches('/'));
        let body = serde_json::to_value(request)
            .map_err(|e| KmsError::Request(format!("serialize key store request: {e}")))?;
        let (location, value) = self.post_json(&url, &body, credential).await?;

        let key_store_url = match location {
            Some(location) => location,
            None => decode_body::<KeyStoreResponse>(value, "key store response")?
                .key_store_url
                .ok_or_else(|| KmsError::InvalidResponse("missing key store url".into()))?,
        };

        tracing::debug!(key_store_url = %key_store_url, "key store created");
        Ok(KeyStore {
            id: last_segment(&key_store_url),
            url: key_store_url,
        })
    }

    async fn create_key(
        &self,
        key_store_url: &str,
        key_type: KeyType,
        credential: &UserCredential,
    ) -> Result<CreatedKey, KmsError> {
        let url = format!("{}/keys", key_store_url.trim_end_matches('/'));
        let body = json!({ "key_type": key_type.as_str() });
        let (location, value) = self.post_json(&url, &body, credential).await?;

        let parsed: KeyResponse = if value.is_null() {
            KeyResponse::default()
        } else {
            decode_body(value, "key response")?
        };
        let key_url = location
            .or(parsed.key_url)
            .ok_or_else(|| KmsError::InvalidResponse("missing key url".into()))?;
        let public_key = match parsed.public_key {
            Some(encoded) => Base64UrlUnpadded::decode_vec(&encoded)
                .map_err(|e| KmsError::InvalidResponse(format!("public key: {e}")))?,
            None => Vec::new(),
        };

        Ok(CreatedKey {
            key_id: last_segment(&key_url),
            key_url,
            public_key,
        })
    }

    async fn create_did(
        &self,
        key_store_url: &str,
        key_id: &str,
        credential: &UserCredential,
    ) -> Result<String, KmsError> {
        let url = format!("{}/did", key_store_url.trim_end_matches('/'));
        let (_, value) = self
            .post_json(&url, &json!({ "key_id": key_id }), credential)
            .await?;
        Ok(decode_body::<DidResponse>(value, "did response")?.did)
    }

    async fn sign(
        &self,
        key_url: &str,
        data: &[u8],
        credential: &UserCredential,
    ) -> Result<Vec<u8>, KmsError> {
        let url = format!("{}/sign", key_url.trim_end_matches('/'));
        let body = json!({ "message": Base64UrlUnpadded::encode_string(data) });
        let (_, value) = self.post_json(&url, &body, credential).await?;

        let response: SignResponse = serde_json::from_value(value)
            .map_err(|e| KmsError::InvalidResponse(format!("unmarshal sign resp: {e}")))?;
        Base64UrlUnpadded::decode_vec(&response.signature)
            .map_err(|e| KmsError::InvalidResponse(format!("unmarshal sign resp: {e}")))
    }
}
