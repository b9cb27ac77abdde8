// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted Data Vault client.
//!
//! A vault is created with `POST {edv}/data-vaults`. The server answers with
//! the vault URL in `Location` and the vault's root capability as the body;
//! the capability is what later gets delegated to the operational key store.

use async_trait::async_trait;
use reqwest::header::LOCATION;
use serde::{Deserialize, Serialize};

use crate::credential::UserCredential;

const DATA_VAULTS_PATH: &str = "/data-vaults";

pub const KEK_TYPE: &str = "AesKeyWrappingKey2019";
pub const HMAC_TYPE: &str = "Sha256HmacKey2019";

#[derive(Debug, thiserror::Error)]
pub enum EdvError {
    #[error("edv request failed: {0}")]
    Request(String),

    #[error("invalid edv response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyReference {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVaultConfiguration {
    pub sequence: u64,
    pub controller: String,
    pub reference_id: String,
    pub kek: KeyReference,
    pub hmac: KeyReference,
}

impl DataVaultConfiguration {
    /// Configuration for a fresh vault whose keys live at the given URLs.
    pub fn new(controller: impl Into<String>, kek_url: impl Into<String>, hmac_url: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            controller: controller.into(),
            reference_id: uuid::Uuid::new_v4().to_string(),
            kek: KeyReference {
                id: kek_url.into(),
                key_type: KEK_TYPE.to_string(),
            },
            hmac: KeyReference {
                id: hmac_url.into(),
                key_type: HMAC_TYPE.to_string(),
            },
        }
    }
}

pub struct CreatedVault {
    pub url: String,
    /// Root capability as returned by the server. Bearer material.
    pub capability: Vec<u8>,
}

impl std::fmt::Debug for CreatedVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedVault")
            .field("url", &self.url)
            .field("capability", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait VaultClient: Send + Sync {
    async fn create_data_vault(
        &self,
        config: &DataVaultConfiguration,
        credential: &UserCredential,
    ) -> Result<CreatedVault, EdvError>;
}

/// [`VaultClient`] for one EDV server.
#[derive(Clone)]
pub struct HttpVaultClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVaultClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl VaultClient for HttpVaultClient {
    async fn create_data_vault(
        &self,
        config: &DataVaultConfiguration,
        credential: &UserCredential,
    ) -> Result<CreatedVault, EdvError> {
        let url = format!("{}{DATA_VAULTS_PATH}", self.base_url);
        let response = credential
            .apply(self.client.post(&url))
            .json(config)
            .send()
            .await
            .map_err(|e| EdvError::Request(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| EdvError::Request(format!("POST {url} body: {e}")))?;

        if !status.is_success() {
            return Err(EdvError::Request(format!(
                "POST {url} returned {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let vault_url = location
            .ok_or_else(|| EdvError::InvalidResponse("missing vault location".to_string()))?;
        if body.is_empty() {
            return Err(EdvError::InvalidResponse(
                "missing root capability".to_string(),
            ));
        }

        tracing::debug!(vault_url = %vault_url, reference_id = %config.reference_id, "data vault created");
        Ok(CreatedVault {
            url: vault_url,
            capability: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> DataVaultConfiguration {
        DataVaultConfiguration::new("did:example:ctrl", "https://kms/k/kek", "https://kms/k/hmac")
    }

    #[test]
    fn configuration_wire_format() {
        let value = serde_json::to_value(config()).unwrap();
        assert_eq!(value["sequence"], 0);
        assert_eq!(value["controller"], "did:example:ctrl");
        assert!(value["referenceId"].as_str().is_some());
        assert_eq!(value["kek"]["type"], KEK_TYPE);
        assert_eq!(value["hmac"]["id"], "https://kms/k/hmac");
    }

    #[tokio::test]
    async fn create_returns_location_and_capability() {
        let server = MockServer::start().await;
        let vault_url = format!("{}/data-vaults/v-1", server.uri());
        Mock::given(method("POST"))
            .and(path("/data-vaults"))
            .and(header("authorization", "Bearer at"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", vault_url.as_str())
                    .set_body_json(json!({ "id": "urn:root-cap" })),
            )
            .mount(&server)
            .await;

        let edv = HttpVaultClient::new(format!("{}/", server.uri()), reqwest::Client::new());
        let vault = edv
            .create_data_vault(&config(), &UserCredential::new("alice", "at"))
            .await
            .unwrap();
        assert_eq!(vault.url, vault_url);
        let cap: serde_json::Value = serde_json::from_slice(&vault.capability).unwrap();
        assert_eq!(cap["id"], "urn:root-cap");
    }

    #[tokio::test]
    async fn missing_location_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
            .mount(&server)
            .await;

        let edv = HttpVaultClient::new(server.uri(), reqwest::Client::new());
        let err = edv
            .create_data_vault(&config(), &UserCredential::new("alice", "at"))
            .await
            .unwrap_err();
        assert!(matches!(err, EdvError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn conflict_is_a_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("duplicate reference id"))
            .mount(&server)
            .await;

        let edv = HttpVaultClient::new(server.uri(), reqwest::Client::new());
        let err = edv
            .create_data_vault(&config(), &UserCredential::new("alice", "at"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("409"));
    }
}
