// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization server client.
//!
//! The authorization server keeps the server-side share of the user secret and
//! the durable copy of each user's bootstrap data.

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};

use crate::credential::UserCredential;
use crate::models::BootstrapData;

const SECRET_PATH: &str = "/secret";
const BOOTSTRAP_PATH: &str = "/bootstrap";

#[derive(Debug, thiserror::Error)]
pub enum AuthServerError {
    #[error("auth server request failed: {0}")]
    Request(String),

    #[error("invalid auth server response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait AuthServer: Send + Sync {
    /// Hand over a secret share with a signature made by the user's
    /// authorization key.
    async fn post_secret_share(
        &self,
        payload: &[u8],
        signature: &[u8],
        credential: &UserCredential,
    ) -> Result<(), AuthServerError>;

    async fn post_bootstrap_data(
        &self,
        credential: &UserCredential,
        data: &BootstrapData,
    ) -> Result<(), AuthServerError>;

    async fn get_bootstrap_data(
        &self,
        credential: &UserCredential,
    ) -> Result<BootstrapData, AuthServerError>;
}

#[derive(Serialize)]
struct SecretShareRequest {
    payload: String,
    signature: String,
}

#[derive(Serialize, Deserialize)]
struct BootstrapEnvelope {
    data: BootstrapData,
}

#[derive(Clone)]
pub struct HttpAuthServer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAuthServer {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        credential: &UserCredential,
    ) -> Result<(), AuthServerError> {
        let url = format!("{}{path}", self.base_url);
        let response = credential
            .apply(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| AuthServerError::Request(format!("POST {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthServerError::Request(format!(
                "POST {path} returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthServer for HttpAuthServer {
    async fn post_secret_share(
        &self,
        payload: &[u8],
        signature: &[u8],
        credential: &UserCredential,
    ) -> Result<(), AuthServerError> {
        let body = SecretShareRequest {
            payload: Base64UrlUnpadded::encode_string(payload),
            signature: Base64UrlUnpadded::encode_string(signature),
        };
        self.post(SECRET_PATH, &body, credential).await
    }

    async fn post_bootstrap_data(
        &self,
        credential: &UserCredential,
        data: &BootstrapData,
    ) -> Result<(), AuthServerError> {
        let body = BootstrapEnvelope { data: data.clone() };
        self.post(BOOTSTRAP_PATH, &body, credential).await
    }

    async fn get_bootstrap_data(
        &self,
        credential: &UserCredential,
    ) -> Result<BootstrapData, AuthServerError> {
        let url = format!("{}{BOOTSTRAP_PATH}", self.base_url);
        let response = credential
            .apply(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AuthServerError::Request(format!("GET {BOOTSTRAP_PATH} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthServerError::Request(format!(
                "GET {BOOTSTRAP_PATH} returned {status}: {body}"
            )));
        }

        let envelope: BootstrapEnvelope = response.json().await.map_err(|e| {
            AuthServerError::InvalidResponse(format!("GET {BOOTSTRAP_PATH} invalid JSON: {e}"))
        })?;
        Ok(envelope.data)
    }
}
