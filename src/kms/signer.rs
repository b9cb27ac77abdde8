// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Detached signatures produced by a KMS-held key.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CreatedKey, KeyManager, KmsError};
use crate::credential::UserCredential;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("failed to sign from kms: {0}")]
    Kms(#[source] KmsError),
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// [`Signer`] whose private key lives in the KMS.
pub struct KmsSigner {
    kms: Arc<dyn KeyManager>,
    key_url: String,
    credential: UserCredential,
}

impl KmsSigner {
    pub fn new(kms: Arc<dyn KeyManager>, key: &CreatedKey, credential: UserCredential) -> Self {
        Self {
            kms,
            key_url: key.key_url.clone(),
            credential,
        }
    }

    /// Same key, different credential (e.g. once the secret share exists).
    pub fn with_credential(mut self, credential: UserCredential) -> Self {
        self.credential = credential;
        self
    }
}

#[async_trait]
impl Signer for KmsSigner {
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.kms
            .sign(&self.key_url, data, &self.credential)
            .await
            .map_err(SignerError::Kms)
    }
}
