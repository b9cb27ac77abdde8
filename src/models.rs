// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// URLs and key identifiers of a user's provisioned resources.
///
/// Computed once, on the user's first login, and read-only afterward.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BootstrapData {
    #[serde(rename = "authzKeyStoreURL")]
    pub authz_key_store_url: String,
    #[serde(rename = "opsKeyStoreURL")]
    pub ops_key_store_url: String,
    #[serde(rename = "userEDVVaultURL")]
    pub user_edv_vault_url: String,
    #[serde(rename = "opsEDVVaultURL")]
    pub ops_edv_vault_url: String,
    #[serde(rename = "edvOpsKIDURL")]
    pub edv_ops_kid_url: String,
    #[serde(rename = "edvHMACKIDURL")]
    pub edv_hmac_kid_url: String,
    /// Serialized delegated capability for the user vault. Bearer material.
    #[serde(rename = "userEDVCapability")]
    pub user_edv_capability: String,
}

impl std::fmt::Debug for BootstrapData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapData")
            .field("authz_key_store_url", &self.authz_key_store_url)
            .field("ops_key_store_url", &self.ops_key_store_url)
            .field("user_edv_vault_url", &self.user_edv_vault_url)
            .field("ops_edv_vault_url", &self.ops_edv_vault_url)
            .field("edv_ops_kid_url", &self.edv_ops_kid_url)
            .field("edv_hmac_kid_url", &self.edv_hmac_kid_url)
            .field("user_edv_capability", &"<redacted>")
            .finish()
    }
}

/// OAuth tokens of a user, keyed by subject.
///
/// Overwritten on every login. `bootstrap` is either fully present or absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTokens {
    pub sub: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapData>,
}

impl std::fmt::Debug for UserTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTokens")
            .field("sub", &self.sub)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("bootstrap", &self.bootstrap)
            .finish()
    }
}

/// Authenticated end user: the provider-assigned subject plus profile claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub sub: String,
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    #[serde(rename = "currentTime")]
    pub current_time: String,
}

#[cfg(test)]
pub(crate) fn sample_bootstrap() -> BootstrapData {
    BootstrapData {
        authz_key_store_url: "https://authz-kms.example.com/v1/keystores/a1".into(),
        ops_key_store_url: "https://ops-kms.example.com/v1/keystores/o1".into(),
        user_edv_vault_url: "https://user-edv.example.com/data-vaults/u1".into(),
        ops_edv_vault_url: "https://key-edv.example.com/data-vaults/k1".into(),
        edv_ops_kid_url: "https://ops-kms.example.com/v1/keystores/o1/keys/ka".into(),
        edv_hmac_kid_url: "https://ops-kms.example.com/v1/keystores/o1/keys/hm".into(),
        user_edv_capability: r#"{"id":"urn:uuid:cap"}"#.into(),
    }
}
