// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization capabilities (zcap-style delegation).
//!
//! A vault's root capability is delegated to an invoker by minting a child
//! capability that points at its parent and carries a delegation proof. The
//! proof is an Ed25519 signature over the canonical JSON of the child (keys
//! sorted, proof omitted), produced by a KMS-held key.
//!
//! Delegation depth is bounded by [`MAX_DELEGATION_DEPTH`]: a root may be
//! delegated once and the result may not be delegated again.
//!
//! Capabilities are bearer secrets. `Debug` shows only the id and nothing in
//! this module logs their content.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kms::{Signer, SignerError};

pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v2";
pub const PROOF_TYPE: &str = "Ed25519Signature2018";
pub const DELEGATION_PURPOSE: &str = "capabilityDelegation";

/// Links allowed below a root capability.
pub const MAX_DELEGATION_DEPTH: usize = 1;

/// Lifetime of a delegated capability when none is requested.
const DEFAULT_EXPIRY_DAYS: i64 = 365;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("failed to parse capability: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("capability has no id")]
    MissingId,

    #[error("delegation depth {depth} reaches the maximum of {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("action '{0}' is not allowed by the parent capability")]
    ActionNotAllowed(String),

    #[error("failed to serialize capability: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Sign(#[from] SignerError),

    #[error("capability signature does not verify")]
    InvalidSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationTarget {
    pub id: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: String,
    pub verification_method: String,
    pub proof_purpose: String,
    #[serde(default)]
    pub capability_chain: Vec<String>,
    pub proof_value: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    #[serde(rename = "@context", default)]
    pub context: Value,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    pub invocation_target: InvocationTarget,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_action: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proof: Vec<Proof>,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Capability {
    pub fn parse(bytes: &[u8]) -> Result<Self, CapabilityError> {
        let capability: Capability = serde_json::from_slice(bytes).map_err(CapabilityError::Parse)?;
        if capability.id.is_empty() {
            return Err(CapabilityError::MissingId);
        }
        Ok(capability)
    }

    pub fn to_json(&self) -> Result<String, CapabilityError> {
        serde_json::to_string(self).map_err(CapabilityError::Serialize)
    }

    /// Number of delegations between this capability and its root.
    pub fn depth(&self) -> usize {
        self.delegation_proof()
            .map(|proof| proof.capability_chain.len())
            .unwrap_or(0)
    }

    fn delegation_proof(&self) -> Option<&Proof> {
        self.proof
            .iter()
            .rev()
            .find(|p| p.proof_purpose == DELEGATION_PURPOSE)
    }

    /// Bytes covered by the delegation proof.
    fn signing_payload(&self) -> Result<Vec<u8>, CapabilityError> {
        let mut unsigned = self.clone();
        unsigned.proof.clear();
        let value = serde_json::to_value(&unsigned).map_err(CapabilityError::Serialize)?;
        serde_json::to_vec(&canonicalize(value)).map_err(CapabilityError::Serialize)
    }
}

/// Parameters of a delegation.
#[derive(Debug, Clone)]
pub struct DelegateOptions {
    pub invoker: String,
    /// Defaults to the parent's actions when empty.
    pub allowed_actions: Vec<String>,
    pub expires: Option<DateTime<Utc>>,
    /// Identifier of the signing key placed in the proof.
    pub verification_method: String,
}

/// Mint a child of `parent` for `options.invoker`, signed by `signer`.
pub async fn delegate(
    parent: &Capability,
    options: &DelegateOptions,
    signer: &dyn Signer,
) -> Result<Capability, CapabilityError> {
    let depth = parent.depth();
    if depth >= MAX_DELEGATION_DEPTH {
        return Err(CapabilityError::DepthExceeded {
            depth,
            max: MAX_DELEGATION_DEPTH,
        });
    }

    let allowed_action = if options.allowed_actions.is_empty() {
        parent.allowed_action.clone()
    } else {
        if !parent.allowed_action.is_empty() {
            if let Some(action) = options
                .allowed_actions
                .iter()
                .find(|a| !parent.allowed_action.contains(a))
            {
                return Err(CapabilityError::ActionNotAllowed(action.clone()));
            }
        }
        options.allowed_actions.clone()
    };

    let mut capability_chain = parent
        .delegation_proof()
        .map(|p| p.capability_chain.clone())
        .unwrap_or_default();
    capability_chain.push(parent.id.clone());

    let now = Utc::now();
    let expires = options
        .expires
        .unwrap_or_else(|| now + Duration::days(DEFAULT_EXPIRY_DAYS));

    let mut capability = Capability {
        context: Value::String(SECURITY_CONTEXT.to_string()),
        id: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
        parent_capability: Some(parent.id.clone()),
        invoker: Some(options.invoker.clone()),
        controller: Some(options.invoker.clone()),
        invocation_target: parent.invocation_target.clone(),
        allowed_action,
        expires: Some(expires.to_rfc3339_opts(SecondsFormat::Secs, true)),
        proof: Vec::new(),
    };

    let signature = signer.sign(&capability.signing_payload()?).await?;
    capability.proof.push(Proof {
        proof_type: PROOF_TYPE.to_string(),
        created: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        verification_method: options.verification_method.clone(),
        proof_purpose: DELEGATION_PURPOSE.to_string(),
        capability_chain,
        proof_value: Base64UrlUnpadded::encode_string(&signature),
    });

    Ok(capability)
}

/// Check the delegation proof of `capability` against an Ed25519 public key.
#[cfg(test)]
pub(crate) fn verify_delegation(capability: &Capability, public_key: &[u8]) -> Result<(), CapabilityError> {
    use ring::signature::{UnparsedPublicKey, ED25519};

    let proof = capability
        .delegation_proof()
        .ok_or(CapabilityError::InvalidSignature)?;
    let signature = Base64UrlUnpadded::decode_vec(&proof.proof_value)
        .map_err(|_| CapabilityError::InvalidSignature)?;

    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(&capability.signing_payload()?, &signature)
        .map_err(|_| CapabilityError::InvalidSignature)
}

/// Sort object keys recursively.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestKey;
    use async_trait::async_trait;
    use serde_json::json;

    struct LocalSigner(TestKey);

    #[async_trait]
    impl Signer for LocalSigner {
        async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignerError> {
            Ok(self.0.sign(data))
        }
    }

    fn root() -> Capability {
        Capability::parse(
            json!({
                "@context": SECURITY_CONTEXT,
                "id": "https://edv.example.com/data-vaults/v1/zcaps/root",
                "invocationTarget": { "id": "https://edv.example.com/data-vaults/v1", "type": "urn:edv:vault" },
                "controller": "did:example:ctrl",
                "allowedAction": ["read", "write"],
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    fn options(actions: &[&str]) -> DelegateOptions {
        DelegateOptions {
            invoker: "https://ops-kms.example.com/v1/keystores/o1".into(),
            allowed_actions: actions.iter().map(|a| a.to_string()).collect(),
            expires: None,
            verification_method: "did:example:ctrl#k1".into(),
        }
    }

    #[test]
    fn parse_rejects_missing_id() {
        let err = Capability::parse(br#"{"invocationTarget":{"id":"x"}}"#).unwrap_err();
        assert!(matches!(err, CapabilityError::Parse(_)));

        let err = Capability::parse(br#"{"id":"","invocationTarget":{"id":"x"}}"#).unwrap_err();
        assert!(matches!(err, CapabilityError::MissingId));
    }

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let value = canonicalize(json!({"b": {"z": 1, "a": 2}, "a": [ {"y": 1, "x": 0} ]}));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"a":[{"x":0,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }

    #[tokio::test]
    async fn delegated_capability_is_signed_and_chained() {
        let signer = LocalSigner(TestKey::generate());
        let parent = root();

        let child = delegate(&parent, &options(&["read"]), &signer).await.unwrap();
        assert_eq!(child.parent_capability.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.invoker.as_deref(), Some("https://ops-kms.example.com/v1/keystores/o1"));
        assert_eq!(child.invocation_target, parent.invocation_target);
        assert_eq!(child.allowed_action, vec!["read"]);
        assert!(child.id.starts_with("urn:uuid:"));
        assert!(child.expires.is_some());
        assert_eq!(child.depth(), 1);

        let proof = &child.proof[0];
        assert_eq!(proof.proof_purpose, DELEGATION_PURPOSE);
        assert_eq!(proof.capability_chain, vec![parent.id.clone()]);
        verify_delegation(&child, signer.0.public_key()).unwrap();

        // Survives a trip through storage.
        let reparsed = Capability::parse(child.to_json().unwrap().as_bytes()).unwrap();
        verify_delegation(&reparsed, signer.0.public_key()).unwrap();
    }

    #[tokio::test]
    async fn empty_actions_inherit_parent() {
        let signer = LocalSigner(TestKey::generate());
        let child = delegate(&root(), &options(&[]), &signer).await.unwrap();
        assert_eq!(child.allowed_action, vec!["read", "write"]);
    }

    #[tokio::test]
    async fn tampering_breaks_signature() {
        let signer = LocalSigner(TestKey::generate());
        let mut child = delegate(&root(), &options(&["read"]), &signer).await.unwrap();
        child.allowed_action.push("write".into());
        assert!(matches!(
            verify_delegation(&child, signer.0.public_key()),
            Err(CapabilityError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn delegation_depth_is_bounded() {
        let signer = LocalSigner(TestKey::generate());
        let child = delegate(&root(), &options(&["read"]), &signer).await.unwrap();

        let err = delegate(&child, &options(&["read"]), &signer).await.unwrap_err();
        assert!(matches!(err, CapabilityError::DepthExceeded { depth: 1, max: 1 }));
    }

    #[tokio::test]
    async fn cannot_widen_actions() {
        let signer = LocalSigner(TestKey::generate());
        let err = delegate(&root(), &options(&["admin"]), &signer).await.unwrap_err();
        assert!(matches!(err, CapabilityError::ActionNotAllowed(a) if a == "admin"));
    }
}
