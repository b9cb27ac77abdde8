// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Claims parsing for ID tokens and user-info documents.

use serde_json::{Map, Value};

use crate::models::UserIdentity;

/// Registered JWT claims that describe the token rather than the user.
const TOKEN_CLAIMS: &[&str] = &["iss", "aud", "exp", "iat", "nbf", "nonce", "azp", "at_hash", "c_hash", "auth_time", "jti"];

#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("claims carry no subject")]
    MissingSubject,

    #[error("claims are not a JSON object")]
    NotAnObject,
}

impl UserIdentity {
    /// Build the identity from verified ID token claims.
    ///
    /// The subject is mandatory; registered token claims are dropped and the
    /// rest become the profile.
    pub fn from_claims(mut claims: Map<String, Value>) -> Result<Self, ClaimsError> {
        let sub = match claims.remove("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub,
            _ => return Err(ClaimsError::MissingSubject),
        };

        claims.retain(|name, _| !TOKEN_CLAIMS.contains(&name.as_str()));
        Ok(Self {
            sub,
            profile: claims,
        })
    }
}

/// Turn a user-info document into the claims returned to the browser, with
/// `sub` forced to the session's subject.
pub fn user_info_claims(info: Value, sub: &str) -> Result<Map<String, Value>, ClaimsError> {
    let Value::Object(mut claims) = info else {
        return Err(ClaimsError::NotAnObject);
    };
    claims.insert("sub".to_string(), Value::String(sub.to_string()));
    Ok(claims)
}
