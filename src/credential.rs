// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-user credentials attached to outbound backend calls.

use reqwest::RequestBuilder;

/// Header naming the user on whose behalf a KMS call is made.
pub const KMS_USER_HEADER: &str = "Hub-Kms-User";

/// Header carrying the KMS-side share of the user's split secret.
pub const KMS_SECRET_HEADER: &str = "Hub-Kms-Secret";

/// The user's access token plus, once onboarding has split the user secret,
/// the share that unlocks the authorization key store.
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredential {
    pub sub: String,
    pub access_token: String,
    pub secret_share: Option<String>,
}

impl UserCredential {
    pub fn new(sub: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            access_token: access_token.into(),
            secret_share: None,
        }
    }

    pub fn with_secret_share(mut self, share: impl Into<String>) -> Self {
        self.secret_share = Some(share.into());
        self
    }

    /// Attach authorization headers to an outbound request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .bearer_auth(&self.access_token)
            .header(KMS_USER_HEADER, &self.sub);

        match &self.secret_share {
            Some(share) => request.header(KMS_SECRET_HEADER, share),
            None => request,
        }
    }
}

impl std::fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredential")
            .field("sub", &self.sub)
            .field("access_token", &"<redacted>")
            .field(
                "secret_share",
                &self.secret_share.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
