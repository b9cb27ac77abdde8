// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! OpenID Connect login for the wallet, backed by a sealed cookie session.
//!
//! ## Auth Flow
//!
//! 1. `GET /oidc/login` stores a random `state` and `nonce` in the session
//!    cookie and redirects the browser to the identity provider
//! 2. The provider redirects back to `GET /oidc/callback?code=&state=`
//! 3. The server:
//!    - Checks `state` against the session (single use)
//!    - Exchanges `code` for tokens
//!    - Verifies the ID token via the provider's JWKS, including `nonce`
//!    - Stores the subject in the session cookie
//! 4. Later requests carry the cookie; [`LoggedInUser`] resolves the subject
//!
//! ## Security
//!
//! - The session cookie is encrypted (AES-256-GCM) and authenticated
//!   (HMAC-SHA256), `HttpOnly`, `SameSite=Lax`
//! - Sessions expire after the configured max age
//! - Clock skew tolerance for ID tokens is 60 seconds

pub mod claims;
pub mod extractor;
pub mod jwks;
pub mod oidc;
pub mod session;

pub use claims::ClaimsError;
pub use extractor::{LoggedInUser, OpenSession};
pub use jwks::JwksManager;
pub use oidc::{HttpOidcClient, OAuthToken, OidcClient, OidcError};
pub use session::{CookieSessionStore, Session, SessionError, SessionStore};
