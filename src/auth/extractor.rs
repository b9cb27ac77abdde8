// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for cookie sessions.
//!
//! ```rust,ignore
//! async fn profile(LoggedInUser(sub): LoggedInUser) -> impl IntoResponse {
//!     // sub is the subject stored at login
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value;

use super::session::{Session, USER_SUB_KEY};
use crate::error::ApiError;
use crate::state::AppState;

/// The request's cookies and the session opened from them.
///
/// Rejects with `400 cannot open cookies` when the session cookie does not
/// verify or decrypt.
pub struct OpenSession {
    pub jar: CookieJar,
    pub session: Session,
}

impl FromRequestParts<AppState> for OpenSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session = state.sessions.open(&jar).map_err(|e| {
            tracing::warn!(error = %e, "failed to open session cookie");
            ApiError::bad_request("cannot open cookies")
        })?;
        Ok(OpenSession { jar, session })
    }
}

/// Subject of the logged-in user.
pub struct LoggedInUser(pub String);

impl FromRequestParts<AppState> for LoggedInUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let OpenSession { session, .. } = OpenSession::from_request_parts(parts, state).await?;
        logged_in_subject(&session).map(LoggedInUser)
    }
}

/// Read the subject out of a session.
pub fn logged_in_subject(session: &Session) -> Result<String, ApiError> {
    match session.get(USER_SUB_KEY) {
        None => Err(ApiError::forbidden("not logged in")),
        Some(Value::String(sub)) => Ok(sub.clone()),
        Some(_) => Err(ApiError::internal("invalid user sub cookie format")),
    }
}
