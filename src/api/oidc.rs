// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Browser-facing OIDC endpoints: login, callback, profile and logout.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use base64ct::{Base64UrlUnpadded, Encoding};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use serde_json::Value;
use utoipa::IntoParams;

use crate::auth::claims::user_info_claims;
use crate::auth::extractor::{LoggedInUser, OpenSession};
use crate::auth::session::{Session, NONCE_KEY, STATE_KEY, USER_SUB_KEY};
use crate::credential::UserCredential;
use crate::error::ApiError;
use crate::models::{UserIdentity, UserTokens};
use crate::state::AppState;
use crate::storage::{TokenRepository, UserRepository};

/// Bytes of entropy in `state` and `nonce`.
const RANDOM_TOKEN_LEN: usize = 32;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// Authorization code issued by the provider.
    pub code: Option<String>,
    /// Echo of the `state` sent at login.
    pub state: Option<String>,
}

fn redirect(status: StatusCode, jar: Option<CookieJar>, location: String) -> Response {
    match jar {
        Some(jar) => (status, jar, [(header::LOCATION, location)]).into_response(),
        None => (status, [(header::LOCATION, location)]).into_response(),
    }
}

fn random_token() -> Result<String, ApiError> {
    let mut bytes = [0u8; RANDOM_TOKEN_LEN];
    SystemRandom::new().fill(&mut bytes).map_err(|_| {
        tracing::error!("system random generator failed");
        ApiError::internal("failed to generate random token")
    })?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Start a login.
///
/// Stores a fresh `state` and `nonce` in the session cookie and redirects to
/// the identity provider. A user who is already logged in goes straight to
/// the dashboard.
#[utoipa::path(
    get,
    path = "/oidc/login",
    tag = "OIDC",
    responses(
        (status = 302, description = "Redirect to the identity provider"),
        (status = 301, description = "Already logged in, redirect to the dashboard"),
        (status = 500, description = "Session cookie could not be saved")
    )
)]
pub async fn login(State(state): State<AppState>, jar: CookieJar) -> Result<Response, ApiError> {
    // An unreadable cookie (expired, old keys) just starts a new session.
    let mut session = state.sessions.open(&jar).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "discarding unreadable session cookie");
        Session::default()
    });

    if let Some(Value::String(sub)) = session.get(USER_SUB_KEY) {
        tracing::debug!(sub = %sub, "already logged in");
        return Ok(redirect(
            StatusCode::MOVED_PERMANENTLY,
            None,
            state.dashboard_url(),
        ));
    }

    let oauth_state = random_token()?;
    let nonce = random_token()?;
    session.set(STATE_KEY, oauth_state.clone());
    session.set(NONCE_KEY, nonce.clone());

    let cookie = state.sessions.save(&session).map_err(|e| {
        tracing::error!(error = %e, "failed to save login state");
        ApiError::internal("failed to save session cookie")
    })?;

    let location = state.oidc.auth_code_url(&oauth_state, &nonce);
    Ok(redirect(StatusCode::FOUND, Some(jar.add(cookie)), location))
}

/// Complete a login.
///
/// Validates `state`, exchanges `code`, verifies the ID token, provisions the
/// user on first login and records the subject in the session cookie.
#[utoipa::path(
    get,
    path = "/oidc/callback",
    tag = "OIDC",
    params(CallbackParams),
    responses(
        (status = 302, description = "Logged in, redirect to the dashboard"),
        (status = 400, description = "Missing or mismatched state, missing nonce, or missing code"),
        (status = 500, description = "Session, storage or provisioning failure"),
        (status = 502, description = "Identity provider failure")
    )
)]
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let mut session = state.sessions.open(&jar).map_err(|e| {
        tracing::error!(error = %e, "failed to open session cookie on callback");
        ApiError::internal("failed to open session cookies")
    })?;

    let expected_state = session
        .get_str(STATE_KEY)
        .ok_or_else(|| ApiError::bad_request("state not found"))?;

    match params.state.as_deref() {
        Some(received) if received == expected_state => {}
        Some(_) => return Err(ApiError::bad_request("invalid state parameter")),
        None => return Err(ApiError::bad_request("missing state parameter")),
    }

    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing code parameter"))?;

    let nonce = session
        .get_str(NONCE_KEY)
        .ok_or_else(|| ApiError::bad_request("nonce not found"))?;

    let token = state.oidc.exchange(code).await.map_err(|e| {
        tracing::error!(error = %e, "code exchange failed");
        ApiError::bad_gateway("failed to exchange oauth2 code for token")
    })?;

    let raw_id_token = token.id_token.as_deref().ok_or_else(|| {
        tracing::error!("token response without id_token");
        ApiError::bad_gateway("missing id_token")
    })?;

    let claims = state
        .oidc
        .verify_id_token(raw_id_token, nonce)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "id_token verification failed");
            ApiError::bad_gateway("failed to verify id_token")
        })?;

    let identity = UserIdentity::from_claims(claims).map_err(|e| {
        tracing::error!(error = %e, "failed to parse id_token claims");
        ApiError::internal("failed to parse user claims")
    })?;
    let sub = identity.sub.clone();

    let tokens = UserTokens {
        sub: sub.clone(),
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone().unwrap_or_default(),
        token_type: token.token_type.clone().unwrap_or_default(),
        bootstrap: None,
    };
    persist_user(&state, tokens).await?;

    UserRepository::new(state.store.as_ref())
        .record(&identity)
        .map_err(|e| {
            tracing::error!(sub = %sub, error = %e, "failed to record user identity");
            ApiError::internal("failed to save user data")
        })?;

    session.set(USER_SUB_KEY, sub.clone());
    session.delete(STATE_KEY);
    session.delete(NONCE_KEY);
    let cookie = state.sessions.save(&session).map_err(|e| {
        tracing::error!(sub = %sub, error = %e, "failed to save session");
        ApiError::internal("failed to save user sub cookie")
    })?;

    tracing::info!(sub = %sub, "user logged in");
    Ok(redirect(
        StatusCode::FOUND,
        Some(jar.add(cookie)),
        state.dashboard_url(),
    ))
}

/// Store the user's tokens, provisioning the user first when no record exists.
async fn persist_user(state: &AppState, mut tokens: UserTokens) -> Result<(), ApiError> {
    let repo = TokenRepository::new(state.store.as_ref());
    let sub = tokens.sub.clone();

    match repo.get(&sub) {
        Ok(existing) => {
            tokens.bootstrap = existing.bootstrap;
            return repo.put(&tokens).map_err(|e| {
                tracing::error!(sub = %sub, error = %e, "failed to update user tokens");
                ApiError::internal("failed to save user data")
            });
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            tracing::error!(sub = %sub, error = %e, "failed to read user tokens");
            return Err(ApiError::internal("failed to query user data"));
        }
    }

    tracing::info!(sub = %sub, "first login, provisioning user");
    let credential = UserCredential::new(&sub, &tokens.access_token);
    let bootstrap = state.provisioner.provision(credential.clone()).await.map_err(|e| {
        tracing::error!(sub = %sub, step = %e.step, error = %e, "user provisioning failed");
        ApiError::internal(format!("failed to provision user: {e}"))
    })?;
    tokens.bootstrap = Some(bootstrap);

    match repo.create(&tokens) {
        Ok(()) => Ok(()),
        Err(e) if e.is_conflict() => {
            // A concurrent login provisioned this user first. Its record wins,
            // so the auth server copy is put back to match it.
            tracing::warn!(sub = %sub, "user provisioned concurrently, keeping existing bootstrap data");
            let existing = repo.get(&sub).map_err(|e| {
                tracing::error!(sub = %sub, error = %e, "failed to re-read user tokens");
                ApiError::internal("failed to query user data")
            })?;
            if let Some(winner) = &existing.bootstrap {
                state
                    .auth_server
                    .post_bootstrap_data(&credential, winner)
                    .await
                    .map_err(|e| {
                        tracing::error!(sub = %sub, error = %e, "failed to restore bootstrap data");
                        ApiError::internal("failed to save user data")
                    })?;
            }
            tokens.bootstrap = existing.bootstrap;
            repo.put(&tokens).map_err(|e| {
                tracing::error!(sub = %sub, error = %e, "failed to update user tokens");
                ApiError::internal("failed to save user data")
            })
        }
        Err(e) => {
            tracing::error!(sub = %sub, error = %e, "failed to store user tokens");
            Err(ApiError::internal("failed to save user data"))
        }
    }
}

/// Profile of the logged-in user with their bootstrap data.
#[utoipa::path(
    get,
    path = "/oidc/userinfo",
    tag = "OIDC",
    responses(
        (status = 200, description = "User-info claims plus `sub` and `bootstrap`", content_type = "application/json"),
        (status = 400, description = "Session cookie could not be opened"),
        (status = 403, description = "Not logged in"),
        (status = 500, description = "Storage or bootstrap lookup failure"),
        (status = 502, description = "Identity provider failure")
    )
)]
pub async fn userinfo(
    State(state): State<AppState>,
    LoggedInUser(sub): LoggedInUser,
) -> Result<Json<Value>, ApiError> {
    let tokens = TokenRepository::new(state.store.as_ref())
        .get(&sub)
        .map_err(|e| {
            tracing::error!(sub = %sub, error = %e, "failed to load user tokens");
            ApiError::internal("failed to fetch user tokens from store")
        })?;

    let info = state.oidc.user_info(&tokens.access_token).await.map_err(|e| {
        tracing::error!(sub = %sub, error = %e, "user info request failed");
        ApiError::bad_gateway("failed to fetch user info")
    })?;

    let mut claims = user_info_claims(info, &sub).map_err(|e| {
        tracing::error!(sub = %sub, error = %e, "unusable user info document");
        ApiError::internal("failed to extract claims from user info")
    })?;

    let credential = UserCredential::new(&sub, &tokens.access_token);
    let bootstrap = state
        .auth_server
        .get_bootstrap_data(&credential)
        .await
        .map_err(|e| {
            tracing::error!(sub = %sub, error = %e, "bootstrap data request failed");
            ApiError::internal("failed to fetch bootstrap data")
        })?;

    let bootstrap = serde_json::to_value(&bootstrap).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize bootstrap data");
        ApiError::internal("failed to fetch bootstrap data")
    })?;
    claims.insert("bootstrap".to_string(), bootstrap);

    Ok(Json(Value::Object(claims)))
}

/// Log out. Idempotent: without a logged-in user this is a no-op.
#[utoipa::path(
    get,
    path = "/oidc/logout",
    tag = "OIDC",
    responses(
        (status = 200, description = "Logged out (or was not logged in)"),
        (status = 400, description = "Session cookie could not be opened"),
        (status = 500, description = "Session cookie could not be saved")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    OpenSession { jar, mut session }: OpenSession,
) -> Result<Response, ApiError> {
    let Some(sub) = session.delete(USER_SUB_KEY) else {
        tracing::debug!("logout without a logged-in user");
        return Ok(StatusCode::OK.into_response());
    };

    let cookie = state.sessions.save(&session).map_err(|e| {
        tracing::error!(error = %e, "failed to save session on logout");
        ApiError::internal("failed to delete user sub cookie")
    })?;

    tracing::info!(sub = %sub, "user logged out");
    Ok((StatusCode::OK, jar.add(cookie)).into_response())
}
