// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet Server - OIDC login and first-login provisioning
//!
//! Logs browser users in through an OpenID provider, keeps the session in a
//! sealed cookie and, the first time a subject is seen, provisions the user's
//! key stores, encrypted data vaults and delegated capabilities.
//!
//! ## Modules
//!
//! - `api` - HTTP handlers and router (Axum)
//! - `auth` - Cookie sessions and the OIDC client
//! - `onboarding` - First-login provisioning
//! - `kms`, `edv`, `auth_server` - Backend service clients
//! - `zcap` - Capability delegation
//! - `storage` - User and token records (redb or in-memory)

pub mod api;
pub mod auth;
pub mod auth_server;
pub mod config;
pub mod credential;
pub mod edv;
pub mod error;
pub mod kms;
pub mod models;
pub mod onboarding;
pub mod state;
pub mod storage;
pub mod tls;
pub mod zcap;

#[cfg(test)]
pub(crate) mod testing;
