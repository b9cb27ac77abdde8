// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{OidcClient, SessionStore};
use crate::auth_server::AuthServer;
use crate::config::AppConfig;
use crate::onboarding::Provisioner;
use crate::storage::KeyValueStore;

/// Collaborators shared by every request. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<dyn SessionStore>,
    pub oidc: Arc<dyn OidcClient>,
    pub store: Arc<dyn KeyValueStore>,
    pub provisioner: Arc<Provisioner>,
    pub auth_server: Arc<dyn AuthServer>,
}

impl AppState {
    /// Post-login landing page.
    pub fn dashboard_url(&self) -> String {
        self.config.dashboard_url()
    }
}
