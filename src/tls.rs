// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTPS material for the optional TLS listener.

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsSettings;

#[derive(Debug, thiserror::Error)]
#[error("failed to load TLS certificate {cert} / key {key}: {source}")]
pub struct TlsError {
    cert: String,
    key: String,
    #[source]
    source: std::io::Error,
}

/// Install ring as the process-wide rustls provider. Must run before any TLS
/// config is built; a second call is a no-op.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Load the PEM certificate chain and private key.
pub async fn load_rustls_config(settings: &TlsSettings) -> Result<RustlsConfig, TlsError> {
    let TlsSettings {
        cert_file,
        key_file,
    } = settings;

    RustlsConfig::from_pem_file(cert_file.clone(), key_file.clone())
        .await
        .map_err(|source| TlsError {
            cert: cert_file.display().to_string(),
            key: key_file.display().to_string(),
            source,
        })
}
