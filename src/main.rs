// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wallet_server::{
    api::router,
    auth::{CookieSessionStore, HttpOidcClient},
    auth_server::HttpAuthServer,
    config::{AppConfig, LogFormat},
    edv::HttpVaultClient,
    kms::HttpKeyManager,
    onboarding::Provisioner,
    state::AppState,
    storage::open_store,
    tls,
};

/// Applies to every outbound call (IdP, KMS, EDV, auth server).
const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long in-flight requests may finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return Err(e.into());
        }
    };
    init_tracing(config.log_format);
    tls::install_crypto_provider();

    let config = Arc::new(config);
    tracing::info!(
        ui_url = %config.ui_url,
        provider = %config.oidc.provider_url,
        database = ?config.database,
        "starting wallet server"
    );

    let client = reqwest::Client::builder()
        .timeout(HTTP_CLIENT_TIMEOUT)
        .build()?;

    let oidc = HttpOidcClient::discover(
        config.oidc.clone(),
        client.clone(),
        config.dependency_max_retries,
    )
    .await?;

    let store = open_store(&config)?;
    let auth_server = Arc::new(HttpAuthServer::new(
        config.backends.hub_auth_url.clone(),
        client.clone(),
    ));
    let provisioner = Provisioner::new(
        config.backends.clone(),
        Arc::new(HttpKeyManager::new(client.clone())),
        Arc::new(HttpVaultClient::new(
            config.backends.key_edv_url.clone(),
            client.clone(),
        )),
        Arc::new(HttpVaultClient::new(
            config.backends.user_edv_url.clone(),
            client.clone(),
        )),
        auth_server.clone(),
    );

    let state = AppState {
        config: config.clone(),
        sessions: Arc::new(CookieSessionStore::new(&config.cookie)),
        oidc: Arc::new(oidc),
        store,
        provisioner: Arc::new(provisioner),
        auth_server,
    };
    let app = router(state);

    let addr: SocketAddr = config.bind_address().parse()?;

    match &config.tls {
        Some(settings) => {
            let tls_config = tls::load_rustls_config(settings).await?;
            let handle: axum_server::Handle<SocketAddr> = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                }
            });

            tracing::info!(%addr, "listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "listening on http (docs at /docs)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    tracing::info!("server stopped");
    Ok(())
}
