// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{BootstrapData, HealthResponse},
    state::AppState,
};

pub mod health;
pub mod oidc;

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.ui_url);

    let oidc_routes = Router::new()
        .route("/login", get(oidc::login))
        .route("/callback", get(oidc::callback))
        .route("/userinfo", get(oidc::userinfo))
        .route("/logout", get(oidc::logout))
        .with_state(state);

    Router::new()
        .nest("/oidc", oidc_routes)
        .route("/healthcheck", get(health::healthcheck))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// CORS for the wallet UI. Credentials are allowed so the browser sends the
/// session cookie, which rules out wildcard origins.
fn cors_layer(ui_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    let origin = Url::parse(ui_url)
        .ok()
        .map(|url| url.origin().ascii_serialization())
        .and_then(|origin| HeaderValue::from_str(&origin).ok());

    match origin {
        Some(origin) => layer.allow_origin(origin),
        None => {
            tracing::warn!(ui_url, "UI URL has no usable origin, cross-origin requests disabled");
            layer
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthcheck,
        oidc::login,
        oidc::callback,
        oidc::userinfo,
        oidc::logout
    ),
    components(schemas(BootstrapData, HealthResponse)),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "OIDC", description = "Browser login, profile and logout")
    )
)]
struct ApiDoc;
