// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::Json;

use crate::models::HealthResponse;

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "success".to_string(),
        current_time: chrono::Utc::now().to_rfc3339(),
    })
}
