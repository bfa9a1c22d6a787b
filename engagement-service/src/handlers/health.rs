use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use service_core::error::AppError;

use crate::startup::AppState;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "engagement-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once the repository answers.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.repo.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Repository health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(json!({
        "status": "ready",
        "checks": { "repository": "up" }
    })))
}

pub async fn metrics() -> impl IntoResponse {
    crate::services::metrics::get_metrics()
}
