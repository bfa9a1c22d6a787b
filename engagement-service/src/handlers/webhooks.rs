use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use service_core::error::AppError;

use super::public_error;
use crate::services::reconciliation::EventAck;
use crate::startup::AppState;

/// Header carrying `t=<unix>,v1=<hex>`.
pub const SIGNATURE_HEADER: &str = "payments-signature";

/// Payment provider webhook. The body is taken raw because the signature
/// covers the exact bytes sent.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EventAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let ack = state
        .reconciler
        .on_payment_event(&body, signature)
        .await
        .map_err(|e| match e {
            AppError::Unauthorized(_) => e,
            other => public_error(other),
        })?;

    Ok(Json(ack))
}
