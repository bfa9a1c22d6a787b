use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use super::public_error;
use crate::dtos::{AcceptQuoteQuery, AcceptQuoteResponse};
use crate::services::workflow::QuoteSent;
use crate::startup::AppState;

/// Email the quote and its acceptance link to the client.
pub async fn send_quote(
    State(state): State<AppState>,
    Path(inquiry_id): Path<Uuid>,
) -> Result<Json<QuoteSent>, AppError> {
    tracing::info!(inquiry_id = %inquiry_id, "Sending quote");
    let sent = state.workflow.send_quote(inquiry_id).await?;
    Ok(Json(sent))
}

/// Public acceptance link. Responds the same way for every accepted quote.
pub async fn accept_quote(
    State(state): State<AppState>,
    Query(query): Query<AcceptQuoteQuery>,
) -> Result<Json<AcceptQuoteResponse>, AppError> {
    state
        .workflow
        .accept_quote(query.id, &query.token)
        .await
        .map_err(public_error)?;

    Ok(Json(AcceptQuoteResponse {
        accepted: true,
        message: "Thank you. Your quote has been accepted and your agreement is on its way.",
    }))
}
