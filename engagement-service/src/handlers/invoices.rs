use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::{printable_response, public_error};
use crate::dtos::{ListInvoicesQuery, PaymentIntentResponse, UpdateInvoiceStatusRequest};
use crate::models::InvoiceView;
use crate::startup::AppState;

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<InvoiceView>>, AppError> {
    let invoices = state
        .workflow
        .list_invoices(query.client_id, query.status, query.limit)
        .await?;
    Ok(Json(invoices))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceView>, AppError> {
    Ok(Json(state.workflow.get_invoice(invoice_id).await?))
}

pub async fn update_invoice_status(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<UpdateInvoiceStatusRequest>,
) -> Result<Json<InvoiceView>, AppError> {
    req.validate()?;
    tracing::info!(
        invoice_id = %invoice_id,
        status = req.status.as_str(),
        "Updating invoice status"
    );

    let view = state
        .workflow
        .set_invoice_status(invoice_id, req.status, req.payment_method, req.payment_reference)
        .await?;
    Ok(Json(view))
}

/// Email the invoice to the client now instead of waiting for the
/// post-signature dispatch.
pub async fn send_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceView>, AppError> {
    state.workflow.dispatch_invoice(invoice_id).await?;
    Ok(Json(state.workflow.get_invoice(invoice_id).await?))
}

pub async fn printable_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let printable = state.workflow.printable_invoice(invoice_id).await?;
    Ok(printable_response(printable))
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let intent = state
        .workflow
        .create_payment_intent(invoice_id)
        .await
        .map_err(public_error)?;

    Ok(Json(PaymentIntentResponse {
        id: intent.id,
        client_secret: intent.client_secret,
    }))
}
