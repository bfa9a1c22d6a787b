use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::{printable_response, public_error};
use crate::dtos::{
    CreateLegalDocumentRequest, LegalDocumentResponse, SignDocumentRequest, SignDocumentResponse,
};
use crate::models::{PublicLegalDocument, Timeline};
use crate::services::workflow::StandaloneAgreement;
use crate::startup::AppState;

/// Draw up an agreement for a client outside the quote flow.
pub async fn create_legal_document(
    State(state): State<AppState>,
    Json(req): Json<CreateLegalDocumentRequest>,
) -> Result<(StatusCode, Json<LegalDocumentResponse>), AppError> {
    req.validate()?;

    let doc = state
        .workflow
        .create_legal_document(&StandaloneAgreement {
            client_id: req.client_id,
            scope: req.scope,
            price_minor_units: req.price_minor_units,
            timeline: req.timeline.unwrap_or(Timeline::Unspecified),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(doc.into())))
}

pub async fn send_legal_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<LegalDocumentResponse>, AppError> {
    let doc = state.workflow.send_legal_document(document_id).await?;
    Ok(Json(doc.into()))
}

pub async fn printable_agreement(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let printable = state.workflow.printable_agreement(document_id).await?;
    Ok(printable_response(printable))
}

/// What the signing page shows. Only SENT and ACKNOWLEDGED documents are
/// visible.
pub async fn public_legal_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<PublicLegalDocument>, AppError> {
    let doc = state
        .workflow
        .public_legal_document(document_id)
        .await
        .map_err(public_error)?;
    Ok(Json(doc))
}

pub async fn sign_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Json(req): Json<SignDocumentRequest>,
) -> Result<Json<SignDocumentResponse>, AppError> {
    req.validate()
        .map_err(AppError::from)
        .map_err(public_error)?;

    let doc = state
        .workflow
        .sign_document(document_id, &req.signature)
        .await
        .map_err(public_error)?;

    Ok(Json(SignDocumentResponse {
        signed: true,
        document_number: doc.document_number,
    }))
}
