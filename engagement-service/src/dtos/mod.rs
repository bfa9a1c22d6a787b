//! Request and response bodies for the HTTP surface.

use crate::models::{InvoiceStatus, LegalDocument, Timeline};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct AcceptQuoteQuery {
    pub id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptQuoteResponse {
    pub accepted: bool,
    pub message: &'static str,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignDocumentRequest {
    /// Signature image as a data URL.
    #[validate(length(min = 1, max = 2_000_000))]
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct SignDocumentResponse {
    pub signed: bool,
    pub document_number: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLegalDocumentRequest {
    pub client_id: Uuid,
    #[validate(length(min = 1, max = 5000))]
    pub scope: String,
    #[validate(range(min = 0))]
    pub price_minor_units: Option<i64>,
    #[serde(default)]
    pub timeline: Option<Timeline>,
}

/// Admin view of an agreement. The signature image is never echoed back.
#[derive(Debug, Serialize)]
pub struct LegalDocumentResponse {
    pub id: Uuid,
    pub document_number: String,
    pub title: String,
    pub status: crate::models::DocumentStatus,
    pub client_id: Uuid,
    pub inquiry_id: Option<Uuid>,
    pub signed: bool,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub acknowledged_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_utc: chrono::DateTime<chrono::Utc>,
}

impl From<LegalDocument> for LegalDocumentResponse {
    fn from(doc: LegalDocument) -> Self {
        Self {
            signed: doc.is_signed(),
            id: doc.id,
            document_number: doc.document_number,
            title: doc.title,
            status: doc.status,
            client_id: doc.client_id,
            inquiry_id: doc.inquiry_id,
            sent_at: doc.sent_at,
            acknowledged_at: doc.acknowledged_at,
            created_utc: doc.created_utc,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceStatusRequest {
    pub status: InvoiceStatus,
    #[validate(length(max = 64))]
    pub payment_method: Option<String>,
    #[validate(length(max = 255))]
    pub payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub id: String,
    pub client_secret: String,
}
