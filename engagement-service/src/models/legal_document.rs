//! Service agreement model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Legal document status. Transitions only move forward:
/// DRAFT -> SENT -> ACKNOWLEDGED. EXPIRED and VOIDED are terminal and are
/// never assigned by the workflow itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Sent,
    Acknowledged,
    Expired,
    Voided,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Sent => "SENT",
            DocumentStatus::Acknowledged => "ACKNOWLEDGED",
            DocumentStatus::Expired => "EXPIRED",
            DocumentStatus::Voided => "VOIDED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "SENT" => DocumentStatus::Sent,
            "ACKNOWLEDGED" => DocumentStatus::Acknowledged,
            "EXPIRED" => DocumentStatus::Expired,
            "VOIDED" => DocumentStatus::Voided,
            _ => DocumentStatus::Draft,
        }
    }
}

impl From<String> for DocumentStatus {
    fn from(s: String) -> Self {
        DocumentStatus::from_string(&s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LegalDocument {
    pub id: Uuid,
    pub document_number: String,
    pub title: String,
    /// Rendered agreement text. Written once at creation.
    pub content: String,
    #[sqlx(try_from = "String")]
    pub status: DocumentStatus,
    pub client_id: Uuid,
    pub inquiry_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub client_signature: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl LegalDocument {
    pub fn is_signed(&self) -> bool {
        self.client_signature.is_some()
    }
}

/// Input for creating a legal document. The id is chosen by the caller so
/// that follow-up jobs can reference it inside the same transaction.
#[derive(Debug, Clone)]
pub struct NewLegalDocument {
    pub id: Uuid,
    pub document_number: String,
    pub title: String,
    pub content: String,
    pub client_id: Uuid,
    pub inquiry_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl NewLegalDocument {
    pub fn into_document(self) -> LegalDocument {
        LegalDocument {
            id: self.id,
            document_number: self.document_number,
            title: self.title,
            content: self.content,
            status: DocumentStatus::Draft,
            client_id: self.client_id,
            inquiry_id: self.inquiry_id,
            client_signature: None,
            sent_at: None,
            acknowledged_at: None,
            created_utc: self.created_utc,
            updated_utc: self.created_utc,
        }
    }
}

/// What the public signing page is allowed to see.
#[derive(Debug, Clone, Serialize)]
pub struct PublicLegalDocument {
    pub title: String,
    pub document_number: String,
    pub content: String,
    pub status: DocumentStatus,
    pub signable: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl From<&LegalDocument> for PublicLegalDocument {
    fn from(doc: &LegalDocument) -> Self {
        Self {
            title: doc.title.clone(),
            document_number: doc.document_number.clone(),
            content: doc.content.clone(),
            status: doc.status,
            signable: doc.status == DocumentStatus::Sent,
            acknowledged_at: doc.acknowledged_at,
        }
    }
}
