//! Deferred side effects persisted in the outbox table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Work the outbox worker knows how to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Email the signing link and move the agreement DRAFT -> SENT.
    SendSigningLink { document_id: Uuid },
    /// Informational "invoice created" email. Does not touch the invoice.
    SendInvoiceNotice { invoice_id: Uuid },
    /// Email the printable invoice to the client after signature.
    DispatchInvoice { invoice_id: Uuid },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::SendSigningLink { .. } => "send_signing_link",
            JobKind::SendInvoiceNotice { .. } => "send_invoice_notice",
            JobKind::DispatchInvoice { .. } => "dispatch_invoice",
        }
    }

    /// Scheduling the same effect twice for the same entity is a no-op.
    pub fn idempotency_key(&self) -> String {
        match self {
            JobKind::SendSigningLink { document_id } => format!("signing-link:{}", document_id),
            JobKind::SendInvoiceNotice { invoice_id } => format!("invoice-notice:{}", invoice_id),
            JobKind::DispatchInvoice { invoice_id } => format!("invoice-dispatch:{}", invoice_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        JobStatus::from_string(&s)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduledJob {
    pub job_id: Uuid,
    pub idempotency_key: String,
    pub payload: Json<JobKind>,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub completed_utc: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn kind(&self) -> &JobKind {
        &self.payload.0
    }
}

/// Input for scheduling a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub run_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(kind: JobKind, run_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind,
            run_at,
        }
    }

    pub fn idempotency_key(&self) -> String {
        self.kind.idempotency_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_json() {
        let id = Uuid::nil();
        let json = serde_json::to_value(JobKind::DispatchInvoice { invoice_id: id }).unwrap();
        assert_eq!(json["type"], "dispatch_invoice");
        assert_eq!(json["invoice_id"], id.to_string());
    }

    #[test]
    fn idempotency_keys_differ_per_effect() {
        let id = Uuid::new_v4();
        let notice = JobKind::SendInvoiceNotice { invoice_id: id }.idempotency_key();
        let dispatch = JobKind::DispatchInvoice { invoice_id: id }.idempotency_key();
        assert_ne!(notice, dispatch);
    }
}
