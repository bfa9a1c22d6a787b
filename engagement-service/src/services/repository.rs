//! Persistence seam for the workflow.
//!
//! Every multi-entity change the workflow needs is a single trait method so
//! that each implementation can make it atomic: a Postgres transaction in
//! [`crate::services::database::Database`], a single lock scope in
//! [`InMemoryRepository`].

use crate::models::{
    Client, DocumentStatus, Inquiry, InquiryStatus, Invoice, InvoiceStatus, InvoiceStatusUpdate,
    JobStatus, LegalDocument, ListInvoicesFilter, NewJob, NewLegalDocument, NewInvoice,
    PaymentApplication, PaymentOutcome, ProcessedPaymentEvent, ScheduledJob,
};
use crate::services::numbering::{sequence_of, NumberKind};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use sqlx::types::Json;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Everything accept-quote writes, committed together or not at all.
#[derive(Debug, Clone)]
pub struct QuoteAcceptance {
    pub inquiry_id: Uuid,
    pub accepted_utc: DateTime<Utc>,
    pub document: NewLegalDocument,
    pub invoice: NewInvoice,
    pub jobs: Vec<NewJob>,
}

#[derive(Debug, Clone)]
pub enum AcceptanceOutcome {
    Committed {
        document: LegalDocument,
        invoice: Invoice,
    },
    /// The inquiry was not QUOTED when the write happened.
    InquiryNotQuoted(InquiryStatus),
    /// Another writer claimed the number first; nothing was written.
    NumberTaken(NumberKind),
}

#[derive(Debug, Clone)]
pub enum NumberedInsert<T> {
    Inserted(T),
    NumberTaken,
}

/// Signature submitted for a SENT document, plus the job it triggers.
#[derive(Debug, Clone)]
pub struct SignatureCapture {
    pub document_id: Uuid,
    pub signature: String,
    pub acknowledged_utc: DateTime<Utc>,
    pub follow_up: Option<NewJob>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    async fn get_inquiry(&self, inquiry_id: Uuid) -> Result<Option<Inquiry>, AppError>;

    /// Client with its email list already normalised.
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError>;

    /// Highest issued number carrying `prefix`, compared numerically.
    async fn latest_number(
        &self,
        kind: NumberKind,
        prefix: &str,
    ) -> Result<Option<String>, AppError>;

    /// QUOTED -> ACCEPTED, the DRAFT agreement, the UNPAID invoice and the
    /// deferred jobs, in one atomic write.
    async fn commit_acceptance(
        &self,
        acceptance: &QuoteAcceptance,
    ) -> Result<AcceptanceOutcome, AppError>;

    async fn insert_legal_document(
        &self,
        document: &NewLegalDocument,
    ) -> Result<NumberedInsert<LegalDocument>, AppError>;

    async fn get_legal_document(&self, document_id: Uuid)
        -> Result<Option<LegalDocument>, AppError>;

    /// DRAFT -> SENT. `None` when the document was not in DRAFT.
    async fn mark_document_sent(
        &self,
        document_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<Option<LegalDocument>, AppError>;

    /// SENT -> ACKNOWLEDGED with the signature, enqueuing the follow-up job
    /// in the same write. `None` when the document was not SENT.
    async fn acknowledge_document(
        &self,
        capture: &SignatureCapture,
    ) -> Result<Option<LegalDocument>, AppError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    async fn latest_unpaid_invoice_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    /// Newest first, with items.
    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<Vec<Invoice>, AppError>;

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        update: &InvoiceStatusUpdate,
    ) -> Result<Option<Invoice>, AppError>;

    async fn mark_invoice_sent(
        &self,
        invoice_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Records the event id and applies the amount atomically. A repeated
    /// event id changes nothing.
    async fn apply_payment(&self, payment: &PaymentApplication)
        -> Result<PaymentOutcome, AppError>;

    /// Records an event that does not move money. `false` if already seen.
    async fn record_payment_event(&self, event: &ProcessedPaymentEvent) -> Result<bool, AppError>;

    /// `false` if a job with the same idempotency key already exists.
    async fn enqueue_job(&self, job: &NewJob) -> Result<bool, AppError>;

    /// Claims due jobs and jobs whose lease has expired. Jobs that have used
    /// up `max_attempts` claims are failed instead of being handed out again.
    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<ScheduledJob>, AppError>;

    async fn complete_job(&self, job_id: Uuid, completed_utc: DateTime<Utc>)
        -> Result<(), AppError>;

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        failed_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

// -----------------------------------------------------------------------------
// In-memory implementation
// -----------------------------------------------------------------------------

#[derive(Default)]
struct State {
    inquiries: HashMap<Uuid, Inquiry>,
    clients: HashMap<Uuid, Client>,
    documents: HashMap<Uuid, LegalDocument>,
    invoices: HashMap<Uuid, Invoice>,
    payment_events: HashMap<String, ProcessedPaymentEvent>,
    jobs: Vec<ScheduledJob>,
}

impl State {
    fn number_taken(&self, kind: NumberKind, number: &str) -> bool {
        match kind {
            NumberKind::Agreement => self.documents.values().any(|d| d.document_number == number),
            NumberKind::Invoice => self.invoices.values().any(|i| i.invoice_number == number),
        }
    }

    fn push_job(&mut self, job: &NewJob, now: DateTime<Utc>) -> bool {
        let key = job.idempotency_key();
        if self.jobs.iter().any(|j| j.idempotency_key == key) {
            return false;
        }
        self.jobs.push(ScheduledJob {
            job_id: job.job_id,
            idempotency_key: key,
            payload: Json(job.kind.clone()),
            status: JobStatus::Pending,
            run_at: job.run_at,
            attempts: 0,
            locked_until: None,
            last_error: None,
            created_utc: now,
            completed_utc: None,
        });
        true
    }

    fn job_mut(&mut self, job_id: Uuid) -> Result<&mut ScheduledJob, AppError> {
        self.jobs
            .iter_mut()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Job {} not found", job_id)))
    }
}

/// Process-local repository. Backs the test suite and local runs without a
/// database; it does not survive a restart.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_inquiry(&self, inquiry: Inquiry) {
        self.state.lock().await.inquiries.insert(inquiry.id, inquiry);
    }

    pub async fn insert_client(&self, mut client: Client) {
        client.emails = crate::models::normalize_emails(None, &client.emails);
        self.state.lock().await.clients.insert(client.id, client);
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.state.lock().await.invoices.insert(invoice.id, invoice);
    }

    pub async fn documents(&self) -> Vec<LegalDocument> {
        self.state.lock().await.documents.values().cloned().collect()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.state.lock().await.invoices.values().cloned().collect()
    }

    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn payment_events(&self) -> Vec<ProcessedPaymentEvent> {
        self.state
            .lock()
            .await
            .payment_events
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_inquiry(&self, inquiry_id: Uuid) -> Result<Option<Inquiry>, AppError> {
        Ok(self.state.lock().await.inquiries.get(&inquiry_id).cloned())
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        Ok(self.state.lock().await.clients.get(&client_id).cloned())
    }

    async fn latest_number(
        &self,
        kind: NumberKind,
        prefix: &str,
    ) -> Result<Option<String>, AppError> {
        let state = self.state.lock().await;
        let numbers: Vec<&str> = match kind {
            NumberKind::Agreement => state
                .documents
                .values()
                .map(|d| d.document_number.as_str())
                .collect(),
            NumberKind::Invoice => state
                .invoices
                .values()
                .map(|i| i.invoice_number.as_str())
                .collect(),
        };
        Ok(numbers
            .into_iter()
            .filter_map(|n| sequence_of(n, prefix).map(|seq| (seq, n)))
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, n)| n.to_string()))
    }

    async fn commit_acceptance(
        &self,
        acceptance: &QuoteAcceptance,
    ) -> Result<AcceptanceOutcome, AppError> {
        let mut state = self.state.lock().await;

        let status = state
            .inquiries
            .get(&acceptance.inquiry_id)
            .map(|i| i.status)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Inquiry {} not found",
                    acceptance.inquiry_id
                ))
            })?;
        if status != InquiryStatus::Quoted {
            return Ok(AcceptanceOutcome::InquiryNotQuoted(status));
        }
        if state.number_taken(NumberKind::Agreement, &acceptance.document.document_number) {
            return Ok(AcceptanceOutcome::NumberTaken(NumberKind::Agreement));
        }
        if state.number_taken(NumberKind::Invoice, &acceptance.invoice.invoice_number) {
            return Ok(AcceptanceOutcome::NumberTaken(NumberKind::Invoice));
        }

        if let Some(inquiry) = state.inquiries.get_mut(&acceptance.inquiry_id) {
            inquiry.status = InquiryStatus::Accepted;
            inquiry.updated_utc = acceptance.accepted_utc;
        }

        let document = acceptance.document.clone().into_document();
        let invoice = acceptance.invoice.clone().into_invoice();
        state.documents.insert(document.id, document.clone());
        state.invoices.insert(invoice.id, invoice.clone());
        for job in &acceptance.jobs {
            state.push_job(job, acceptance.accepted_utc);
        }

        Ok(AcceptanceOutcome::Committed { document, invoice })
    }

    async fn insert_legal_document(
        &self,
        document: &NewLegalDocument,
    ) -> Result<NumberedInsert<LegalDocument>, AppError> {
        let mut state = self.state.lock().await;
        if state.number_taken(NumberKind::Agreement, &document.document_number) {
            return Ok(NumberedInsert::NumberTaken);
        }
        let document = document.clone().into_document();
        state.documents.insert(document.id, document.clone());
        Ok(NumberedInsert::Inserted(document))
    }

    async fn get_legal_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<LegalDocument>, AppError> {
        Ok(self.state.lock().await.documents.get(&document_id).cloned())
    }

    async fn mark_document_sent(
        &self,
        document_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<Option<LegalDocument>, AppError> {
        let mut state = self.state.lock().await;
        match state.documents.get_mut(&document_id) {
            Some(doc) if doc.status == DocumentStatus::Draft => {
                doc.status = DocumentStatus::Sent;
                doc.sent_at = Some(sent_utc);
                doc.updated_utc = sent_utc;
                Ok(Some(doc.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn acknowledge_document(
        &self,
        capture: &SignatureCapture,
    ) -> Result<Option<LegalDocument>, AppError> {
        let mut state = self.state.lock().await;
        let updated = match state.documents.get_mut(&capture.document_id) {
            Some(doc) if doc.status == DocumentStatus::Sent => {
                doc.status = DocumentStatus::Acknowledged;
                doc.client_signature = Some(capture.signature.clone());
                doc.acknowledged_at = Some(capture.acknowledged_utc);
                doc.updated_utc = capture.acknowledged_utc;
                doc.clone()
            }
            _ => return Ok(None),
        };
        if let Some(job) = &capture.follow_up {
            state.push_job(job, capture.acknowledged_utc);
        }
        Ok(Some(updated))
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.state.lock().await.invoices.get(&invoice_id).cloned())
    }

    async fn latest_unpaid_invoice_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .filter(|i| i.client_id == client_id && i.status == InvoiceStatus::Unpaid)
            .max_by_key(|i| i.created_utc)
            .cloned())
    }

    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| filter.client_id.map_or(true, |c| i.client_id == c))
            .filter(|i| {
                filter
                    .status
                    .map_or(true, |s| i.effective_status(filter.as_of) == s)
            })
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        invoices.truncate(filter.limit.max(0) as usize);
        Ok(invoices)
    }

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        update: &InvoiceStatusUpdate,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoices.get_mut(&invoice_id) else {
            return Ok(None);
        };
        invoice.status = update.status;
        invoice.updated_utc = update.updated_utc;
        if update.status == InvoiceStatus::Paid {
            invoice.amount_paid_minor_units = invoice.total_minor_units;
            invoice.paid_date = update.paid_date;
            if update.payment_method.is_some() {
                invoice.payment_method = update.payment_method.clone();
            }
            if update.payment_reference.is_some() {
                invoice.payment_reference = update.payment_reference.clone();
            }
        }
        Ok(Some(invoice.clone()))
    }

    async fn mark_invoice_sent(
        &self,
        invoice_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;
        invoice.sent_at = Some(sent_utc);
        invoice.updated_utc = sent_utc;
        Ok(())
    }

    async fn apply_payment(
        &self,
        payment: &PaymentApplication,
    ) -> Result<PaymentOutcome, AppError> {
        let mut state = self.state.lock().await;
        if state.payment_events.contains_key(&payment.event_id) {
            return Ok(PaymentOutcome::Duplicate);
        }

        let outcome = match state.invoices.get_mut(&payment.invoice_id) {
            None => PaymentOutcome::InvoiceNotFound,
            Some(invoice)
                if matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled) =>
            {
                PaymentOutcome::NotPayable(invoice.clone())
            }
            Some(invoice) => {
                invoice.apply_payment(
                    payment.amount_minor_units,
                    &payment.provider_payment_id,
                    &payment.payment_method,
                    payment.received_utc,
                );
                PaymentOutcome::Applied(invoice.clone())
            }
        };

        state.payment_events.insert(
            payment.event_id.clone(),
            ProcessedPaymentEvent {
                event_id: payment.event_id.clone(),
                event_type: payment.event_type.clone(),
                invoice_id: Some(payment.invoice_id),
                amount_minor_units: payment.amount_minor_units,
                outcome: outcome.label().to_string(),
                received_utc: payment.received_utc,
            },
        );
        Ok(outcome)
    }

    async fn record_payment_event(&self, event: &ProcessedPaymentEvent) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.payment_events.contains_key(&event.event_id) {
            return Ok(false);
        }
        state
            .payment_events
            .insert(event.event_id.clone(), event.clone());
        Ok(true)
    }

    async fn enqueue_job(&self, job: &NewJob) -> Result<bool, AppError> {
        Ok(self.state.lock().await.push_job(job, Utc::now()))
    }

    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<ScheduledJob>, AppError> {
        let mut state = self.state.lock().await;

        for job in state.jobs.iter_mut() {
            let lease_expired = job.status == JobStatus::Processing
                && job.locked_until.map_or(true, |until| until < now);
            if lease_expired && job.attempts >= max_attempts {
                job.status = JobStatus::Failed;
                job.last_error = Some("lease expired after maximum attempts".to_string());
                job.completed_utc = Some(now);
            }
        }

        let mut due: Vec<usize> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| match j.status {
                JobStatus::Pending => j.run_at <= now,
                JobStatus::Processing => j.locked_until.map_or(true, |until| until < now),
                _ => false,
            })
            .map(|(idx, _)| idx)
            .collect();
        due.sort_by_key(|idx| state.jobs[*idx].run_at);
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for idx in due {
            let job = &mut state.jobs[idx];
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.locked_until = Some(now + lease);
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        completed_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.status = JobStatus::Completed;
        job.locked_until = None;
        job.completed_utc = Some(completed_utc);
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        failed_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.status = JobStatus::Failed;
        job.locked_until = None;
        job.last_error = Some(error.to_string());
        job.completed_utc = Some(failed_utc);
        Ok(())
    }
}
