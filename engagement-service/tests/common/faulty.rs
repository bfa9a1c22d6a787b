//! Repository wrapper that injects number collisions and bookkeeping
//! failures on demand, delegating everything else to the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use engagement_service::models::{
    Client, Inquiry, Invoice, InvoiceStatusUpdate, LegalDocument, ListInvoicesFilter, NewJob,
    NewLegalDocument, PaymentApplication, PaymentOutcome, ProcessedPaymentEvent, ScheduledJob,
};
use engagement_service::services::numbering::NumberKind;
use engagement_service::services::repository::{
    AcceptanceOutcome, NumberedInsert, QuoteAcceptance, SignatureCapture,
};
use engagement_service::services::{InMemoryRepository, Repository};
use service_core::error::AppError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Decrements `counter` if it is above zero. True when a fault should fire.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct FaultyRepository {
    pub inner: Arc<InMemoryRepository>,
    acceptance_collisions: AtomicUsize,
    agreement_collisions: AtomicUsize,
    completion_failures: AtomicUsize,
    pub acceptance_attempts: AtomicUsize,
    pub agreement_attempts: AtomicUsize,
}

impl FaultyRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            acceptance_collisions: AtomicUsize::new(0),
            agreement_collisions: AtomicUsize::new(0),
            completion_failures: AtomicUsize::new(0),
            acceptance_attempts: AtomicUsize::new(0),
            agreement_attempts: AtomicUsize::new(0),
        }
    }

    /// The next `n` acceptance commits report the agreement number as taken.
    pub fn collide_acceptances(&self, n: usize) {
        self.acceptance_collisions.store(n, Ordering::SeqCst);
    }

    /// The next `n` standalone agreement inserts report the number as taken.
    pub fn collide_agreements(&self, n: usize) {
        self.agreement_collisions.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls to `complete_job` fail.
    pub fn fail_completions(&self, n: usize) {
        self.completion_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for FaultyRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }

    async fn get_inquiry(&self, inquiry_id: Uuid) -> Result<Option<Inquiry>, AppError> {
        self.inner.get_inquiry(inquiry_id).await
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        self.inner.get_client(client_id).await
    }

    async fn latest_number(
        &self,
        kind: NumberKind,
        prefix: &str,
    ) -> Result<Option<String>, AppError> {
        self.inner.latest_number(kind, prefix).await
    }

    async fn commit_acceptance(
        &self,
        acceptance: &QuoteAcceptance,
    ) -> Result<AcceptanceOutcome, AppError> {
        self.acceptance_attempts.fetch_add(1, Ordering::SeqCst);
        if take(&self.acceptance_collisions) {
            return Ok(AcceptanceOutcome::NumberTaken(NumberKind::Agreement));
        }
        self.inner.commit_acceptance(acceptance).await
    }

    async fn insert_legal_document(
        &self,
        document: &NewLegalDocument,
    ) -> Result<NumberedInsert<LegalDocument>, AppError> {
        self.agreement_attempts.fetch_add(1, Ordering::SeqCst);
        if take(&self.agreement_collisions) {
            return Ok(NumberedInsert::NumberTaken);
        }
        self.inner.insert_legal_document(document).await
    }

    async fn get_legal_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<LegalDocument>, AppError> {
        self.inner.get_legal_document(document_id).await
    }

    async fn mark_document_sent(
        &self,
        document_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<Option<LegalDocument>, AppError> {
        self.inner.mark_document_sent(document_id, sent_utc).await
    }

    async fn acknowledge_document(
        &self,
        capture: &SignatureCapture,
    ) -> Result<Option<LegalDocument>, AppError> {
        self.inner.acknowledge_document(capture).await
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.inner.get_invoice(invoice_id).await
    }

    async fn latest_unpaid_invoice_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        self.inner.latest_unpaid_invoice_for_client(client_id).await
    }

    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<Vec<Invoice>, AppError> {
        self.inner.list_invoices(filter).await
    }

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        update: &InvoiceStatusUpdate,
    ) -> Result<Option<Invoice>, AppError> {
        self.inner.update_invoice_status(invoice_id, update).await
    }

    async fn mark_invoice_sent(
        &self,
        invoice_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner.mark_invoice_sent(invoice_id, sent_utc).await
    }

    async fn apply_payment(
        &self,
        payment: &PaymentApplication,
    ) -> Result<PaymentOutcome, AppError> {
        self.inner.apply_payment(payment).await
    }

    async fn record_payment_event(&self, event: &ProcessedPaymentEvent) -> Result<bool, AppError> {
        self.inner.record_payment_event(event).await
    }

    async fn enqueue_job(&self, job: &NewJob) -> Result<bool, AppError> {
        self.inner.enqueue_job(job).await
    }

    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<ScheduledJob>, AppError> {
        self.inner
            .claim_due_jobs(now, lease, limit, max_attempts)
            .await
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        completed_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if take(&self.completion_failures) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "connection reset while completing job"
            )));
        }
        self.inner.complete_job(job_id, completed_utc).await
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        failed_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner.fail_job(job_id, error, failed_utc).await
    }
}
