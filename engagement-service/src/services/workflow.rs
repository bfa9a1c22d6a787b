//! Quote-to-cash workflow.
//!
//! Inquiry, agreement and invoice state all move through here. State changes
//! are committed first; emails that follow a committed change are either
//! sent best-effort or handed to the outbox, and their failure never undoes
//! the change.

use crate::config::{BusinessProfile, EngagementConfig, WorkflowConfig};
use crate::models::money::format_amount;
use crate::models::{
    Client, DocumentStatus, Inquiry, InquiryStatus, Invoice, InvoiceStatus, InvoiceStatusUpdate,
    InvoiceView, JobKind, LegalDocument, ListInvoicesFilter, NewInvoice, NewJob,
    NewLegalDocument, PublicLegalDocument, ScheduledJob, Timeline,
};
use crate::services::documents::{
    invoice_line_items, printable, render_agreement, AgreementTerms, PrintRenderer,
    PrintableAgreement, PrintableInvoice, AGREEMENT_TITLE,
};
use crate::services::email::{Attachment, EmailTemplate, NotificationDispatcher};
use crate::services::metrics::{record_transition, NUMBERING_RETRIES_TOTAL};
use crate::services::numbering::{DocumentNumbering, NumberKind};
use crate::services::payments::{PaymentIntent, PaymentsClient};
use crate::services::repository::{
    AcceptanceOutcome, NumberedInsert, QuoteAcceptance, Repository, SignatureCapture,
};
use crate::services::tokens::TokenVerifier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Attempts at claiming a document number before giving up.
const NUMBERING_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct QuoteSent {
    pub inquiry_id: Uuid,
    pub recipient: String,
    pub accept_url: String,
}

#[derive(Debug, Clone)]
pub struct QuoteAccepted {
    pub document: LegalDocument,
    pub invoice: Invoice,
}

/// Admin request for an agreement not tied to an inquiry.
#[derive(Debug, Clone)]
pub struct StandaloneAgreement {
    pub client_id: Uuid,
    pub scope: String,
    pub price_minor_units: Option<i64>,
    pub timeline: Timeline,
}

/// Rendered printable document.
#[derive(Debug, Clone)]
pub struct Printable {
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .map(|d| now + d)
        .unwrap_or(now)
}

fn not_found(what: &str, id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", what, id))
}

#[derive(Clone)]
pub struct WorkflowOrchestrator {
    repo: Arc<dyn Repository>,
    numbering: DocumentNumbering,
    tokens: TokenVerifier,
    dispatcher: NotificationDispatcher,
    renderer: Arc<dyn PrintRenderer>,
    payments: PaymentsClient,
    business: BusinessProfile,
    settings: WorkflowConfig,
    public_base_url: String,
}

impl WorkflowOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        dispatcher: NotificationDispatcher,
        renderer: Arc<dyn PrintRenderer>,
        payments: PaymentsClient,
        config: &EngagementConfig,
    ) -> Self {
        Self {
            numbering: DocumentNumbering::new(repo.clone()),
            tokens: TokenVerifier::new(config.security.accept_token_secret.clone()),
            repo,
            dispatcher,
            renderer,
            payments,
            business: config.business.clone(),
            settings: config.workflow.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn tokens(&self) -> &TokenVerifier {
        &self.tokens
    }

    pub fn accept_url(&self, inquiry_id: Uuid) -> Result<String, AppError> {
        Ok(format!(
            "{}/accept-quote?id={}&token={}",
            self.public_base_url,
            inquiry_id,
            self.tokens.token_for(inquiry_id)?
        ))
    }

    fn signing_url(&self, document_id: Uuid) -> String {
        format!("{}/legal-documents/{}", self.public_base_url, document_id)
    }

    fn payment_url(&self, invoice_id: Uuid) -> String {
        format!("{}/invoices/{}/pay", self.public_base_url, invoice_id)
    }

    async fn load_inquiry(&self, inquiry_id: Uuid) -> Result<Inquiry, AppError> {
        self.repo
            .get_inquiry(inquiry_id)
            .await?
            .ok_or_else(|| not_found("Inquiry", inquiry_id))
    }

    async fn load_client(&self, client_id: Uuid) -> Result<Client, AppError> {
        self.repo
            .get_client(client_id)
            .await?
            .ok_or_else(|| not_found("Client", client_id))
    }

    async fn load_document(&self, document_id: Uuid) -> Result<LegalDocument, AppError> {
        self.repo
            .get_legal_document(document_id)
            .await?
            .ok_or_else(|| not_found("Legal document", document_id))
    }

    async fn load_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.repo
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| not_found("Invoice", invoice_id))
    }

    /// Client of an inquiry, checked for what documents need.
    async fn billable_client(&self, inquiry: &Inquiry) -> Result<Client, AppError> {
        let client_id = inquiry.converted_to_client_id.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Inquiry {} has no client", inquiry.id))
        })?;
        let client = self.load_client(client_id).await?;
        ensure_documentable(&client)?;
        Ok(client)
    }

    // -------------------------------------------------------------------------
    // Quotes
    // -------------------------------------------------------------------------

    /// Email the quote with its acceptance link. Nothing is written; a
    /// failed send fails the action.
    #[instrument(skip(self), fields(inquiry_id = %inquiry_id))]
    pub async fn send_quote(&self, inquiry_id: Uuid) -> Result<QuoteSent, AppError> {
        let inquiry = self.load_inquiry(inquiry_id).await?;
        let price = quoted_price(&inquiry)?;
        let client_id = inquiry.converted_to_client_id.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Inquiry {} has no client", inquiry.id))
        })?;
        let client = self.load_client(client_id).await?;
        let recipient = client
            .primary_email()
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Client has no email address")))?
            .to_string();

        let accept_url = self.accept_url(inquiry.id)?;
        let template = EmailTemplate::Quote {
            client_name: client.billing_name().to_string(),
            project_type: inquiry.project_type.clone(),
            price: format_amount(price, &self.business.currency),
            accept_url: accept_url.clone(),
        };

        if let Err(e) = self.dispatcher.send(&template, &recipient, &[], Vec::new()).await {
            record_transition("send_quote", "email_failed");
            return Err(e.into());
        }

        record_transition("send_quote", "ok");
        info!(recipient = %recipient, "Quote sent");

        Ok(QuoteSent {
            inquiry_id: inquiry.id,
            recipient,
            accept_url,
        })
    }

    /// Token-gated acceptance. Commits the inquiry transition, the DRAFT
    /// agreement, the UNPAID invoice and the deferred emails together, then
    /// sends the confirmation best-effort.
    #[instrument(skip(self, token), fields(inquiry_id = %inquiry_id))]
    pub async fn accept_quote(&self, inquiry_id: Uuid, token: &str) -> Result<QuoteAccepted, AppError> {
        if !self.tokens.verify(inquiry_id, token) {
            record_transition("accept_quote", "invalid_token");
            return Err(AppError::InvalidToken);
        }

        let inquiry = self.load_inquiry(inquiry_id).await?;
        check_acceptable(inquiry.status)?;
        let price = quoted_price(&inquiry)?;
        let client = self.billable_client(&inquiry).await?;

        let mut attempt = 0;
        let (document, invoice) = loop {
            attempt += 1;
            let acceptance = self.build_acceptance(&inquiry, &client).await?;

            match self.repo.commit_acceptance(&acceptance).await? {
                AcceptanceOutcome::Committed { document, invoice } => break (document, invoice),
                AcceptanceOutcome::InquiryNotQuoted(status) => {
                    record_transition("accept_quote", "conflict");
                    return Err(check_acceptable(status)
                        .err()
                        .unwrap_or_else(|| AppError::Conflict(anyhow::anyhow!("Quote has changed, please retry"))));
                }
                AcceptanceOutcome::NumberTaken(kind) => {
                    NUMBERING_RETRIES_TOTAL
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    warn!(kind = kind.as_str(), attempt, "Document number collision");
                    if attempt >= NUMBERING_ATTEMPTS {
                        record_transition("accept_quote", "numbering_conflict");
                        return Err(AppError::Conflict(anyhow::anyhow!(
                            "Could not assign a document number, please retry"
                        )));
                    }
                }
            }
        };

        record_transition("accept_quote", "ok");
        info!(
            document_number = %document.document_number,
            invoice_number = %invoice.invoice_number,
            total = price,
            "Quote accepted"
        );

        let confirmation = EmailTemplate::AcceptanceConfirmation {
            client_name: client.billing_name().to_string(),
            document_number: document.document_number.clone(),
            invoice_number: invoice.invoice_number.clone(),
        };
        if let Some(recipient) = client.primary_email() {
            if let Err(e) = self.dispatcher.send(&confirmation, recipient, &[], Vec::new()).await {
                warn!(error = %e, "Acceptance confirmation not delivered");
            }
        }

        Ok(QuoteAccepted { document, invoice })
    }

    async fn build_acceptance(
        &self,
        inquiry: &Inquiry,
        client: &Client,
    ) -> Result<QuoteAcceptance, AppError> {
        let now = Utc::now();
        let today = now.date_naive();

        let document_number = self.numbering.next(NumberKind::Agreement, today).await?;
        let invoice_number = self.numbering.next(NumberKind::Invoice, today).await?;

        let terms = AgreementTerms::for_inquiry(
            &document_number,
            today,
            &self.business,
            self.settings.invoice_due_days,
            client,
            inquiry,
        );
        let document = NewLegalDocument {
            id: Uuid::new_v4(),
            document_number,
            title: AGREEMENT_TITLE.to_string(),
            content: render_agreement(&terms),
            client_id: client.id,
            inquiry_id: Some(inquiry.id),
            created_utc: now,
        };

        let invoice = NewInvoice {
            id: Uuid::new_v4(),
            invoice_number,
            client_id: client.id,
            inquiry_id: Some(inquiry.id),
            legal_document_id: Some(document.id),
            currency: self.business.currency.clone(),
            issue_date: today,
            due_date: today + chrono::Duration::days(self.settings.invoice_due_days),
            items: invoice_line_items(inquiry)?,
            created_utc: now,
        };

        let signing_at = after(now, self.settings.signing_link_delay);
        let notice_at = after(signing_at, self.settings.invoice_notice_delay);
        let jobs = vec![
            NewJob::new(
                JobKind::SendSigningLink {
                    document_id: document.id,
                },
                signing_at,
            ),
            NewJob::new(
                JobKind::SendInvoiceNotice {
                    invoice_id: invoice.id,
                },
                notice_at,
            ),
        ];

        Ok(QuoteAcceptance {
            inquiry_id: inquiry.id,
            accepted_utc: now,
            document,
            invoice,
            jobs,
        })
    }

    // -------------------------------------------------------------------------
    // Legal documents
    // -------------------------------------------------------------------------

    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn create_legal_document(
        &self,
        request: &StandaloneAgreement,
    ) -> Result<LegalDocument, AppError> {
        if request.scope.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Scope is required")));
        }
        if request.price_minor_units.is_some_and(|p| p < 0) {
            return Err(AppError::BadRequest(anyhow::anyhow!("Price cannot be negative")));
        }
        let client = self.load_client(request.client_id).await?;
        ensure_documentable(&client)?;

        for attempt in 1..=NUMBERING_ATTEMPTS {
            let now = Utc::now();
            let today = now.date_naive();
            let number = self.numbering.next(NumberKind::Agreement, today).await?;
            let terms = AgreementTerms::standalone(
                &number,
                today,
                &self.business,
                self.settings.invoice_due_days,
                &client,
                &request.scope,
                request.price_minor_units,
                request.timeline,
            );
            let input = NewLegalDocument {
                id: Uuid::new_v4(),
                document_number: number,
                title: AGREEMENT_TITLE.to_string(),
                content: render_agreement(&terms),
                client_id: client.id,
                inquiry_id: None,
                created_utc: now,
            };

            match self.repo.insert_legal_document(&input).await? {
                NumberedInsert::Inserted(doc) => {
                    record_transition("create_legal_document", "ok");
                    info!(document_number = %doc.document_number, "Standalone agreement created");
                    return Ok(doc);
                }
                NumberedInsert::NumberTaken => {
                    NUMBERING_RETRIES_TOTAL
                        .with_label_values(&[NumberKind::Agreement.as_str()])
                        .inc();
                    warn!(attempt, "Agreement number collision");
                }
            }
        }

        record_transition("create_legal_document", "numbering_conflict");
        Err(AppError::Conflict(anyhow::anyhow!(
            "Could not assign a document number, please retry"
        )))
    }

    /// Email the signing link and move DRAFT -> SENT. The document stays
    /// DRAFT when the email fails.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn send_legal_document(&self, document_id: Uuid) -> Result<LegalDocument, AppError> {
        let doc = self.load_document(document_id).await?;
        if doc.status != DocumentStatus::Draft {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Document has already been sent"
            )));
        }
        let client = self.load_client(doc.client_id).await?;
        let recipient = client
            .primary_email()
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Client has no email address")))?;

        let template = EmailTemplate::SigningLink {
            client_name: client.billing_name().to_string(),
            document_number: doc.document_number.clone(),
            signing_url: self.signing_url(doc.id),
        };
        if let Err(e) = self.dispatcher.send(&template, recipient, &[], Vec::new()).await {
            record_transition("send_legal_document", "email_failed");
            return Err(e.into());
        }

        let sent = self
            .repo
            .mark_document_sent(doc.id, Utc::now())
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("Document has already been sent"))
            })?;

        record_transition("send_legal_document", "ok");
        info!(document_number = %sent.document_number, "Signing link sent");
        Ok(sent)
    }

    pub async fn public_legal_document(
        &self,
        document_id: Uuid,
    ) -> Result<PublicLegalDocument, AppError> {
        let doc = self.load_document(document_id).await?;
        match doc.status {
            DocumentStatus::Sent | DocumentStatus::Acknowledged => {
                Ok(PublicLegalDocument::from(&doc))
            }
            _ => Err(not_found("Legal document", document_id)),
        }
    }

    /// SENT -> ACKNOWLEDGED. Schedules the invoice dispatch for the client's
    /// most recent unpaid invoice in the same write.
    #[instrument(skip(self, signature), fields(document_id = %document_id))]
    pub async fn sign_document(
        &self,
        document_id: Uuid,
        signature: &str,
    ) -> Result<LegalDocument, AppError> {
        let signature = signature.trim();
        if signature.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Signature is required")));
        }

        let doc = self.load_document(document_id).await?;
        check_signable(doc.status)?;

        let now = Utc::now();
        let follow_up = self
            .repo
            .latest_unpaid_invoice_for_client(doc.client_id)
            .await?
            .map(|invoice| {
                NewJob::new(
                    JobKind::DispatchInvoice {
                        invoice_id: invoice.id,
                    },
                    after(now, self.settings.invoice_dispatch_delay),
                )
            });
        if follow_up.is_none() {
            warn!(client_id = %doc.client_id, "No unpaid invoice to dispatch after signature");
        }

        let capture = SignatureCapture {
            document_id: doc.id,
            signature: signature.to_string(),
            acknowledged_utc: now,
            follow_up,
        };

        let signed = match self.repo.acknowledge_document(&capture).await? {
            Some(signed) => signed,
            None => {
                record_transition("sign_document", "conflict");
                let current = self.load_document(document_id).await?;
                check_signable(current.status)?;
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Document is not available for signing"
                )));
            }
        };

        record_transition("sign_document", "ok");
        info!(document_number = %signed.document_number, "Document signed");

        self.notify_signed(&signed, now).await;
        Ok(signed)
    }

    async fn notify_signed(&self, doc: &LegalDocument, acknowledged_at: DateTime<Utc>) {
        let client = match self.repo.get_client(doc.client_id).await {
            Ok(Some(client)) => client,
            Ok(None) => {
                warn!(client_id = %doc.client_id, "Signed document has no client");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load client for signature emails");
                return;
            }
        };

        if let Some(recipient) = client.primary_email() {
            let template = EmailTemplate::DocumentSigned {
                client_name: client.billing_name().to_string(),
                document_number: doc.document_number.clone(),
            };
            if let Err(e) = self.dispatcher.send(&template, recipient, &[], Vec::new()).await {
                warn!(error = %e, "Signature confirmation to client not delivered");
            }
        }

        let template = EmailTemplate::DocumentSignedAdmin {
            client_name: client.billing_name().to_string(),
            document_number: doc.document_number.clone(),
            acknowledged_at,
        };
        if let Err(e) = self
            .dispatcher
            .send(&template, &self.business.admin_email, &[], Vec::new())
            .await
        {
            warn!(error = %e, "Signature notification to admin not delivered");
        }
    }

    pub async fn printable_agreement(&self, document_id: Uuid) -> Result<Printable, AppError> {
        let document = self.load_document(document_id).await?;
        let client = self.load_client(document.client_id).await?;
        let filename = format!(
            "{}.{}",
            document.document_number,
            self.renderer.file_extension()
        );
        let bytes = printable::render_agreement(
            self.renderer.clone(),
            PrintableAgreement {
                document,
                client,
                issuer: self.business.clone(),
            },
            self.settings.render_timeout,
        )
        .await?;
        Ok(Printable {
            content_type: self.renderer.content_type(),
            filename,
            bytes,
        })
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    pub async fn printable_invoice(&self, invoice_id: Uuid) -> Result<Printable, AppError> {
        let invoice = self.load_invoice(invoice_id).await?;
        let client = self.load_client(invoice.client_id).await?;
        self.render_invoice(invoice, client).await
    }

    async fn render_invoice(&self, invoice: Invoice, client: Client) -> Result<Printable, AppError> {
        let filename = format!(
            "{}.{}",
            invoice.invoice_number,
            self.renderer.file_extension()
        );
        let bytes = printable::render_invoice(
            self.renderer.clone(),
            PrintableInvoice {
                invoice,
                client,
                issuer: self.business.clone(),
            },
            self.settings.render_timeout,
        )
        .await?;
        Ok(Printable {
            content_type: self.renderer.content_type(),
            filename,
            bytes,
        })
    }

    /// Email the printable invoice and stamp `sent_at`. Status is untouched.
    /// A PAID invoice is returned as is without an email.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn dispatch_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self.load_invoice(invoice_id).await?;
        if invoice.status == InvoiceStatus::Cancelled {
            return Err(AppError::Conflict(anyhow::anyhow!("Invoice is cancelled")));
        }
        if invoice.status == InvoiceStatus::Paid {
            record_transition("dispatch_invoice", "already_paid");
            info!(invoice_number = %invoice.invoice_number, "Invoice already paid, not dispatching");
            return Ok(invoice);
        }
        let client = self.load_client(invoice.client_id).await?;
        let recipient = client
            .primary_email()
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Client has no email address")))?
            .to_string();
        let cc: Vec<String> = client.emails.iter().skip(1).cloned().collect();

        let template = EmailTemplate::InvoiceDispatch {
            client_name: client.billing_name().to_string(),
            invoice_number: invoice.invoice_number.clone(),
            amount_due: format_amount(invoice.amount_due_minor_units(), &invoice.currency),
            due_date: invoice.due_date,
            payment_url: self.payment_url(invoice.id),
        };

        let printable = self.render_invoice(invoice.clone(), client).await?;
        let attachment = Attachment {
            filename: printable.filename,
            content_type: printable.content_type.to_string(),
            content: printable.bytes,
        };

        if let Err(e) = self
            .dispatcher
            .send(&template, &recipient, &cc, vec![attachment])
            .await
        {
            record_transition("dispatch_invoice", "email_failed");
            return Err(e.into());
        }

        self.repo.mark_invoice_sent(invoice.id, Utc::now()).await?;
        record_transition("dispatch_invoice", "ok");
        info!(invoice_number = %invoice.invoice_number, "Invoice dispatched");

        self.load_invoice(invoice.id).await
    }

    /// Informational "invoice created" email.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn send_invoice_notice(&self, invoice_id: Uuid) -> Result<(), AppError> {
        let invoice = self.load_invoice(invoice_id).await?;
        let client = self.load_client(invoice.client_id).await?;
        let recipient = client
            .primary_email()
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Client has no email address")))?;

        let template = EmailTemplate::InvoiceNotice {
            client_name: client.billing_name().to_string(),
            invoice_number: invoice.invoice_number.clone(),
            total: format_amount(invoice.total_minor_units, &invoice.currency),
            due_date: invoice.due_date,
        };
        self.dispatcher
            .send(&template, recipient, &[], Vec::new())
            .await?;
        Ok(())
    }

    /// Manual status change. OVERDUE is derived and PARTIALLY_PAID belongs
    /// to reconciliation, so neither can be set here.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, status = status.as_str()))]
    pub async fn set_invoice_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        payment_method: Option<String>,
        payment_reference: Option<String>,
    ) -> Result<InvoiceView, AppError> {
        if matches!(status, InvoiceStatus::Overdue | InvoiceStatus::PartiallyPaid) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Status {} cannot be set manually",
                status.as_str()
            )));
        }

        let now = Utc::now();
        let update = InvoiceStatusUpdate {
            status,
            paid_date: (status == InvoiceStatus::Paid).then(|| now.date_naive()),
            payment_method,
            payment_reference,
            updated_utc: now,
        };
        let invoice = self
            .repo
            .update_invoice_status(invoice_id, &update)
            .await?
            .ok_or_else(|| not_found("Invoice", invoice_id))?;

        record_transition("set_invoice_status", status.as_str());
        Ok(InvoiceView::new(invoice, now.date_naive()))
    }

    pub async fn list_invoices(
        &self,
        client_id: Option<Uuid>,
        status: Option<InvoiceStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<InvoiceView>, AppError> {
        let today = Utc::now().date_naive();
        let filter = ListInvoicesFilter {
            client_id,
            status,
            as_of: today,
            limit: limit.unwrap_or(50).clamp(1, 500),
        };
        let invoices = self.repo.list_invoices(&filter).await?;
        Ok(invoices
            .into_iter()
            .map(|inv| InvoiceView::new(inv, today))
            .collect())
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceView, AppError> {
        let invoice = self.load_invoice(invoice_id).await?;
        Ok(InvoiceView::new(invoice, Utc::now().date_naive()))
    }

    /// Payment intent for the amount still due.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn create_payment_intent(&self, invoice_id: Uuid) -> Result<PaymentIntent, AppError> {
        let invoice = self.load_invoice(invoice_id).await?;
        let due = invoice.amount_due_minor_units();
        if !invoice.status.is_open() || due <= 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice is not payable"
            )));
        }
        let intent = self
            .payments
            .create_payment_intent(due, &invoice.currency, invoice.id, &invoice.invoice_number)
            .await?;
        Ok(intent)
    }

    // -------------------------------------------------------------------------
    // Deferred jobs
    // -------------------------------------------------------------------------

    /// Runs one outbox job. Jobs whose effect already happened are no-ops.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, job = job.kind().name()))]
    pub async fn run_job(&self, job: &ScheduledJob) -> Result<(), AppError> {
        match job.kind() {
            JobKind::SendSigningLink { document_id } => {
                let doc = self.load_document(*document_id).await?;
                if doc.status != DocumentStatus::Draft {
                    info!(status = doc.status.as_str(), "Signing link already sent");
                    return Ok(());
                }
                self.send_legal_document(*document_id).await.map(|_| ())
            }
            JobKind::SendInvoiceNotice { invoice_id } => {
                self.send_invoice_notice(*invoice_id).await
            }
            JobKind::DispatchInvoice { invoice_id } => {
                self.dispatch_invoice(*invoice_id).await.map(|_| ())
            }
        }
    }
}

fn quoted_price(inquiry: &Inquiry) -> Result<i64, AppError> {
    match inquiry.final_price_minor_units {
        Some(price) if price >= 0 => Ok(price),
        Some(_) => Err(AppError::BadRequest(anyhow::anyhow!(
            "Inquiry {} has a negative price",
            inquiry.id
        ))),
        None => Err(AppError::BadRequest(anyhow::anyhow!(
            "Inquiry {} has no final price",
            inquiry.id
        ))),
    }
}

fn ensure_documentable(client: &Client) -> Result<(), AppError> {
    if client.primary_email().is_none() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Client {} has no email address",
            client.id
        )));
    }
    if client.address_lines().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Client {} has no postal address",
            client.id
        )));
    }
    Ok(())
}

fn check_acceptable(status: InquiryStatus) -> Result<(), AppError> {
    match status {
        InquiryStatus::Quoted => Ok(()),
        InquiryStatus::Accepted => Err(AppError::Conflict(anyhow::anyhow!(
            "Quote has already been accepted"
        ))),
        _ => Err(AppError::Conflict(anyhow::anyhow!(
            "Quote is not available for acceptance"
        ))),
    }
}

fn check_signable(status: DocumentStatus) -> Result<(), AppError> {
    match status {
        DocumentStatus::Sent => Ok(()),
        DocumentStatus::Acknowledged => Err(AppError::Conflict(anyhow::anyhow!(
            "Document has already been signed"
        ))),
        _ => Err(AppError::Conflict(anyhow::anyhow!(
            "Document is not available for signing"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_quoted_inquiries_are_acceptable() {
        assert!(check_acceptable(InquiryStatus::Quoted).is_ok());
        let err = check_acceptable(InquiryStatus::Accepted).unwrap_err();
        assert!(err.to_string().contains("already been accepted"));
        for status in [InquiryStatus::New, InquiryStatus::Declined, InquiryStatus::Archived] {
            assert!(matches!(check_acceptable(status), Err(AppError::Conflict(_))));
        }
    }

    #[test]
    fn only_sent_documents_are_signable() {
        assert!(check_signable(DocumentStatus::Sent).is_ok());
        assert!(check_signable(DocumentStatus::Draft)
            .unwrap_err()
            .to_string()
            .contains("not available"));
        assert!(check_signable(DocumentStatus::Acknowledged)
            .unwrap_err()
            .to_string()
            .contains("already been signed"));
        assert!(check_signable(DocumentStatus::Voided).is_err());
    }

    #[test]
    fn delays_are_added_to_now() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::from_secs(3)), now + chrono::Duration::seconds(3));
        assert_eq!(after(now, Duration::ZERO), now);
    }
}
