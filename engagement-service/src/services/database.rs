//! PostgreSQL repository for engagement-service.

use crate::models::{
    normalize_emails, Client, DocumentStatus, Inquiry, InquiryStatus, Invoice, InvoiceItem,
    InvoiceStatus, InvoiceStatusUpdate, JobStatus, LegalDocument, ListInvoicesFilter, NewInvoice,
    NewJob, NewLegalDocument, PaymentApplication, PaymentOutcome, ProcessedPaymentEvent,
    ScheduledJob,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::numbering::NumberKind;
use crate::services::repository::{
    AcceptanceOutcome, NumberedInsert, QuoteAcceptance, Repository, SignatureCapture,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

macro_rules! document_columns {
    () => {
        "id, document_number, title, content, status, client_id, inquiry_id, client_signature, \
         sent_at, acknowledged_at, created_utc, updated_utc"
    };
}

macro_rules! invoice_columns {
    () => {
        "id, invoice_number, client_id, inquiry_id, legal_document_id, currency, \
         total_minor_units, amount_paid_minor_units, status, issue_date, due_date, paid_date, \
         payment_method, payment_reference, sent_at, created_utc, updated_utc"
    };
}

macro_rules! job_columns {
    () => {
        "job_id, idempotency_key, payload, status, run_at, attempts, locked_until, last_error, \
         created_utc, completed_utc"
    };
}

/// Raw client row; both address shapes are present until normalised.
#[derive(Debug, FromRow)]
struct ClientRow {
    id: Uuid,
    name: String,
    company: Option<String>,
    email: Option<String>,
    emails: Vec<String>,
    address: Option<String>,
    created_utc: DateTime<Utc>,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            emails: normalize_emails(row.email.as_deref(), &row.emails),
            id: row.id,
            name: row.name,
            company: row.company,
            address: row.address,
            created_utc: row.created_utc,
        }
    }
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "engagement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn load_items(&self, invoice_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<InvoiceItem>>, AppError> {
        if invoice_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT id, invoice_id, position, description, quantity, unit_price_minor_units
            FROM invoice_items
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, position
            "#,
        )
        .bind(invoice_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load invoice items", e))?;

        let mut by_invoice: HashMap<Uuid, Vec<InvoiceItem>> = HashMap::new();
        for item in items {
            by_invoice.entry(item.invoice_id).or_default().push(item);
        }
        Ok(by_invoice)
    }

    async fn with_items(&self, mut invoices: Vec<Invoice>) -> Result<Vec<Invoice>, AppError> {
        let ids: Vec<Uuid> = invoices.iter().map(|i| i.id).collect();
        let mut items = self.load_items(&ids).await?;
        for invoice in invoices.iter_mut() {
            invoice.items = items.remove(&invoice.id).unwrap_or_default();
        }
        Ok(invoices)
    }

    async fn insert_invoice_tx(
        tx: &mut Transaction<'_, Postgres>,
        input: &NewInvoice,
    ) -> Result<NumberedInsert<Invoice>, AppError> {
        let invoice = input.clone().into_invoice();

        let inserted = sqlx::query(
            r#"
            INSERT INTO invoices (id, invoice_number, client_id, inquiry_id, legal_document_id,
                                  currency, total_minor_units, amount_paid_minor_units, status,
                                  issue_date, due_date, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.invoice_number)
        .bind(invoice.client_id)
        .bind(invoice.inquiry_id)
        .bind(invoice.legal_document_id)
        .bind(&invoice.currency)
        .bind(invoice.total_minor_units)
        .bind(invoice.status.as_str())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.created_utc)
        .execute(&mut **tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(NumberedInsert::NumberTaken),
            Err(e) => return Err(db_error("Failed to create invoice", e)),
        }

        for item in &invoice.items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (id, invoice_id, position, description, quantity, unit_price_minor_units)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id)
            .bind(item.invoice_id)
            .bind(item.position)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price_minor_units)
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to create invoice item", e))?;
        }

        Ok(NumberedInsert::Inserted(invoice))
    }

    async fn insert_document_tx(
        tx: &mut Transaction<'_, Postgres>,
        input: &NewLegalDocument,
    ) -> Result<NumberedInsert<LegalDocument>, AppError> {
        let result = sqlx::query_as::<_, LegalDocument>(concat!(
            "INSERT INTO legal_documents (id, document_number, title, content, status, client_id, \
             inquiry_id, created_utc, updated_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING ",
            document_columns!()
        ))
        .bind(input.id)
        .bind(&input.document_number)
        .bind(&input.title)
        .bind(&input.content)
        .bind(DocumentStatus::Draft.as_str())
        .bind(input.client_id)
        .bind(input.inquiry_id)
        .bind(input.created_utc)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(doc) => Ok(NumberedInsert::Inserted(doc)),
            Err(e) if is_unique_violation(&e) => Ok(NumberedInsert::NumberTaken),
            Err(e) => Err(db_error("Failed to create legal document", e)),
        }
    }

    async fn enqueue_job_tx(
        tx: &mut Transaction<'_, Postgres>,
        job: &NewJob,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (job_id, idempotency_key, payload, status, run_at)
            VALUES ($1, $2, $3, 'pending', $4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(job.job_id)
        .bind(job.idempotency_key())
        .bind(Json(&job.kind))
        .bind(job.run_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to enqueue job", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))
    }

    async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), AppError> {
        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }
}

#[async_trait]
impl Repository for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inquiry / Client Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(inquiry_id = %inquiry_id))]
    async fn get_inquiry(&self, inquiry_id: Uuid) -> Result<Option<Inquiry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_inquiry"])
            .start_timer();

        let inquiry = sqlx::query_as::<_, Inquiry>(
            r#"
            SELECT id, name, email, company, project_type, goal, requirements, timeline, status,
                   final_price_minor_units, quoted_at, converted_to_client_id, created_utc, updated_utc
            FROM inquiries
            WHERE id = $1
            "#,
        )
        .bind(inquiry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get inquiry", e))?;

        timer.observe_duration();

        Ok(inquiry)
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let row = sqlx::query_as::<_, ClientRow>(
            r#"
            SELECT id, name, company, email, emails, address, created_utc
            FROM clients
            WHERE id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get client", e))?;

        timer.observe_duration();

        Ok(row.map(Client::from))
    }

    // -------------------------------------------------------------------------
    // Numbering
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(kind = kind.as_str(), prefix = %prefix))]
    async fn latest_number(
        &self,
        kind: NumberKind,
        prefix: &str,
    ) -> Result<Option<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_number"])
            .start_timer();

        // Numeric order within the prefix: a longer suffix is a larger
        // sequence once padding has been outgrown.
        let sql = match kind {
            NumberKind::Agreement => {
                r#"
                SELECT document_number FROM legal_documents
                WHERE starts_with(document_number, $1)
                  AND substr(document_number, length($1) + 1) ~ '^[0-9]+$'
                ORDER BY length(document_number) DESC, document_number DESC
                LIMIT 1
                "#
            }
            NumberKind::Invoice => {
                r#"
                SELECT invoice_number FROM invoices
                WHERE starts_with(invoice_number, $1)
                  AND substr(invoice_number, length($1) + 1) ~ '^[0-9]+$'
                ORDER BY length(invoice_number) DESC, invoice_number DESC
                LIMIT 1
                "#
            }
        };

        let latest: Option<String> = sqlx::query_scalar(sql)
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to read latest number", e))?;

        timer.observe_duration();

        Ok(latest)
    }

    // -------------------------------------------------------------------------
    // Acceptance
    // -------------------------------------------------------------------------

    #[instrument(skip(self, acceptance), fields(inquiry_id = %acceptance.inquiry_id))]
    async fn commit_acceptance(
        &self,
        acceptance: &QuoteAcceptance,
    ) -> Result<AcceptanceOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_acceptance"])
            .start_timer();

        let mut tx = self.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE inquiries SET status = 'ACCEPTED', updated_utc = $2
            WHERE id = $1 AND status = 'QUOTED'
            "#,
        )
        .bind(acceptance.inquiry_id)
        .bind(acceptance.accepted_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to accept inquiry", e))?;

        if updated.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM inquiries WHERE id = $1")
                    .bind(acceptance.inquiry_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to read inquiry status", e))?;
            return match status {
                Some(s) => Ok(AcceptanceOutcome::InquiryNotQuoted(InquiryStatus::from_string(&s))),
                None => Err(AppError::NotFound(anyhow::anyhow!(
                    "Inquiry {} not found",
                    acceptance.inquiry_id
                ))),
            };
        }

        let document = match Self::insert_document_tx(&mut tx, &acceptance.document).await? {
            NumberedInsert::Inserted(doc) => doc,
            NumberedInsert::NumberTaken => {
                return Ok(AcceptanceOutcome::NumberTaken(NumberKind::Agreement));
            }
        };

        let invoice = match Self::insert_invoice_tx(&mut tx, &acceptance.invoice).await? {
            NumberedInsert::Inserted(inv) => inv,
            NumberedInsert::NumberTaken => {
                return Ok(AcceptanceOutcome::NumberTaken(NumberKind::Invoice));
            }
        };

        for job in &acceptance.jobs {
            Self::enqueue_job_tx(&mut tx, job).await?;
        }

        Self::commit(tx).await?;
        timer.observe_duration();

        info!(
            inquiry_id = %acceptance.inquiry_id,
            document_number = %document.document_number,
            invoice_number = %invoice.invoice_number,
            "Quote acceptance committed"
        );

        Ok(AcceptanceOutcome::Committed { document, invoice })
    }

    // -------------------------------------------------------------------------
    // Legal Document Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, document), fields(document_number = %document.document_number))]
    async fn insert_legal_document(
        &self,
        document: &NewLegalDocument,
    ) -> Result<NumberedInsert<LegalDocument>, AppError> {
        let mut tx = self.begin().await?;
        let inserted = Self::insert_document_tx(&mut tx, document).await?;
        if let NumberedInsert::Inserted(ref doc) = inserted {
            Self::commit(tx).await?;
            info!(document_id = %doc.id, "Legal document created");
        }
        Ok(inserted)
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn get_legal_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<LegalDocument>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_legal_document"])
            .start_timer();

        let doc = sqlx::query_as::<_, LegalDocument>(concat!(
            "SELECT ",
            document_columns!(),
            " FROM legal_documents WHERE id = $1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get legal document", e))?;

        timer.observe_duration();

        Ok(doc)
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn mark_document_sent(
        &self,
        document_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<Option<LegalDocument>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_document_sent"])
            .start_timer();

        let doc = sqlx::query_as::<_, LegalDocument>(concat!(
            "UPDATE legal_documents SET status = 'SENT', sent_at = $2, updated_utc = $2 \
             WHERE id = $1 AND status = 'DRAFT' RETURNING ",
            document_columns!()
        ))
        .bind(document_id)
        .bind(sent_utc)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to mark legal document sent", e))?;

        timer.observe_duration();

        Ok(doc)
    }

    #[instrument(skip(self, capture), fields(document_id = %capture.document_id))]
    async fn acknowledge_document(
        &self,
        capture: &SignatureCapture,
    ) -> Result<Option<LegalDocument>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["acknowledge_document"])
            .start_timer();

        let mut tx = self.begin().await?;

        let doc = sqlx::query_as::<_, LegalDocument>(concat!(
            "UPDATE legal_documents SET status = 'ACKNOWLEDGED', client_signature = $2, \
             acknowledged_at = $3, updated_utc = $3 \
             WHERE id = $1 AND status = 'SENT' RETURNING ",
            document_columns!()
        ))
        .bind(capture.document_id)
        .bind(&capture.signature)
        .bind(capture.acknowledged_utc)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to acknowledge legal document", e))?;

        let Some(doc) = doc else {
            return Ok(None);
        };

        if let Some(job) = &capture.follow_up {
            Self::enqueue_job_tx(&mut tx, job).await?;
        }

        Self::commit(tx).await?;
        timer.observe_duration();

        Ok(Some(doc))
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get invoice", e))?;

        timer.observe_duration();

        match invoice {
            Some(inv) => Ok(self.with_items(vec![inv]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn latest_unpaid_invoice_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE client_id = $1 AND status = 'UNPAID' \
             ORDER BY created_utc DESC LIMIT 1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find unpaid invoice", e))?;

        match invoice {
            Some(inv) => Ok(self.with_items(vec![inv]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices \
             WHERE ($1::uuid IS NULL OR client_id = $1) \
               AND ($2::text IS NULL OR \
                    (CASE WHEN status IN ('UNPAID', 'PARTIALLY_PAID') AND due_date < $3 \
                          THEN 'OVERDUE' ELSE status END) = $2) \
             ORDER BY created_utc DESC \
             LIMIT $4"
        ))
        .bind(filter.client_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.as_of)
        .bind(filter.limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list invoices", e))?;

        timer.observe_duration();

        self.with_items(invoices).await
    }

    #[instrument(skip(self, update), fields(invoice_id = %invoice_id, status = update.status.as_str()))]
    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        update: &InvoiceStatusUpdate,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_status"])
            .start_timer();

        let paid = update.status == InvoiceStatus::Paid;
        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "UPDATE invoices SET status = $2, updated_utc = $3, \
             amount_paid_minor_units = CASE WHEN $4 THEN total_minor_units ELSE amount_paid_minor_units END, \
             paid_date = CASE WHEN $4 THEN $5 ELSE paid_date END, \
             payment_method = CASE WHEN $4 THEN COALESCE($6, payment_method) ELSE payment_method END, \
             payment_reference = CASE WHEN $4 THEN COALESCE($7, payment_reference) ELSE payment_reference END \
             WHERE id = $1 RETURNING ",
            invoice_columns!()
        ))
        .bind(invoice_id)
        .bind(update.status.as_str())
        .bind(update.updated_utc)
        .bind(paid)
        .bind(update.paid_date)
        .bind(&update.payment_method)
        .bind(&update.payment_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update invoice status", e))?;

        timer.observe_duration();

        match invoice {
            Some(inv) => {
                info!(invoice_id = %inv.id, status = inv.status.as_str(), "Invoice status updated");
                Ok(self.with_items(vec![inv]).await?.pop())
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn mark_invoice_sent(
        &self,
        invoice_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE invoices SET sent_at = $2, updated_utc = $2 WHERE id = $1")
            .bind(invoice_id)
            .bind(sent_utc)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to mark invoice sent", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice_id
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, payment), fields(event_id = %payment.event_id, invoice_id = %payment.invoice_id))]
    async fn apply_payment(
        &self,
        payment: &PaymentApplication,
    ) -> Result<PaymentOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_payment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO processed_payment_events (event_id, event_type, invoice_id, amount_minor_units, outcome, received_utc)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&payment.event_id)
        .bind(&payment.event_type)
        .bind(payment.invoice_id)
        .bind(payment.amount_minor_units)
        .bind(payment.received_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to record payment event", e))?;

        if claimed.rows_affected() == 0 {
            return Ok(PaymentOutcome::Duplicate);
        }

        let current = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE id = $1 FOR UPDATE"
        ))
        .bind(payment.invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to lock invoice", e))?;

        let outcome = match current {
            None => PaymentOutcome::InvoiceNotFound,
            Some(inv) if matches!(inv.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled) => {
                PaymentOutcome::NotPayable(inv)
            }
            Some(mut inv) => {
                inv.apply_payment(
                    payment.amount_minor_units,
                    &payment.provider_payment_id,
                    &payment.payment_method,
                    payment.received_utc,
                );
                sqlx::query(
                    r#"
                    UPDATE invoices
                    SET amount_paid_minor_units = $2, status = $3, paid_date = $4,
                        payment_method = $5, payment_reference = $6, updated_utc = $7
                    WHERE id = $1
                    "#,
                )
                .bind(inv.id)
                .bind(inv.amount_paid_minor_units)
                .bind(inv.status.as_str())
                .bind(inv.paid_date)
                .bind(&inv.payment_method)
                .bind(&inv.payment_reference)
                .bind(inv.updated_utc)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to apply payment", e))?;
                PaymentOutcome::Applied(inv)
            }
        };

        sqlx::query("UPDATE processed_payment_events SET outcome = $2 WHERE event_id = $1")
            .bind(&payment.event_id)
            .bind(outcome.label())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to record payment outcome", e))?;

        Self::commit(tx).await?;
        timer.observe_duration();

        match outcome {
            PaymentOutcome::Applied(inv) => {
                let mut loaded = self.with_items(vec![inv]).await?;
                match loaded.pop() {
                    Some(inv) => Ok(PaymentOutcome::Applied(inv)),
                    None => Err(AppError::InternalError(anyhow::anyhow!(
                        "Invoice vanished after payment"
                    ))),
                }
            }
            other => Ok(other),
        }
    }

    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    async fn record_payment_event(&self, event: &ProcessedPaymentEvent) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_payment_events (event_id, event_type, invoice_id, amount_minor_units, outcome, received_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.invoice_id)
        .bind(event.amount_minor_units)
        .bind(&event.outcome)
        .bind(event.received_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record payment event", e))?;

        Ok(result.rows_affected() == 1)
    }

    // -------------------------------------------------------------------------
    // Outbox Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, job), fields(job = job.kind.name()))]
    async fn enqueue_job(&self, job: &NewJob) -> Result<bool, AppError> {
        let mut tx = self.begin().await?;
        let inserted = Self::enqueue_job_tx(&mut tx, job).await?;
        Self::commit(tx).await?;
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<ScheduledJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_due_jobs"])
            .start_timer();

        let abandoned = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET status = 'failed', last_error = 'lease expired after maximum attempts',
                locked_until = NULL, completed_utc = $1
            WHERE status = 'processing' AND locked_until < $1 AND attempts >= $2
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to expire abandoned jobs", e))?;

        if abandoned.rows_affected() > 0 {
            warn!(
                count = abandoned.rows_affected(),
                "Abandoned jobs failed after maximum attempts"
            );
        }

        let jobs = sqlx::query_as::<_, ScheduledJob>(concat!(
            "UPDATE scheduled_jobs SET status = 'processing', attempts = attempts + 1, locked_until = $2 \
             WHERE job_id IN ( \
                 SELECT job_id FROM scheduled_jobs \
                 WHERE (status = 'pending' AND run_at <= $1) \
                    OR (status = 'processing' AND locked_until < $1) \
                 ORDER BY run_at \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING ",
            job_columns!()
        ))
        .bind(now)
        .bind(now + lease)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim jobs", e))?;

        timer.observe_duration();

        Ok(jobs)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn complete_job(
        &self,
        job_id: Uuid,
        completed_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE scheduled_jobs SET status = $2, locked_until = NULL, completed_utc = $3 WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Completed.as_str())
        .bind(completed_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to complete job", e))?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(job_id = %job_id))]
    async fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        failed_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE scheduled_jobs SET status = $2, locked_until = NULL, last_error = $3, completed_utc = $4 WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(failed_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fail job", e))?;
        Ok(())
    }
}
