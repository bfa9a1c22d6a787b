//! Invoice model.

use crate::models::money;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
///
/// `Overdue` is never stored; it is derived from the due date when invoices
/// are read. `PartiallyPaid` is part of the schema but no code path assigns
/// it: a part payment leaves the stored status as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "UNPAID",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PARTIALLY_PAID" => InvoiceStatus::PartiallyPaid,
            "PAID" => InvoiceStatus::Paid,
            "OVERDUE" => InvoiceStatus::Overdue,
            "CANCELLED" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Unpaid,
        }
    }

    /// Whether money is still expected against an invoice in this state.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Unpaid | InvoiceStatus::PartiallyPaid | InvoiceStatus::Overdue
        )
    }
}

impl From<String> for InvoiceStatus {
    fn from(s: String) -> Self {
        InvoiceStatus::from_string(&s)
    }
}

/// Invoice line item.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub position: i32,
    pub description: String,
    pub quantity: i32,
    pub unit_price_minor_units: i64,
}

impl InvoiceItem {
    pub fn line_total_minor_units(&self) -> i64 {
        self.unit_price_minor_units * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub inquiry_id: Option<Uuid>,
    pub legal_document_id: Option<Uuid>,
    pub currency: String,
    pub total_minor_units: i64,
    pub amount_paid_minor_units: i64,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    #[sqlx(skip)]
    pub items: Vec<InvoiceItem>,
}

impl Invoice {
    /// Status as shown to readers: open invoices past their due date read as
    /// OVERDUE. The stored status is left untouched.
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        match self.status {
            InvoiceStatus::Unpaid | InvoiceStatus::PartiallyPaid if self.due_date < today => {
                InvoiceStatus::Overdue
            }
            status => status,
        }
    }

    pub fn amount_due_minor_units(&self) -> i64 {
        (self.total_minor_units - self.amount_paid_minor_units).max(0)
    }

    pub fn total(&self) -> Decimal {
        money::to_major(self.total_minor_units)
    }

    /// Add a received amount. The running total is capped at the invoice
    /// total; reaching it marks the invoice PAID. A part payment leaves the
    /// status as it was.
    pub fn apply_payment(
        &mut self,
        amount_minor_units: i64,
        payment_reference: &str,
        payment_method: &str,
        received_utc: DateTime<Utc>,
    ) {
        let paid = self
            .amount_paid_minor_units
            .saturating_add(amount_minor_units.max(0));
        self.amount_paid_minor_units = paid.min(self.total_minor_units);
        self.payment_reference = Some(payment_reference.to_string());
        self.payment_method = Some(payment_method.to_string());
        if self.amount_paid_minor_units >= self.total_minor_units {
            self.status = InvoiceStatus::Paid;
            self.paid_date = Some(received_utc.date_naive());
        }
        self.updated_utc = received_utc;
    }
}

/// Input for a line item on a new invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: i32,
    pub unit_price_minor_units: i64,
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub inquiry_id: Option<Uuid>,
    pub legal_document_id: Option<Uuid>,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<NewInvoiceItem>,
    pub created_utc: DateTime<Utc>,
}

impl NewInvoice {
    pub fn total_minor_units(&self) -> i64 {
        self.items
            .iter()
            .map(|i| i.unit_price_minor_units * i64::from(i.quantity))
            .sum()
    }

    pub fn into_invoice(self) -> Invoice {
        let total = self.total_minor_units();
        let items = self
            .items
            .into_iter()
            .enumerate()
            .map(|(position, item)| InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id: self.id,
                position: position as i32,
                description: item.description,
                quantity: item.quantity,
                unit_price_minor_units: item.unit_price_minor_units,
            })
            .collect();

        Invoice {
            id: self.id,
            invoice_number: self.invoice_number,
            client_id: self.client_id,
            inquiry_id: self.inquiry_id,
            legal_document_id: self.legal_document_id,
            currency: self.currency,
            total_minor_units: total,
            amount_paid_minor_units: 0,
            status: InvoiceStatus::Unpaid,
            issue_date: self.issue_date,
            due_date: self.due_date,
            paid_date: None,
            payment_method: None,
            payment_reference: None,
            sent_at: None,
            created_utc: self.created_utc,
            updated_utc: self.created_utc,
            items,
        }
    }
}

/// Manual status change from the admin area.
#[derive(Debug, Clone)]
pub struct InvoiceStatusUpdate {
    pub status: InvoiceStatus,
    pub paid_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub updated_utc: DateTime<Utc>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone)]
pub struct ListInvoicesFilter {
    pub client_id: Option<Uuid>,
    /// Matched against the status derived as of `as_of`.
    pub status: Option<InvoiceStatus>,
    pub as_of: NaiveDate,
    pub limit: i64,
}

/// Invoice as returned by the admin API, with derived status and major-unit
/// amounts alongside the stored minor units.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub legal_document_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub currency: String,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub amount_due: Decimal,
    pub total_minor_units: i64,
    pub amount_paid_minor_units: i64,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceView {
    pub fn new(invoice: Invoice, today: NaiveDate) -> Self {
        Self {
            status: invoice.effective_status(today),
            total: money::to_major(invoice.total_minor_units),
            amount_paid: money::to_major(invoice.amount_paid_minor_units),
            amount_due: money::to_major(invoice.amount_due_minor_units()),
            id: invoice.id,
            invoice_number: invoice.invoice_number,
            client_id: invoice.client_id,
            legal_document_id: invoice.legal_document_id,
            currency: invoice.currency,
            total_minor_units: invoice.total_minor_units,
            amount_paid_minor_units: invoice.amount_paid_minor_units,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            paid_date: invoice.paid_date,
            payment_method: invoice.payment_method,
            payment_reference: invoice.payment_reference,
            sent_at: invoice.sent_at,
            items: invoice.items,
        }
    }
}
