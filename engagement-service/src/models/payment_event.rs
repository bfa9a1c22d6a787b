//! Payment provider webhook events and their processing record.

use crate::models::Invoice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Webhook envelope sent by the payment provider.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub object: PaymentIntentObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    /// Amount in minor units.
    pub amount: i64,
    /// Amount actually captured, when the provider reports it separately.
    #[serde(default)]
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<serde_json::Value>,
}

impl PaymentEvent {
    /// Invoice reference the intent was created with.
    pub fn invoice_id(&self) -> Option<Uuid> {
        self.data
            .object
            .metadata
            .get("invoiceId")
            .or_else(|| self.data.object.metadata.get("invoice_id"))
            .and_then(|v| Uuid::parse_str(v).ok())
    }

    pub fn received_amount(&self) -> i64 {
        self.data
            .object
            .amount_received
            .unwrap_or(self.data.object.amount)
    }
}

/// One row per provider event id; its presence means the event was handled.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProcessedPaymentEvent {
    pub event_id: String,
    pub event_type: String,
    pub invoice_id: Option<Uuid>,
    pub amount_minor_units: i64,
    pub outcome: String,
    pub received_utc: DateTime<Utc>,
}

/// Payment to apply against an invoice.
#[derive(Debug, Clone)]
pub struct PaymentApplication {
    pub event_id: String,
    pub event_type: String,
    pub invoice_id: Uuid,
    pub amount_minor_units: i64,
    pub provider_payment_id: String,
    pub payment_method: String,
    pub received_utc: DateTime<Utc>,
}

/// Result of applying a payment.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// Amount added; the invoice as it now stands.
    Applied(Invoice),
    /// This event id was already handled.
    Duplicate,
    InvoiceNotFound,
    /// The invoice was already PAID or CANCELLED; only the event was recorded.
    NotPayable(Invoice),
}

impl PaymentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentOutcome::Applied(_) => "applied",
            PaymentOutcome::Duplicate => "duplicate",
            PaymentOutcome::InvoiceNotFound => "invoice_not_found",
            PaymentOutcome::NotPayable(_) => "not_payable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_envelope() {
        let invoice_id = Uuid::new_v4();
        let body = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_1",
                "amount": 150000,
                "currency": "gbp",
                "metadata": { "invoiceId": invoice_id.to_string() }
            }}
        });
        let event: PaymentEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event_type, PAYMENT_SUCCEEDED);
        assert_eq!(event.invoice_id(), Some(invoice_id));
        assert_eq!(event.received_amount(), 150000);
    }

    #[test]
    fn received_amount_prefers_captured_value() {
        let body = serde_json::json!({
            "id": "evt_2",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_2", "amount": 1000, "amount_received": 400 } }
        });
        let event: PaymentEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.received_amount(), 400);
        assert_eq!(event.invoice_id(), None);
    }
}
