//! Applies payment provider webhook events to invoices.

use crate::models::{
    PaymentApplication, PaymentOutcome, ProcessedPaymentEvent, PAYMENT_FAILED, PAYMENT_SUCCEEDED,
};
use crate::services::metrics::PAYMENT_EVENTS_TOTAL;
use crate::services::payments::PaymentsClient;
use crate::services::repository::Repository;
use chrono::Utc;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const CARD_PAYMENT_METHOD: &str = "card";

/// What the listener did with an event; returned to the provider as the
/// acknowledgement body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventAck {
    pub received: bool,
    pub outcome: &'static str,
}

impl EventAck {
    fn new(outcome: &'static str) -> Self {
        Self {
            received: true,
            outcome,
        }
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    repo: Arc<dyn Repository>,
    payments: PaymentsClient,
}

impl PaymentReconciler {
    pub fn new(repo: Arc<dyn Repository>, payments: PaymentsClient) -> Self {
        Self { repo, payments }
    }

    /// Verify and apply one webhook delivery. Nothing is read or written
    /// before the signature checks out.
    #[instrument(skip(self, raw_body, signature_header))]
    pub async fn on_payment_event(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<EventAck, AppError> {
        let header = signature_header.ok_or_else(|| {
            PAYMENT_EVENTS_TOTAL
                .with_label_values(&["unknown", "rejected"])
                .inc();
            AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature"))
        })?;

        if let Err(e) = self
            .payments
            .verify_webhook_signature(raw_body, header, Utc::now().timestamp())
        {
            PAYMENT_EVENTS_TOTAL
                .with_label_values(&["unknown", "rejected"])
                .inc();
            return Err(e.into());
        }

        let event = self.payments.parse_webhook_event(raw_body)?;
        let received_utc = Utc::now();

        let outcome = match event.event_type.as_str() {
            PAYMENT_SUCCEEDED => {
                let Some(invoice_id) = event.invoice_id() else {
                    warn!(event_id = %event.id, "Payment event carries no invoice reference");
                    self.record_only(&event, None, "no_invoice_reference").await?;
                    return Ok(self.ack(&event.event_type, "no_invoice_reference"));
                };

                let application = PaymentApplication {
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                    invoice_id,
                    amount_minor_units: event.received_amount(),
                    provider_payment_id: event.data.object.id.clone(),
                    payment_method: CARD_PAYMENT_METHOD.to_string(),
                    received_utc,
                };

                match self.repo.apply_payment(&application).await? {
                    PaymentOutcome::Applied(invoice) => {
                        info!(
                            event_id = %event.id,
                            invoice_id = %invoice.id,
                            amount = application.amount_minor_units,
                            amount_paid = invoice.amount_paid_minor_units,
                            status = invoice.status.as_str(),
                            "Payment applied to invoice"
                        );
                        "applied"
                    }
                    PaymentOutcome::Duplicate => {
                        info!(event_id = %event.id, "Duplicate payment event ignored");
                        "duplicate"
                    }
                    PaymentOutcome::InvoiceNotFound => {
                        warn!(event_id = %event.id, invoice_id = %invoice_id, "Payment for unknown invoice");
                        "invoice_not_found"
                    }
                    PaymentOutcome::NotPayable(invoice) => {
                        warn!(
                            event_id = %event.id,
                            invoice_id = %invoice.id,
                            status = invoice.status.as_str(),
                            "Payment received for invoice that is not payable"
                        );
                        "not_payable"
                    }
                }
            }
            PAYMENT_FAILED => {
                let reason = event
                    .data
                    .object
                    .last_payment_error
                    .as_ref()
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown");
                warn!(
                    event_id = %event.id,
                    invoice_id = ?event.invoice_id(),
                    reason = %reason,
                    "Payment failed"
                );
                if self
                    .record_only(&event, event.invoice_id(), "payment_failed")
                    .await?
                {
                    "payment_failed"
                } else {
                    "duplicate"
                }
            }
            other => {
                info!(event_id = %event.id, event_type = %other, "Ignoring unhandled event type");
                "ignored"
            }
        };

        Ok(self.ack(&event.event_type, outcome))
    }

    async fn record_only(
        &self,
        event: &crate::models::PaymentEvent,
        invoice_id: Option<uuid::Uuid>,
        outcome: &str,
    ) -> Result<bool, AppError> {
        self.repo
            .record_payment_event(&ProcessedPaymentEvent {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                invoice_id,
                amount_minor_units: event.received_amount(),
                outcome: outcome.to_string(),
                received_utc: Utc::now(),
            })
            .await
    }

    fn ack(&self, event_type: &str, outcome: &'static str) -> EventAck {
        PAYMENT_EVENTS_TOTAL
            .with_label_values(&[event_type, outcome])
            .inc();
        EventAck::new(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentsConfig;
    use crate::models::{InvoiceStatus, NewInvoice, NewInvoiceItem};
    use crate::services::repository::InMemoryRepository;
    use secrecy::Secret;
    use service_core::utils::signature::hmac_sha256_hex;
    use std::time::Duration;
    use uuid::Uuid;

    fn reconciler(repo: Arc<InMemoryRepository>) -> PaymentReconciler {
        let payments = PaymentsClient::new(PaymentsConfig {
            api_base_url: "https://payments.example.test/v1".to_string(),
            secret_key: Secret::new("sk_test".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            webhook_tolerance_secs: 300,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();
        PaymentReconciler::new(repo, payments)
    }

    fn signed(body: &str) -> String {
        let t = Utc::now().timestamp();
        let sig = hmac_sha256_hex(b"whsec_test", format!("{}.{}", t, body).as_bytes()).unwrap();
        format!("t={},v1={}", t, sig)
    }

    fn event(id: &str, kind: &str, invoice_id: Uuid, amount: i64) -> String {
        serde_json::json!({
            "id": id,
            "type": kind,
            "data": { "object": {
                "id": format!("pi_{}", id),
                "amount": amount,
                "metadata": { "invoiceId": invoice_id.to_string() }
            }}
        })
        .to_string()
    }

    async fn seeded_invoice(repo: &InMemoryRepository, total: i64) -> Uuid {
        let invoice = NewInvoice {
            id: Uuid::new_v4(),
            invoice_number: "INV-2026-001".to_string(),
            client_id: Uuid::new_v4(),
            inquiry_id: None,
            legal_document_id: None,
            currency: "gbp".to_string(),
            issue_date: Utc::now().date_naive(),
            due_date: Utc::now().date_naive(),
            items: vec![NewInvoiceItem {
                description: "Business project".to_string(),
                quantity: 1,
                unit_price_minor_units: total,
            }],
            created_utc: Utc::now(),
        }
        .into_invoice();
        let id = invoice.id;
        repo.insert_invoice(invoice).await;
        id
    }

    #[tokio::test]
    async fn unsigned_event_changes_nothing() {
        let repo = Arc::new(InMemoryRepository::new());
        let invoice_id = seeded_invoice(&repo, 150000).await;
        let r = reconciler(repo.clone());
        let body = event("evt_1", PAYMENT_SUCCEEDED, invoice_id, 150000);

        assert!(r.on_payment_event(body.as_bytes(), None).await.is_err());
        let bad = "t=1,v1=00".to_string();
        assert!(r.on_payment_event(body.as_bytes(), Some(&bad)).await.is_err());

        let invoice = repo.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.amount_paid_minor_units, 0);
        assert!(repo.payment_events().await.is_empty());
    }

    #[tokio::test]
    async fn full_payment_marks_paid_and_duplicate_is_ignored() {
        let repo = Arc::new(InMemoryRepository::new());
        let invoice_id = seeded_invoice(&repo, 150000).await;
        let r = reconciler(repo.clone());
        let body = event("evt_1", PAYMENT_SUCCEEDED, invoice_id, 200000);

        let ack = r.on_payment_event(body.as_bytes(), Some(&signed(&body))).await.unwrap();
        assert_eq!(ack.outcome, "applied");
        let ack = r.on_payment_event(body.as_bytes(), Some(&signed(&body))).await.unwrap();
        assert_eq!(ack.outcome, "duplicate");

        let invoice = repo.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.amount_paid_minor_units, 150000);
        assert_eq!(invoice.payment_method.as_deref(), Some("card"));
        assert_eq!(invoice.payment_reference.as_deref(), Some("pi_evt_1"));
    }

    #[tokio::test]
    async fn part_payment_leaves_unpaid_and_paid_is_never_regressed() {
        let repo = Arc::new(InMemoryRepository::new());
        let invoice_id = seeded_invoice(&repo, 150000).await;
        let r = reconciler(repo.clone());

        let first = event("evt_1", PAYMENT_SUCCEEDED, invoice_id, 50000);
        r.on_payment_event(first.as_bytes(), Some(&signed(&first))).await.unwrap();
        let invoice = repo.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Unpaid);
        assert_eq!(invoice.amount_paid_minor_units, 50000);

        let second = event("evt_2", PAYMENT_SUCCEEDED, invoice_id, 100000);
        r.on_payment_event(second.as_bytes(), Some(&signed(&second))).await.unwrap();
        let third = event("evt_3", PAYMENT_SUCCEEDED, invoice_id, 100000);
        let ack = r.on_payment_event(third.as_bytes(), Some(&signed(&third))).await.unwrap();
        assert_eq!(ack.outcome, "not_payable");

        let invoice = repo.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.amount_paid_minor_units, 150000);
        assert_eq!(invoice.payment_reference.as_deref(), Some("pi_evt_2"));
    }

    #[tokio::test]
    async fn failed_and_unknown_events_do_not_touch_invoice() {
        let repo = Arc::new(InMemoryRepository::new());
        let invoice_id = seeded_invoice(&repo, 150000).await;
        let r = reconciler(repo.clone());

        let failed = event("evt_f", PAYMENT_FAILED, invoice_id, 150000);
        let ack = r.on_payment_event(failed.as_bytes(), Some(&signed(&failed))).await.unwrap();
        assert_eq!(ack.outcome, "payment_failed");

        let other = event("evt_o", "charge.refunded", invoice_id, 150000);
        let ack = r.on_payment_event(other.as_bytes(), Some(&signed(&other))).await.unwrap();
        assert_eq!(ack.outcome, "ignored");

        let invoice = repo.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.amount_paid_minor_units, 0);
        assert_eq!(invoice.status, InvoiceStatus::Unpaid);
    }
}
