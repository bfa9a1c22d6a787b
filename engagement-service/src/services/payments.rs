//! Card payment provider client.
//!
//! Creates payment intents for invoices and verifies the signed webhook
//! deliveries the provider sends back.

use crate::config::PaymentsConfig;
use crate::models::PaymentEvent;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::utils::signature::verify_hmac_hex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentsError {
    #[error("Payment provider credentials not configured")]
    NotConfigured,

    #[error("Payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment provider error: {code} - {message}")]
    Provider { code: String, message: String },

    #[error("Malformed payment provider payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Missing or malformed signature header")]
    MalformedSignature,

    #[error("Signature timestamp outside tolerance")]
    StaleSignature,

    #[error("Signature mismatch")]
    InvalidSignature,
}

impl From<PaymentsError> for AppError {
    fn from(err: PaymentsError) -> Self {
        match err {
            PaymentsError::MalformedSignature
            | PaymentsError::StaleSignature
            | PaymentsError::InvalidSignature => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature"))
            }
            PaymentsError::Payload(e) => {
                AppError::BadRequest(anyhow::anyhow!("Invalid event payload: {}", e))
            }
            PaymentsError::NotConfigured => AppError::ServiceUnavailable,
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

/// Payment intent as returned to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parsed `t=<unix>,v1=<hex>` header. Several `v1` entries may be present
/// while the provider rolls its secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, PaymentsError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| PaymentsError::MalformedSignature)?,
                    )
                }
                "v1" if !value.is_empty() => signatures.push(value.to_string()),
                _ => {}
            }
        }
        match (timestamp, signatures.is_empty()) {
            (Some(timestamp), false) => Ok(Self {
                timestamp,
                signatures,
            }),
            _ => Err(PaymentsError::MalformedSignature),
        }
    }
}

#[derive(Clone)]
pub struct PaymentsClient {
    client: Client,
    config: PaymentsConfig,
}

impl PaymentsClient {
    pub fn new(config: PaymentsConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Create a payment intent for `amount_minor_units`, tagged with the
    /// invoice it settles.
    #[tracing::instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn create_payment_intent(
        &self,
        amount_minor_units: i64,
        currency: &str,
        invoice_id: Uuid,
        invoice_number: &str,
    ) -> Result<PaymentIntent, PaymentsError> {
        if !self.is_configured() {
            return Err(PaymentsError::NotConfigured);
        }

        let url = format!(
            "{}/payment_intents",
            self.config.api_base_url.trim_end_matches('/')
        );
        let form = [
            ("amount", amount_minor_units.to_string()),
            ("currency", currency.to_ascii_lowercase()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[invoiceId]", invoice_id.to_string()),
            ("metadata[invoiceNumber]", invoice_number.to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .header("Idempotency-Key", format!("invoice-{}-{}", invoice_id, amount_minor_units))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Payment provider create_payment_intent response");

        if status.is_success() {
            let intent: PaymentIntent = serde_json::from_str(&body)?;
            tracing::info!(
                payment_intent_id = %intent.id,
                amount = amount_minor_units,
                "Payment intent created"
            );
            Ok(intent)
        } else {
            let detail = serde_json::from_str::<ProviderErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(ProviderErrorDetail {
                    code: None,
                    message: None,
                });
            let err = PaymentsError::Provider {
                code: detail.code.unwrap_or_else(|| status.as_u16().to_string()),
                message: detail
                    .message
                    .unwrap_or_else(|| "unexpected response".to_string()),
            };
            tracing::error!(error = %err, "Payment intent creation failed");
            Err(err)
        }
    }

    /// Verify a webhook delivery. The signed payload is `"<t>.<raw body>"`.
    pub fn verify_webhook_signature(
        &self,
        body: &[u8],
        header: &str,
        now_unix: i64,
    ) -> Result<(), PaymentsError> {
        let parsed = SignatureHeader::parse(header)?;

        let tolerance = u64::try_from(self.config.webhook_tolerance_secs).unwrap_or(0);
        if now_unix.abs_diff(parsed.timestamp) > tolerance {
            tracing::warn!(
                timestamp = parsed.timestamp,
                "Webhook signature timestamp outside tolerance"
            );
            return Err(PaymentsError::StaleSignature);
        }

        let mut signed = format!("{}.", parsed.timestamp).into_bytes();
        signed.extend_from_slice(body);
        let secret = self.config.webhook_secret.expose_secret().as_bytes();

        for candidate in &parsed.signatures {
            let valid = verify_hmac_hex(secret, &signed, candidate)
                .map_err(|_| PaymentsError::InvalidSignature)?;
            if valid {
                return Ok(());
            }
        }

        tracing::warn!("Webhook signature verification failed");
        Err(PaymentsError::InvalidSignature)
    }

    pub fn parse_webhook_event(&self, body: &[u8]) -> Result<PaymentEvent, PaymentsError> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use service_core::utils::signature::hmac_sha256_hex;
    use std::time::Duration;

    fn config() -> PaymentsConfig {
        PaymentsConfig {
            api_base_url: "https://payments.example.test/v1".to_string(),
            secret_key: Secret::new("sk_test".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            webhook_tolerance_secs: 300,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn sign(body: &[u8], t: i64) -> String {
        let mut payload = format!("{}.", t).into_bytes();
        payload.extend_from_slice(body);
        format!("t={},v1={}", t, hmac_sha256_hex(b"whsec_test", &payload).unwrap())
    }

    #[test]
    fn parses_signature_header() {
        let parsed = SignatureHeader::parse("t=1700000000, v1=abc,v0=old,v1=def").unwrap();
        assert_eq!(parsed.timestamp, 1700000000);
        assert_eq!(parsed.signatures, vec!["abc".to_string(), "def".to_string()]);
        assert!(SignatureHeader::parse("v1=abc").is_err());
        assert!(SignatureHeader::parse("t=abc,v1=abc").is_err());
        assert!(SignatureHeader::parse("").is_err());
    }

    #[test]
    fn accepts_valid_signature() {
        let client = PaymentsClient::new(config()).unwrap();
        let body = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        assert!(client.verify_webhook_signature(body, &sign(body, now), now + 10).is_ok());
    }

    #[test]
    fn rejects_tampered_body_and_stale_timestamp() {
        let client = PaymentsClient::new(config()).unwrap();
        let body = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(body, now);

        assert!(matches!(
            client.verify_webhook_signature(br#"{"id":"evt_2"}"#, &header, now),
            Err(PaymentsError::InvalidSignature)
        ));
        assert!(matches!(
            client.verify_webhook_signature(body, &header, now + 301),
            Err(PaymentsError::StaleSignature)
        ));
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        let client = PaymentsClient::new(config()).unwrap();
        let body = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;

        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", t);
            assert!(matches!(
                client.verify_webhook_signature(body, &header, now),
                Err(PaymentsError::StaleSignature)
            ));
        }
        assert!(matches!(
            client.verify_webhook_signature(body, "t=-9223372036854775808,v1=00", i64::MAX),
            Err(PaymentsError::StaleSignature)
        ));
    }

    #[test]
    fn signature_errors_become_unauthorized() {
        let err: AppError = PaymentsError::InvalidSignature.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
