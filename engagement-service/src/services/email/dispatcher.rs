use super::providers::{Attachment, EmailMessage, EmailProvider, ProviderError};
use super::templates::EmailTemplate;
use crate::services::metrics::EMAILS_TOTAL;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No recipient address")]
    MissingRecipient,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Email provider did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MissingRecipient => {
                AppError::BadRequest(anyhow::anyhow!("Client has no email address"))
            }
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub provider_id: Option<String>,
}

/// Sends one templated email per call. Each send is bounded by
/// `send_timeout` and never retried; spacing between related emails comes
/// from the outbox schedule, not from here.
#[derive(Clone)]
pub struct NotificationDispatcher {
    provider: Arc<dyn EmailProvider>,
    business_name: String,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(provider: Arc<dyn EmailProvider>, business_name: String, send_timeout: Duration) -> Self {
        Self {
            provider,
            business_name,
            send_timeout,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmailProvider> {
        &self.provider
    }

    #[instrument(skip(self, template, cc, attachments), fields(template = template.name()))]
    pub async fn send(
        &self,
        template: &EmailTemplate,
        recipient: &str,
        cc: &[String],
        attachments: Vec<Attachment>,
    ) -> Result<DispatchReceipt, DispatchError> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            EMAILS_TOTAL
                .with_label_values(&[template.name(), "failed"])
                .inc();
            return Err(DispatchError::MissingRecipient);
        }

        let rendered = template.render(&self.business_name);
        let message = EmailMessage {
            to: recipient.to_string(),
            cc: cc.to_vec(),
            subject: rendered.subject,
            body_text: Some(rendered.text),
            body_html: Some(rendered.html),
            from_name: Some(self.business_name.clone()),
            reply_to: None,
            attachments,
        };

        match tokio::time::timeout(self.send_timeout, self.provider.send(&message)).await {
            Ok(Ok(response)) => {
                EMAILS_TOTAL
                    .with_label_values(&[template.name(), "sent"])
                    .inc();
                info!(
                    provider_id = ?response.provider_id,
                    subject = %message.subject,
                    "Email dispatched"
                );
                Ok(DispatchReceipt {
                    provider_id: response.provider_id,
                })
            }
            Ok(Err(e)) => {
                EMAILS_TOTAL
                    .with_label_values(&[template.name(), "failed"])
                    .inc();
                warn!(error = %e, "Email provider rejected message");
                Err(DispatchError::Provider(e))
            }
            Err(_) => {
                EMAILS_TOTAL
                    .with_label_values(&[template.name(), "timeout"])
                    .inc();
                warn!(timeout = ?self.send_timeout, "Email send timed out");
                Err(DispatchError::Timeout(self.send_timeout))
            }
        }
    }
}
