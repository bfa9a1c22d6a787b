#![allow(dead_code)]

pub mod faulty;

use chrono::Utc;
use engagement_service::config::{
    BusinessProfile, DatabaseConfig, EngagementConfig, OutboxConfig, PaymentsConfig,
    SecurityConfig, SmtpConfig, WorkflowConfig,
};
use engagement_service::models::{Client, Inquiry, InquiryStatus, Timeline};
use engagement_service::services::documents::HtmlPrintRenderer;
use engagement_service::services::{
    InMemoryRepository, MockEmailProvider, Repository, TokenVerifier,
};
use engagement_service::startup::{Application, Dependencies};
use engagement_service::workers::OutboxWorker;
use secrecy::Secret;
use service_core::utils::signature::hmac_sha256_hex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const ADMIN_PASSWORD: &str = "test-admin-password";
pub const ACCEPT_TOKEN_SECRET: &str = "test-accept-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const ADMIN_EMAIL: &str = "owner@studio.test";
pub const CLIENT_EMAIL: &str = "a@acme.test";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub repo: Arc<InMemoryRepository>,
    pub email: Arc<MockEmailProvider>,
    pub outbox: OutboxWorker,
    pub tokens: TokenVerifier,
    pub client: reqwest::Client,
}

pub fn test_config(payments_base_url: &str) -> EngagementConfig {
    EngagementConfig {
        common: service_core::config::Config {
            port: 0,
            log_level: "warn".to_string(),
            otlp_endpoint: None,
        },
        public_base_url: "https://studio.test".to_string(),
        database: DatabaseConfig {
            url: None,
            max_connections: 1,
            min_connections: 1,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 25,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "noreply@studio.test".to_string(),
            from_name: "Studio".to_string(),
            enabled: false,
        },
        payments: PaymentsConfig {
            api_base_url: payments_base_url.to_string(),
            secret_key: Secret::new("sk_test".to_string()),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            webhook_tolerance_secs: 300,
            request_timeout: Duration::from_secs(5),
        },
        security: SecurityConfig {
            admin_password: Secret::new(ADMIN_PASSWORD.to_string()),
            accept_token_secret: Secret::new(ACCEPT_TOKEN_SECRET.to_string()),
        },
        business: BusinessProfile {
            name: "Studio".to_string(),
            email: "hello@studio.test".to_string(),
            admin_email: ADMIN_EMAIL.to_string(),
            address: "2 Lane\nCity".to_string(),
            governing_law: "England and Wales".to_string(),
            currency: "gbp".to_string(),
        },
        workflow: WorkflowConfig {
            signing_link_delay: Duration::ZERO,
            invoice_notice_delay: Duration::ZERO,
            invoice_dispatch_delay: Duration::ZERO,
            ..WorkflowConfig::default()
        },
        // Tests drive the worker by hand through `run_outbox`.
        outbox: OutboxConfig {
            enabled: false,
            ..OutboxConfig::default()
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_payments("http://127.0.0.1:9/v1").await
    }

    pub async fn spawn_with_payments(payments_base_url: &str) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        Self::build(payments_base_url, repo.clone(), repo).await
    }

    /// Serves through `store`, which must keep its data in `repo` so the
    /// inspection helpers below see every write.
    pub async fn spawn_with_repository(
        store: Arc<dyn Repository>,
        repo: Arc<InMemoryRepository>,
    ) -> Self {
        Self::build("http://127.0.0.1:9/v1", store, repo).await
    }

    async fn build(
        payments_base_url: &str,
        store: Arc<dyn Repository>,
        repo: Arc<InMemoryRepository>,
    ) -> Self {
        let config = test_config(payments_base_url);
        let email = Arc::new(MockEmailProvider::new(true));

        let app = Application::build_with_dependencies(
            config,
            Dependencies {
                repo: store,
                email: email.clone(),
                renderer: Arc::new(HtmlPrintRenderer),
            },
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let outbox = app.outbox_worker();
        tokio::spawn(app.run_until_stopped());

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            port,
            repo,
            email,
            outbox,
            tokens: TokenVerifier::new(Secret::new(ACCEPT_TOKEN_SECRET.to_string())),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub fn admin_cookie(&self) -> String {
        format!("admin_session={}", ADMIN_PASSWORD)
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("cookie", self.admin_cookie())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("cookie", self.admin_cookie())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_patch(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .header("cookie", self.admin_cookie())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn accept_quote(&self, inquiry_id: Uuid, token: &str) -> reqwest::Response {
        self.client
            .get(self.url("/accept-quote"))
            .query(&[("id", inquiry_id.to_string()), ("token", token.to_string())])
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn sign_document(&self, document_id: Uuid, signature: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/sign-document/{}", document_id)))
            .json(&serde_json::json!({ "signature": signature }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_webhook(&self, body: &str, signature: Option<String>) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/payment-webhook"))
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(signature) = signature {
            request = request.header("payments-signature", signature);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn run_outbox(&self) -> usize {
        self.outbox
            .run_due_jobs()
            .await
            .expect("Outbox run failed")
    }

    /// Client "Acme Ltd" with a QUOTED inquiry for a £1500.00 business
    /// project on a normal timeline.
    pub async fn seed_quoted_inquiry(&self) -> (Inquiry, Client) {
        let now = Utc::now();
        let client = Client {
            id: Uuid::new_v4(),
            name: "Alex Example".to_string(),
            company: Some("Acme Ltd".to_string()),
            emails: vec![CLIENT_EMAIL.to_string()],
            address: Some("1 Road\nTown".to_string()),
            created_utc: now,
        };
        let inquiry = Inquiry {
            id: Uuid::new_v4(),
            name: "Alex Example".to_string(),
            email: CLIENT_EMAIL.to_string(),
            company: Some("Acme Ltd".to_string()),
            project_type: "business".to_string(),
            goal: Some("More bookings".to_string()),
            requirements: None,
            timeline: Timeline::Normal,
            status: InquiryStatus::Quoted,
            final_price_minor_units: Some(150000),
            quoted_at: Some(now),
            converted_to_client_id: Some(client.id),
            created_utc: now,
            updated_utc: now,
        };
        self.repo.insert_client(client.clone()).await;
        self.repo.insert_inquiry(inquiry.clone()).await;
        (inquiry, client)
    }

    pub async fn inquiry(&self, inquiry_id: Uuid) -> Inquiry {
        self.repo
            .get_inquiry(inquiry_id)
            .await
            .expect("Failed to read inquiry")
            .expect("Inquiry missing")
    }

    pub fn accept_token(&self, inquiry_id: Uuid) -> String {
        self.tokens
            .token_for(inquiry_id)
            .expect("Failed to derive token")
    }
}

pub fn sign_webhook(body: &str) -> String {
    let t = Utc::now().timestamp();
    let sig = hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), format!("{}.{}", t, body).as_bytes())
        .expect("Failed to sign webhook");
    format!("t={},v1={}", t, sig)
}

pub fn payment_succeeded(event_id: &str, invoice_id: Uuid, amount: i64) -> String {
    serde_json::json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": format!("pi_{}", event_id),
            "amount": amount,
            "amount_received": amount,
            "currency": "gbp",
            "metadata": { "invoiceId": invoice_id.to_string() }
        }}
    })
    .to_string()
}
