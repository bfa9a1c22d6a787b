use crate::config::EngagementConfig;
use crate::handlers;
use crate::middleware::admin_session_middleware;
use crate::services::documents::{HtmlPrintRenderer, PrintRenderer};
use crate::services::{
    Database, EmailProvider, InMemoryRepository, MockEmailProvider, NotificationDispatcher,
    PaymentReconciler, PaymentsClient, Repository, SmtpProvider, WorkflowOrchestrator,
};
use crate::workers::OutboxWorker;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, security_headers_middleware};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngagementConfig>,
    pub repo: Arc<dyn Repository>,
    pub workflow: WorkflowOrchestrator,
    pub reconciler: PaymentReconciler,
}

/// Everything the application is assembled from. Tests build this by hand
/// to swap in the in-memory repository and the mock email provider.
pub struct Dependencies {
    pub repo: Arc<dyn Repository>,
    pub email: Arc<dyn EmailProvider>,
    pub renderer: Arc<dyn PrintRenderer>,
}

pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/inquiries/:id/send-quote",
            post(handlers::quotes::send_quote),
        )
        .route(
            "/admin/legal-documents",
            post(handlers::documents::create_legal_document),
        )
        .route(
            "/admin/legal-documents/:id/send",
            post(handlers::documents::send_legal_document),
        )
        .route(
            "/admin/legal-documents/:id/printable",
            get(handlers::documents::printable_agreement),
        )
        .route("/admin/invoices", get(handlers::invoices::list_invoices))
        .route("/admin/invoices/:id", get(handlers::invoices::get_invoice))
        .route(
            "/admin/invoices/:id/status",
            patch(handlers::invoices::update_invoice_status),
        )
        .route(
            "/admin/invoices/:id/send",
            post(handlers::invoices::send_invoice),
        )
        .route(
            "/admin/invoices/:id/printable",
            get(handlers::invoices::printable_invoice),
        )
        .layer(from_fn_with_state(state.clone(), admin_session_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/accept-quote", get(handlers::quotes::accept_quote))
        .route(
            "/legal-documents/:id",
            get(handlers::documents::public_legal_document),
        )
        .route(
            "/sign-document/:id",
            post(handlers::documents::sign_document),
        )
        .route(
            "/invoices/:id/payment-intent",
            post(handlers::invoices::create_payment_intent),
        )
        .route(
            "/payment-webhook",
            post(handlers::webhooks::payment_webhook),
        )
        .merge(admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(service_core::middleware::REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
    outbox: OutboxWorker,
    shutdown: CancellationToken,
}

impl Application {
    /// Wire production dependencies from configuration: PostgreSQL when a
    /// database URL is set, SMTP when enabled.
    pub async fn build(config: EngagementConfig) -> Result<Self, AppError> {
        let repo: Arc<dyn Repository> = match &config.database.url {
            Some(url) => {
                let db = Database::new(
                    url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to PostgreSQL: {}", e);
                    e
                })?;
                db.run_migrations().await?;
                Arc::new(db)
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory repository");
                Arc::new(InMemoryRepository::new())
            }
        };

        let email: Arc<dyn EmailProvider> = if config.smtp.enabled {
            Arc::new(SmtpProvider::new(config.smtp.clone()).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("SMTP provider: {}", e))
            })?)
        } else {
            tracing::warn!("SMTP disabled; outgoing emails are only logged");
            Arc::new(MockEmailProvider::new(true))
        };

        let deps = Dependencies {
            repo,
            email,
            renderer: Arc::new(HtmlPrintRenderer),
        };

        Self::build_with_dependencies(config, deps).await
    }

    pub async fn build_with_dependencies(
        config: EngagementConfig,
        deps: Dependencies,
    ) -> Result<Self, AppError> {
        let payments = PaymentsClient::new(config.payments.clone())?;
        if !payments.is_configured() {
            tracing::warn!("Payment provider secret key not set; payment intents are disabled");
        }

        let dispatcher = NotificationDispatcher::new(
            deps.email,
            config.business.name.clone(),
            config.workflow.email_send_timeout,
        );
        let workflow = WorkflowOrchestrator::new(
            deps.repo.clone(),
            dispatcher,
            deps.renderer,
            payments.clone(),
            &config,
        );
        let reconciler = PaymentReconciler::new(deps.repo.clone(), payments);
        let outbox = OutboxWorker::new(config.outbox.clone(), deps.repo.clone(), workflow.clone());

        let state = AppState {
            config: Arc::new(config.clone()),
            repo: deps.repo,
            workflow,
            reconciler,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let shutdown = CancellationToken::new();
        let server = axum::serve(listener, router(state.clone()))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
            outbox,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn outbox_worker(&self) -> OutboxWorker {
        self.outbox.clone()
    }

    /// Cancelling this token stops the HTTP server and the outbox worker.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let worker = tokio::spawn(self.outbox.start(self.shutdown.clone()));
        let result = self.server.await;
        self.shutdown.cancel();
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Outbox worker task failed");
        }
        result
    }
}
