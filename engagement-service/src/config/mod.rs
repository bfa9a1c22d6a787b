use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngagementConfig {
    pub common: core_config::Config,
    /// Base URL used when building links that go out in emails.
    pub public_base_url: String,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub payments: PaymentsConfig,
    pub security: SecurityConfig,
    pub business: BusinessProfile,
    pub workflow: WorkflowConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// When unset the service runs on the in-memory repository (dev only).
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub api_base_url: String,
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    /// Maximum age of a signed webhook timestamp.
    pub webhook_tolerance_secs: i64,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Shared secret carried in the admin session cookie.
    pub admin_password: Secret<String>,
    /// Key for accept-quote capability tokens. Rotating it invalidates all
    /// outstanding quote links.
    pub accept_token_secret: Secret<String>,
}

/// Who the documents are issued by.
#[derive(Debug, Clone)]
pub struct BusinessProfile {
    pub name: String,
    pub email: String,
    pub admin_email: String,
    pub address: String,
    pub governing_law: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub signing_link_delay: Duration,
    pub invoice_notice_delay: Duration,
    pub invoice_dispatch_delay: Duration,
    pub invoice_due_days: i64,
    pub email_send_timeout: Duration,
    pub render_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// How long a claimed job stays invisible to other workers.
    pub lease: Duration,
    /// Reclaims allowed after a worker dies mid-job.
    pub max_attempts: i32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            signing_link_delay: Duration::from_secs(2),
            invoice_notice_delay: Duration::from_secs(2),
            invoice_dispatch_delay: Duration::from_secs(3),
            invoice_due_days: 30,
            email_send_timeout: Duration::from_secs(15),
            render_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_millis(1000),
            batch_size: 20,
            lease: Duration::from_secs(300),
            max_attempts: 3,
        }
    }
}

impl EngagementConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let workflow_defaults = WorkflowConfig::default();
        let outbox_defaults = OutboxConfig::default();

        Ok(EngagementConfig {
            common: common_config,
            public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:8080"), is_prod)?
                .trim_end_matches('/')
                .to_string(),
            database: DatabaseConfig {
                url: if is_prod {
                    Some(Secret::new(get_env("DATABASE_URL", None, is_prod)?))
                } else {
                    env::var("DATABASE_URL").ok().map(Secret::new)
                },
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1),
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", 587),
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Studio"), is_prod)?,
                enabled: parse_env("SMTP_ENABLED", false),
            },
            payments: PaymentsConfig {
                api_base_url: get_env(
                    "PAYMENTS_API_BASE_URL",
                    Some("https://api.stripe.com/v1"),
                    is_prod,
                )?,
                secret_key: Secret::new(get_env("PAYMENTS_SECRET_KEY", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env(
                    "PAYMENTS_WEBHOOK_SECRET",
                    Some("whsec_dev"),
                    is_prod,
                )?),
                webhook_tolerance_secs: parse_env("PAYMENTS_WEBHOOK_TOLERANCE_SECS", 300),
                request_timeout: Duration::from_secs(parse_env("PAYMENTS_TIMEOUT_SECS", 10)),
            },
            security: SecurityConfig {
                admin_password: Secret::new(get_env(
                    "ADMIN_PASSWORD",
                    Some("dev-admin-password"),
                    is_prod,
                )?),
                accept_token_secret: Secret::new(get_env(
                    "ACCEPT_TOKEN_SECRET",
                    Some("dev-accept-token-secret"),
                    is_prod,
                )?),
            },
            business: BusinessProfile {
                name: get_env("BUSINESS_NAME", Some("Studio"), is_prod)?,
                email: get_env("BUSINESS_EMAIL", Some("hello@example.com"), is_prod)?,
                admin_email: get_env("ADMIN_EMAIL", Some("admin@example.com"), is_prod)?,
                address: get_env("BUSINESS_ADDRESS", Some(""), is_prod)?.replace("\\n", "\n"),
                governing_law: get_env("GOVERNING_LAW", Some("England and Wales"), is_prod)?,
                currency: get_env("CURRENCY", Some("gbp"), is_prod)?.to_ascii_lowercase(),
            },
            workflow: WorkflowConfig {
                signing_link_delay: secs_env(
                    "SIGNING_LINK_DELAY_SECS",
                    workflow_defaults.signing_link_delay,
                ),
                invoice_notice_delay: secs_env(
                    "INVOICE_NOTICE_DELAY_SECS",
                    workflow_defaults.invoice_notice_delay,
                ),
                invoice_dispatch_delay: secs_env(
                    "INVOICE_DISPATCH_DELAY_SECS",
                    workflow_defaults.invoice_dispatch_delay,
                ),
                invoice_due_days: parse_env("INVOICE_DUE_DAYS", workflow_defaults.invoice_due_days),
                email_send_timeout: secs_env(
                    "EMAIL_SEND_TIMEOUT_SECS",
                    workflow_defaults.email_send_timeout,
                ),
                render_timeout: secs_env("RENDER_TIMEOUT_SECS", workflow_defaults.render_timeout),
            },
            outbox: OutboxConfig {
                enabled: parse_env("OUTBOX_ENABLED", outbox_defaults.enabled),
                poll_interval: Duration::from_millis(parse_env(
                    "OUTBOX_POLL_INTERVAL_MS",
                    outbox_defaults.poll_interval.as_millis() as u64,
                )),
                batch_size: parse_env("OUTBOX_BATCH_SIZE", outbox_defaults.batch_size),
                lease: secs_env("OUTBOX_LEASE_SECS", outbox_defaults.lease),
                max_attempts: parse_env("OUTBOX_MAX_ATTEMPTS", outbox_defaults.max_attempts),
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Optional tunable: falls back to `default` when unset or unparseable.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_env(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_env(key, default.as_secs()))
}
