pub mod database;
pub mod documents;
pub mod email;
pub mod metrics;
pub mod numbering;
pub mod payments;
pub mod reconciliation;
pub mod repository;
pub mod tokens;
pub mod workflow;

pub use database::Database;
pub use email::{EmailProvider, MockEmailProvider, NotificationDispatcher, SmtpProvider};
pub use payments::PaymentsClient;
pub use reconciliation::PaymentReconciler;
pub use repository::{InMemoryRepository, Repository};
pub use tokens::TokenVerifier;
pub use workflow::WorkflowOrchestrator;
