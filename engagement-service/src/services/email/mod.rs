pub mod dispatcher;
pub mod providers;
pub mod templates;

pub use dispatcher::{DispatchError, DispatchReceipt, NotificationDispatcher};
pub use providers::{
    Attachment, EmailMessage, EmailProvider, MockEmailProvider, ProviderError, ProviderResponse,
    SmtpProvider,
};
pub use templates::{EmailTemplate, RenderedEmail};
