pub mod inquiry;
pub mod invoice;
pub mod job;
pub mod legal_document;
pub mod money;
pub mod payment_event;

pub use inquiry::{normalize_emails, Client, Inquiry, InquiryStatus, Timeline};
pub use invoice::{
    Invoice, InvoiceItem, InvoiceStatus, InvoiceStatusUpdate, InvoiceView, ListInvoicesFilter,
    NewInvoice, NewInvoiceItem,
};
pub use job::{JobKind, JobStatus, NewJob, ScheduledJob};
pub use legal_document::{DocumentStatus, LegalDocument, NewLegalDocument, PublicLegalDocument};
pub use payment_event::{
    PaymentApplication, PaymentEvent, PaymentOutcome, ProcessedPaymentEvent, PAYMENT_FAILED,
    PAYMENT_SUCCEEDED,
};
