pub mod agreement;
pub mod invoice;
pub mod printable;

pub use agreement::{
    render_agreement, section_plan, AgreementTerms, PlannedSection, SectionKind, AGREEMENT_TITLE,
};
pub use invoice::invoice_line_items;
pub use printable::{
    HtmlPrintRenderer, PrintRenderer, PrintableAgreement, PrintableInvoice, RenderError,
};
