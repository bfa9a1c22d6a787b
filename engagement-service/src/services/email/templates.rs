//! Transactional email content.

use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTemplate {
    Quote {
        client_name: String,
        project_type: String,
        price: String,
        accept_url: String,
    },
    AcceptanceConfirmation {
        client_name: String,
        document_number: String,
        invoice_number: String,
    },
    SigningLink {
        client_name: String,
        document_number: String,
        signing_url: String,
    },
    InvoiceNotice {
        client_name: String,
        invoice_number: String,
        total: String,
        due_date: NaiveDate,
    },
    DocumentSigned {
        client_name: String,
        document_number: String,
    },
    DocumentSignedAdmin {
        client_name: String,
        document_number: String,
        acknowledged_at: DateTime<Utc>,
    },
    InvoiceDispatch {
        client_name: String,
        invoice_number: String,
        amount_due: String,
        due_date: NaiveDate,
        payment_url: String,
    },
}

#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn date(d: NaiveDate) -> String {
    d.format("%-d %B %Y").to_string()
}

impl EmailTemplate {
    /// Label used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            EmailTemplate::Quote { .. } => "quote",
            EmailTemplate::AcceptanceConfirmation { .. } => "acceptance_confirmation",
            EmailTemplate::SigningLink { .. } => "signing_link",
            EmailTemplate::InvoiceNotice { .. } => "invoice_notice",
            EmailTemplate::DocumentSigned { .. } => "document_signed",
            EmailTemplate::DocumentSignedAdmin { .. } => "document_signed_admin",
            EmailTemplate::InvoiceDispatch { .. } => "invoice_dispatch",
        }
    }

    pub fn render(&self, business_name: &str) -> RenderedEmail {
        let (subject, greeting, paragraphs, link) = match self {
            EmailTemplate::Quote {
                client_name,
                project_type,
                price,
                accept_url,
            } => (
                format!("Your quote from {}", business_name),
                client_name.as_str(),
                vec![
                    format!(
                        "Thank you for your enquiry. The quote for your {} project is {}.",
                        project_type, price
                    ),
                    "If you are happy to go ahead, accept the quote using the link below and we will send over the service agreement.".to_string(),
                ],
                Some(("Accept quote", accept_url.as_str())),
            ),
            EmailTemplate::AcceptanceConfirmation {
                client_name,
                document_number,
                invoice_number,
            } => (
                "Quote accepted".to_string(),
                client_name.as_str(),
                vec![
                    "Thank you for accepting the quote.".to_string(),
                    format!(
                        "Service agreement {} has been prepared and will arrive shortly for signature. Deposit invoice {} has been raised.",
                        document_number, invoice_number
                    ),
                ],
                None,
            ),
            EmailTemplate::SigningLink {
                client_name,
                document_number,
                signing_url,
            } => (
                format!("Please review and sign agreement {}", document_number),
                client_name.as_str(),
                vec![format!(
                    "Service agreement {} is ready. Please read it and sign using the link below.",
                    document_number
                )],
                Some(("Review and sign", signing_url.as_str())),
            ),
            EmailTemplate::InvoiceNotice {
                client_name,
                invoice_number,
                total,
                due_date,
            } => (
                format!("Invoice {} created", invoice_number),
                client_name.as_str(),
                vec![
                    format!(
                        "Invoice {} for {} has been created, due {}.",
                        invoice_number,
                        total,
                        date(*due_date)
                    ),
                    "You will receive the invoice itself once the service agreement has been signed.".to_string(),
                ],
                None,
            ),
            EmailTemplate::DocumentSigned {
                client_name,
                document_number,
            } => (
                format!("Agreement {} signed", document_number),
                client_name.as_str(),
                vec![format!(
                    "Thank you, we have received your signature on agreement {}. Your invoice will follow shortly.",
                    document_number
                )],
                None,
            ),
            EmailTemplate::DocumentSignedAdmin {
                client_name,
                document_number,
                acknowledged_at,
            } => (
                format!("{} signed {}", client_name, document_number),
                "there",
                vec![format!(
                    "{} signed agreement {} at {}.",
                    client_name,
                    document_number,
                    acknowledged_at.format("%Y-%m-%d %H:%M UTC")
                )],
                None,
            ),
            EmailTemplate::InvoiceDispatch {
                client_name,
                invoice_number,
                amount_due,
                due_date,
                payment_url,
            } => (
                format!("Invoice {} from {}", invoice_number, business_name),
                client_name.as_str(),
                vec![
                    format!(
                        "Please find invoice {} attached. The amount due is {}, payable by {}.",
                        invoice_number,
                        amount_due,
                        date(*due_date)
                    ),
                    "You can pay by card using the link below.".to_string(),
                ],
                Some(("Pay invoice", payment_url.as_str())),
            ),
        };

        let mut text = format!("Hi {},\n\n", greeting);
        let mut html = format!("<p>Hi {},</p>", escape(greeting));
        for p in &paragraphs {
            text.push_str(p);
            text.push_str("\n\n");
            html.push_str(&format!("<p>{}</p>", escape(p)));
        }
        if let Some((label, url)) = link {
            text.push_str(&format!("{}: {}\n\n", label, url));
            html.push_str(&format!(
                "<p><a href=\"{}\">{}</a></p>",
                escape(url),
                escape(label)
            ));
        }
        text.push_str(&format!("Kind regards,\n{}\n", business_name));
        html.push_str(&format!("<p>Kind regards,<br>{}</p>", escape(business_name)));

        RenderedEmail {
            subject,
            text,
            html,
        }
    }
}
