//! Printable documents.
//!
//! Layout is not this service's concern: a [`PrintRenderer`] turns the data
//! below into bytes. The bundled renderer emits a self-contained HTML page
//! suitable for "print to PDF".

use crate::config::BusinessProfile;
use crate::models::money::format_amount;
use crate::models::{Client, Invoice, LegalDocument};
use crate::services::metrics::RENDER_DURATION;
use service_core::error::AppError;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render failed: {0}")]
    Failed(String),
}

/// Data fields a printable invoice is built from.
#[derive(Debug, Clone)]
pub struct PrintableInvoice {
    pub invoice: Invoice,
    pub client: Client,
    pub issuer: BusinessProfile,
}

#[derive(Debug, Clone)]
pub struct PrintableAgreement {
    pub document: LegalDocument,
    pub client: Client,
    pub issuer: BusinessProfile,
}

pub trait PrintRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn render_invoice(&self, doc: &PrintableInvoice) -> Result<Vec<u8>, RenderError>;
    fn render_agreement(&self, doc: &PrintableAgreement) -> Result<Vec<u8>, RenderError>;
}

/// Runs a render on the blocking pool, bounded by `timeout`.
pub async fn render_with_timeout<F>(
    document: &'static str,
    timeout: Duration,
    render: F,
) -> Result<Vec<u8>, AppError>
where
    F: FnOnce() -> Result<Vec<u8>, RenderError> + Send + 'static,
{
    let timer = RENDER_DURATION.with_label_values(&[document]).start_timer();

    let result = tokio::time::timeout(timeout, tokio::task::spawn_blocking(render)).await;
    timer.observe_duration();

    match result {
        Ok(Ok(Ok(bytes))) => Ok(bytes),
        Ok(Ok(Err(e))) => Err(AppError::InternalError(anyhow::anyhow!(e))),
        Ok(Err(join_err)) => Err(AppError::InternalError(anyhow::anyhow!(
            "Render task failed: {}",
            join_err
        ))),
        Err(_) => Err(AppError::ServiceUnavailable),
    }
}

pub async fn render_invoice(
    renderer: Arc<dyn PrintRenderer>,
    doc: PrintableInvoice,
    timeout: Duration,
) -> Result<Vec<u8>, AppError> {
    render_with_timeout("invoice", timeout, move || renderer.render_invoice(&doc)).await
}

pub async fn render_agreement(
    renderer: Arc<dyn PrintRenderer>,
    doc: PrintableAgreement,
    timeout: Duration,
) -> Result<Vec<u8>, AppError> {
    render_with_timeout("agreement", timeout, move || renderer.render_agreement(&doc)).await
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `**label**` spans in stored agreement text become `<strong>`.
fn inline_markup(line: &str) -> String {
    let escaped = escape(line);
    let mut out = String::with_capacity(escaped.len());
    let mut open = false;
    for (i, part) in escaped.split("**").enumerate() {
        if i > 0 {
            out.push_str(if open { "</strong>" } else { "<strong>" });
            open = !open;
        }
        out.push_str(part);
    }
    if open {
        out.push_str("</strong>");
    }
    out
}

const STYLE: &str = "body{font-family:Helvetica,Arial,sans-serif;max-width:800px;margin:2em auto;color:#222}\
table{width:100%;border-collapse:collapse}th,td{padding:6px;border-bottom:1px solid #ddd;text-align:left}\
td.num,th.num{text-align:right}.muted{color:#666}";

fn page(title: &str, body: &str) -> Vec<u8> {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title><style>{}</style></head><body>{}</body></html>",
        escape(title),
        STYLE,
        body
    )
    .into_bytes()
}

fn address_block(name: &str, lines: &[&str], email: Option<&str>) -> String {
    let mut out = format!("<strong>{}</strong><br>", escape(name));
    for line in lines {
        let _ = write!(out, "{}<br>", escape(line));
    }
    if let Some(email) = email {
        let _ = write!(out, "{}", escape(email));
    }
    out
}

/// Signature images are only embedded when they are inline image data.
fn signature_img(signature: &str) -> Option<String> {
    signature
        .starts_with("data:image/")
        .then(|| format!("<img alt=\"Client signature\" style=\"max-height:80px\" src=\"{}\">", escape(signature)))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPrintRenderer;

impl PrintRenderer for HtmlPrintRenderer {
    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "html"
    }

    fn render_invoice(&self, doc: &PrintableInvoice) -> Result<Vec<u8>, RenderError> {
        let inv = &doc.invoice;
        let issuer_lines: Vec<&str> = doc.issuer.address.lines().map(str::trim).collect();
        let mut body = String::new();

        let _ = write!(
            body,
            "<h1>Invoice {}</h1><p class=\"muted\">Issued {} &middot; Due {}</p>",
            escape(&inv.invoice_number),
            inv.issue_date.format("%-d %B %Y"),
            inv.due_date.format("%-d %B %Y")
        );
        let _ = write!(
            body,
            "<table><tr><td>{}</td><td>{}</td></tr></table>",
            address_block(&doc.issuer.name, &issuer_lines, Some(&doc.issuer.email)),
            address_block(
                doc.client.billing_name(),
                &doc.client.address_lines(),
                doc.client.primary_email()
            )
        );

        body.push_str("<table><tr><th>Description</th><th class=\"num\">Qty</th><th class=\"num\">Unit price</th><th class=\"num\">Amount</th></tr>");
        for item in &inv.items {
            let _ = write!(
                body,
                "<tr><td>{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td></tr>",
                escape(&item.description),
                item.quantity,
                format_amount(item.unit_price_minor_units, &inv.currency),
                format_amount(item.line_total_minor_units(), &inv.currency)
            );
        }
        let _ = write!(
            body,
            "<tr><th colspan=\"3\">Total</th><th class=\"num\">{}</th></tr>\
             <tr><td colspan=\"3\">Paid</td><td class=\"num\">{}</td></tr>\
             <tr><th colspan=\"3\">Amount due</th><th class=\"num\">{}</th></tr></table>",
            format_amount(inv.total_minor_units, &inv.currency),
            format_amount(inv.amount_paid_minor_units, &inv.currency),
            format_amount(inv.amount_due_minor_units(), &inv.currency)
        );

        Ok(page(&format!("Invoice {}", inv.invoice_number), &body))
    }

    fn render_agreement(&self, doc: &PrintableAgreement) -> Result<Vec<u8>, RenderError> {
        let mut body = String::new();
        let mut in_list = false;

        for line in doc.document.content.lines() {
            let trimmed = line.trim();
            let is_item = trimmed.starts_with("- ");
            if in_list && !is_item {
                body.push_str("</ul>");
                in_list = false;
            }
            if let Some(h) = trimmed.strip_prefix("## ") {
                let _ = write!(body, "<h2>{}</h2>", inline_markup(h));
            } else if let Some(h) = trimmed.strip_prefix("# ") {
                let _ = write!(body, "<h1>{}</h1>", inline_markup(h));
            } else if let Some(item) = trimmed.strip_prefix("- ") {
                if !in_list {
                    body.push_str("<ul>");
                    in_list = true;
                }
                let _ = write!(body, "<li>{}</li>", inline_markup(item));
            } else if !trimmed.is_empty() {
                let _ = write!(body, "<p>{}</p>", inline_markup(trimmed));
            }
        }
        if in_list {
            body.push_str("</ul>");
        }

        if let (Some(signature), Some(at)) =
            (&doc.document.client_signature, doc.document.acknowledged_at)
        {
            let _ = write!(
                body,
                "<h2>Client acknowledgement</h2><p>Signed by {} on {}</p>",
                escape(doc.client.billing_name()),
                at.format("%-d %B %Y %H:%M UTC")
            );
            if let Some(img) = signature_img(signature) {
                body.push_str(&img);
            }
        }

        Ok(page(
            &format!("{} {}", doc.document.title, doc.document.document_number),
            &body,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, NewInvoice, NewInvoiceItem};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn issuer() -> BusinessProfile {
        BusinessProfile {
            name: "Studio".to_string(),
            email: "hello@studio.test".to_string(),
            admin_email: "admin@studio.test".to_string(),
            address: "2 Lane\nCity".to_string(),
            governing_law: "England and Wales".to_string(),
            currency: "gbp".to_string(),
        }
    }

    fn client() -> Client {
        Client {
            id: Uuid::new_v4(),
            name: "Jane".to_string(),
            company: Some("Acme <Ltd>".to_string()),
            emails: vec!["a@acme.test".to_string()],
            address: Some("1 Road\nTown".to_string()),
            created_utc: Utc::now(),
        }
    }

    fn invoice() -> Invoice {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        NewInvoice {
            id: Uuid::new_v4(),
            invoice_number: "INV-2026-001".to_string(),
            client_id: Uuid::new_v4(),
            inquiry_id: None,
            legal_document_id: None,
            currency: "gbp".to_string(),
            issue_date: date,
            due_date: date + chrono::Duration::days(30),
            items: vec![NewInvoiceItem {
                description: "Business project".to_string(),
                quantity: 1,
                unit_price_minor_units: 150000,
            }],
            created_utc: Utc::now(),
        }
        .into_invoice()
    }

    #[test]
    fn invoice_html_carries_fields_and_escapes() {
        let doc = PrintableInvoice {
            invoice: invoice(),
            client: client(),
            issuer: issuer(),
        };
        let html = String::from_utf8(HtmlPrintRenderer.render_invoice(&doc).unwrap()).unwrap();
        assert!(html.contains("INV-2026-001"));
        assert!(html.contains("£1,500.00"));
        assert!(html.contains("18 November 2026"));
        assert!(html.contains("Acme &lt;Ltd&gt;"));
        assert!(!html.contains("<Ltd>"));
    }

    #[test]
    fn agreement_markup_becomes_html() {
        let now = Utc::now();
        let document = LegalDocument {
            id: Uuid::new_v4(),
            document_number: "SA-2610-001".to_string(),
            title: "Service Agreement".to_string(),
            content: "# SERVICE AGREEMENT\n\n**Agreement No.:** SA-2610-001\n\n## 1. Payment Terms\n\n- A deposit <script>\n".to_string(),
            status: DocumentStatus::Acknowledged,
            client_id: Uuid::new_v4(),
            inquiry_id: None,
            client_signature: Some("data:image/png;base64,AAAA".to_string()),
            sent_at: Some(now),
            acknowledged_at: Some(now),
            created_utc: now,
            updated_utc: now,
        };
        let doc = PrintableAgreement {
            document,
            client: client(),
            issuer: issuer(),
        };
        let html = String::from_utf8(HtmlPrintRenderer.render_agreement(&doc).unwrap()).unwrap();
        assert!(html.contains("<h1>SERVICE AGREEMENT</h1>"));
        assert!(html.contains("<strong>Agreement No.:</strong> SA-2610-001"));
        assert!(html.contains("<ul><li>A deposit &lt;script&gt;</li></ul>"));
        assert!(html.contains("src=\"data:image/png;base64,AAAA\""));
    }

    #[tokio::test]
    async fn slow_render_times_out() {
        let result = render_with_timeout("invoice", Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Vec::new())
        })
        .await;
        assert!(matches!(result, Err(AppError::ServiceUnavailable)));
    }
}
