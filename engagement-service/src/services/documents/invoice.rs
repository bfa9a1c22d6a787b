//! Invoice lines for an accepted quote.

use crate::models::{Inquiry, NewInvoiceItem};
use service_core::error::AppError;

/// Line items for the invoice raised when a quote is accepted: a single item
/// for the full quoted price, carried over in minor units unchanged.
pub fn invoice_line_items(inquiry: &Inquiry) -> Result<Vec<NewInvoiceItem>, AppError> {
    let price = inquiry.final_price_minor_units.ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Inquiry has no final price"))
    })?;
    if price < 0 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Inquiry price cannot be negative"
        )));
    }

    let mut description = format!("{} project", capitalize(inquiry.project_type.trim()));
    if let Some(goal) = inquiry.goal.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        description.push_str(" - ");
        description.push_str(goal);
    }

    Ok(vec![NewInvoiceItem {
        description,
        quantity: 1,
        unit_price_minor_units: price,
    }])
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InquiryStatus, Timeline};
    use chrono::Utc;
    use uuid::Uuid;

    fn inquiry(price: Option<i64>, goal: Option<&str>) -> Inquiry {
        Inquiry {
            id: Uuid::new_v4(),
            name: "Jane".to_string(),
            email: "a@acme.test".to_string(),
            company: Some("Acme Ltd".to_string()),
            project_type: "business".to_string(),
            goal: goal.map(String::from),
            requirements: None,
            timeline: Timeline::Normal,
            status: InquiryStatus::Quoted,
            final_price_minor_units: price,
            quoted_at: None,
            converted_to_client_id: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn single_item_for_full_price() {
        let items = invoice_line_items(&inquiry(Some(150000), Some("More leads"))).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[0].unit_price_minor_units, 150000);
        assert_eq!(items[0].description, "Business project - More leads");
    }

    #[test]
    fn odd_minor_amount_survives_handoff() {
        let items = invoice_line_items(&inquiry(Some(123457), None)).unwrap();
        assert_eq!(items[0].unit_price_minor_units, 123457);
        assert_eq!(items[0].description, "Business project");
    }

    #[test]
    fn missing_or_negative_price_is_rejected() {
        assert!(invoice_line_items(&inquiry(None, None)).is_err());
        assert!(matches!(
            invoice_line_items(&inquiry(Some(-1), None)),
            Err(AppError::BadRequest(_))
        ));
        assert!(invoice_line_items(&inquiry(Some(0), None)).is_ok());
    }
}
