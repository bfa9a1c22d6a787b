//! Service agreement text.
//!
//! The rendered text is persisted once and every later printable render is
//! produced from that stored text, so rendering must be a pure function of
//! [`AgreementTerms`]: no clock, no randomness, no map iteration.

use crate::config::BusinessProfile;
use crate::models::money::{format_amount, split_deposit};
use crate::models::{Client, Inquiry, Timeline};
use chrono::NaiveDate;
use std::fmt::Write;

pub const AGREEMENT_TITLE: &str = "Service Agreement";

/// Everything an agreement is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementTerms {
    pub document_number: String,
    pub agreement_date: NaiveDate,
    pub provider_name: String,
    pub provider_email: String,
    pub provider_address: String,
    pub client_name: String,
    pub client_email: String,
    pub client_address: Vec<String>,
    pub project_type: String,
    pub goal: Option<String>,
    pub requirements: Option<String>,
    pub price_minor_units: Option<i64>,
    pub currency: String,
    pub timeline: Timeline,
    pub payment_due_days: i64,
    pub governing_law: String,
}

impl AgreementTerms {
    /// Terms for an accepted inquiry.
    pub fn for_inquiry(
        document_number: &str,
        agreement_date: NaiveDate,
        business: &BusinessProfile,
        payment_due_days: i64,
        client: &Client,
        inquiry: &Inquiry,
    ) -> Self {
        Self {
            document_number: document_number.to_string(),
            agreement_date,
            provider_name: business.name.clone(),
            provider_email: business.email.clone(),
            provider_address: business.address.clone(),
            client_name: client.billing_name().to_string(),
            client_email: client.primary_email().unwrap_or_default().to_string(),
            client_address: client.address_lines().into_iter().map(String::from).collect(),
            project_type: inquiry.project_type.clone(),
            goal: non_blank(inquiry.goal.as_deref()),
            requirements: non_blank(inquiry.requirements.as_deref()),
            price_minor_units: inquiry.final_price_minor_units,
            currency: business.currency.clone(),
            timeline: inquiry.timeline,
            payment_due_days,
            governing_law: business.governing_law.clone(),
        }
    }

    /// Terms for an agreement drawn up directly for a client.
    #[allow(clippy::too_many_arguments)]
    pub fn standalone(
        document_number: &str,
        agreement_date: NaiveDate,
        business: &BusinessProfile,
        payment_due_days: i64,
        client: &Client,
        scope: &str,
        price_minor_units: Option<i64>,
        timeline: Timeline,
    ) -> Self {
        Self {
            document_number: document_number.to_string(),
            agreement_date,
            provider_name: business.name.clone(),
            provider_email: business.email.clone(),
            provider_address: business.address.clone(),
            client_name: client.billing_name().to_string(),
            client_email: client.primary_email().unwrap_or_default().to_string(),
            client_address: client.address_lines().into_iter().map(String::from).collect(),
            project_type: scope.trim().to_string(),
            goal: None,
            requirements: None,
            price_minor_units,
            currency: business.currency.clone(),
            timeline,
            payment_due_days,
            governing_law: business.governing_law.clone(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    PartiesAndScope,
    ContractValue,
    PaymentTerms,
    Timeline,
    IntellectualProperty,
    Liability,
    Termination,
    GoverningLaw,
    Signatures,
}

impl SectionKind {
    pub fn heading(&self) -> &'static str {
        match self {
            SectionKind::PartiesAndScope => "Parties & Scope",
            SectionKind::ContractValue => "Contract Value",
            SectionKind::PaymentTerms => "Payment Terms",
            SectionKind::Timeline => "Timeline",
            SectionKind::IntellectualProperty => "Intellectual Property",
            SectionKind::Liability => "Liability",
            SectionKind::Termination => "Termination",
            SectionKind::GoverningLaw => "Governing Law",
            SectionKind::Signatures => "Signatures",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSection {
    pub number: u32,
    pub kind: SectionKind,
}

/// Sections present for these terms, numbered from 1 in document order.
/// Contract Value needs a known price and Timeline a specified timeline.
pub fn section_plan(terms: &AgreementTerms) -> Vec<PlannedSection> {
    let candidates = [
        (SectionKind::PartiesAndScope, true),
        (SectionKind::ContractValue, terms.price_minor_units.is_some()),
        (SectionKind::PaymentTerms, true),
        (SectionKind::Timeline, terms.timeline.range_label().is_some()),
        (SectionKind::IntellectualProperty, true),
        (SectionKind::Liability, true),
        (SectionKind::Termination, true),
        (SectionKind::GoverningLaw, true),
        (SectionKind::Signatures, true),
    ];

    candidates
        .into_iter()
        .filter(|(_, present)| *present)
        .zip(1u32..)
        .map(|((kind, _), number)| PlannedSection { number, kind })
        .collect()
}

/// Renders the agreement as markup text.
pub fn render_agreement(terms: &AgreementTerms) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", AGREEMENT_TITLE.to_uppercase());
    let _ = writeln!(out);
    let _ = writeln!(out, "**Agreement No.:** {}", terms.document_number);
    let _ = writeln!(
        out,
        "**Date:** {}",
        terms.agreement_date.format("%-d %B %Y")
    );

    for section in section_plan(terms) {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {}. {}", section.number, section.kind.heading());
        let _ = writeln!(out);
        write_section(&mut out, section.kind, terms);
    }

    out
}

fn write_section(out: &mut String, kind: SectionKind, terms: &AgreementTerms) {
    match kind {
        SectionKind::PartiesAndScope => {
            let _ = writeln!(
                out,
                "This agreement is made between **{}** ({}), \"the Provider\", and **{}** ({}), \"the Client\".",
                terms.provider_name, terms.provider_email, terms.client_name, terms.client_email
            );
            let _ = writeln!(out);
            let _ = writeln!(out, "Provider address: {}", single_line(&terms.provider_address));
            let _ = writeln!(out, "Client address: {}", terms.client_address.join(", "));
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "The Provider will deliver a {} project for the Client.",
                terms.project_type
            );
            if let Some(goal) = &terms.goal {
                let _ = writeln!(out, "Project goal: {}", goal);
            }
            if let Some(requirements) = &terms.requirements {
                let _ = writeln!(out, "Requirements: {}", requirements);
            }
        }
        SectionKind::ContractValue => {
            if let Some(price) = terms.price_minor_units {
                let _ = writeln!(
                    out,
                    "The total fee for the work described above is {}.",
                    format_amount(price, &terms.currency)
                );
            }
        }
        SectionKind::PaymentTerms => match terms.price_minor_units {
            Some(price) => {
                let (deposit, balance) = split_deposit(price);
                let _ = writeln!(
                    out,
                    "- A deposit of {} (50%) is due on signature of this agreement.",
                    format_amount(deposit, &terms.currency)
                );
                let _ = writeln!(
                    out,
                    "- The balance of {} (50%) is due on delivery.",
                    format_amount(balance, &terms.currency)
                );
                let _ = writeln!(
                    out,
                    "- Invoices are payable within {} days of issue.",
                    terms.payment_due_days
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "- Fees are invoiced in two equal parts: 50% on signature and 50% on delivery."
                );
                let _ = writeln!(
                    out,
                    "- Invoices are payable within {} days of issue.",
                    terms.payment_due_days
                );
            }
        },
        SectionKind::Timeline => {
            if let Some(range) = terms.timeline.range_label() {
                let _ = writeln!(
                    out,
                    "The Provider expects to complete the work within {} of receiving the deposit and all materials needed from the Client.",
                    range
                );
            }
        }
        SectionKind::IntellectualProperty => {
            let _ = writeln!(
                out,
                "On receipt of full payment, all rights in the deliverables pass to the Client. The Provider keeps the rights to pre-existing tools and libraries and may show the work in a portfolio unless the Client objects in writing."
            );
        }
        SectionKind::Liability => {
            let _ = writeln!(
                out,
                "The Provider's total liability under this agreement is limited to the fees paid. Neither party is liable for indirect or consequential loss."
            );
        }
        SectionKind::Termination => {
            let _ = writeln!(
                out,
                "Either party may end this agreement with 14 days' written notice. Work completed up to the termination date is payable and the deposit is non-refundable."
            );
        }
        SectionKind::GoverningLaw => {
            let _ = writeln!(
                out,
                "This agreement is governed by the laws of {}.",
                terms.governing_law
            );
        }
        SectionKind::Signatures => {
            let _ = writeln!(out, "For the Provider: {}", terms.provider_name);
            let _ = writeln!(out);
            let _ = writeln!(out, "For the Client: {}", terms.client_name);
        }
    }
}

fn single_line(address: &str) -> String {
    address
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(price: Option<i64>, timeline: Timeline) -> AgreementTerms {
        AgreementTerms {
            document_number: "SA-2610-001".to_string(),
            agreement_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            provider_name: "Studio".to_string(),
            provider_email: "hello@studio.test".to_string(),
            provider_address: "2 Lane\nCity".to_string(),
            client_name: "Acme Ltd".to_string(),
            client_email: "a@acme.test".to_string(),
            client_address: vec!["1 Road".to_string(), "Town".to_string()],
            project_type: "business".to_string(),
            goal: Some("More leads".to_string()),
            requirements: None,
            price_minor_units: price,
            currency: "gbp".to_string(),
            timeline,
            payment_due_days: 30,
            governing_law: "England and Wales".to_string(),
        }
    }

    fn kinds(plan: &[PlannedSection]) -> Vec<SectionKind> {
        plan.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn full_plan_has_nine_sections() {
        let plan = section_plan(&terms(Some(150000), Timeline::Normal));
        assert_eq!(plan.len(), 9);
        assert_eq!(plan[1].kind, SectionKind::ContractValue);
        assert_eq!(plan[3].kind, SectionKind::Timeline);
        assert_eq!(plan[8], PlannedSection { number: 9, kind: SectionKind::Signatures });
    }

    #[test]
    fn optional_sections_are_skipped_and_numbers_stay_contiguous() {
        for (price, timeline) in [
            (None, Timeline::Normal),
            (Some(1), Timeline::Unspecified),
            (None, Timeline::Unspecified),
        ] {
            let plan = section_plan(&terms(price, timeline));
            let numbers: Vec<u32> = plan.iter().map(|s| s.number).collect();
            let expected: Vec<u32> = (1..=plan.len() as u32).collect();
            assert_eq!(numbers, expected);
            assert_eq!(
                kinds(&plan).contains(&SectionKind::ContractValue),
                price.is_some()
            );
            assert_eq!(
                kinds(&plan).contains(&SectionKind::Timeline),
                timeline != Timeline::Unspecified
            );
        }

        let plan = section_plan(&terms(None, Timeline::Unspecified));
        assert_eq!(plan.len(), 7);
        assert_eq!(plan[1], PlannedSection { number: 2, kind: SectionKind::PaymentTerms });
    }

    #[test]
    fn rendering_is_deterministic() {
        let t = terms(Some(150000), Timeline::Normal);
        assert_eq!(render_agreement(&t), render_agreement(&t.clone()));
    }

    #[test]
    fn rendered_text_follows_plan() {
        let text = render_agreement(&terms(Some(150001), Timeline::Normal));
        assert!(text.contains("**Agreement No.:** SA-2610-001"));
        assert!(text.contains("**Date:** 19 October 2026"));
        assert!(text.contains("## 2. Contract Value"));
        assert!(text.contains("£1,500.01"));
        assert!(text.contains("deposit of £750.01"));
        assert!(text.contains("balance of £750.00"));
        assert!(text.contains("## 4. Timeline"));
        assert!(text.contains("within 4-8 weeks"));
        assert!(text.contains("## 9. Signatures"));
        assert!(text.contains("Client address: 1 Road, Town"));

        let text = render_agreement(&terms(None, Timeline::Unspecified));
        assert!(text.contains("## 2. Payment Terms"));
        assert!(text.contains("## 7. Signatures"));
        assert!(!text.contains("Timeline"));
    }

    #[test]
    fn payment_window_follows_configured_due_days() {
        let mut t = terms(Some(150000), Timeline::Normal);
        assert!(render_agreement(&t).contains("payable within 30 days of issue"));

        t.payment_due_days = 14;
        let text = render_agreement(&t);
        assert!(text.contains("payable within 14 days of issue"));
        assert!(!text.contains("30 days"));

        t.price_minor_units = None;
        assert!(render_agreement(&t).contains("payable within 14 days of issue"));
    }
}
