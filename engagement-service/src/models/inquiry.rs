//! Inquiry and client models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Inquiry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InquiryStatus {
    New,
    Contacted,
    Quoted,
    Accepted,
    Declined,
    Archived,
}

impl InquiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InquiryStatus::New => "NEW",
            InquiryStatus::Contacted => "CONTACTED",
            InquiryStatus::Quoted => "QUOTED",
            InquiryStatus::Accepted => "ACCEPTED",
            InquiryStatus::Declined => "DECLINED",
            InquiryStatus::Archived => "ARCHIVED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CONTACTED" => InquiryStatus::Contacted,
            "QUOTED" => InquiryStatus::Quoted,
            "ACCEPTED" => InquiryStatus::Accepted,
            "DECLINED" => InquiryStatus::Declined,
            "ARCHIVED" => InquiryStatus::Archived,
            _ => InquiryStatus::New,
        }
    }
}

impl From<String> for InquiryStatus {
    fn from(s: String) -> Self {
        InquiryStatus::from_string(&s)
    }
}

/// Delivery timeline requested on the inquiry form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeline {
    Urgent,
    Fast,
    Normal,
    Flexible,
    #[serde(other)]
    Unspecified,
}

impl Timeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeline::Urgent => "urgent",
            Timeline::Fast => "fast",
            Timeline::Normal => "normal",
            Timeline::Flexible => "flexible",
            Timeline::Unspecified => "unspecified",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "urgent" => Timeline::Urgent,
            "fast" => Timeline::Fast,
            "normal" => Timeline::Normal,
            "flexible" => Timeline::Flexible,
            _ => Timeline::Unspecified,
        }
    }

    /// Textual delivery range used in agreements, `None` when unspecified.
    pub fn range_label(&self) -> Option<&'static str> {
        match self {
            Timeline::Urgent => Some("1-2 weeks"),
            Timeline::Fast => Some("2-4 weeks"),
            Timeline::Normal => Some("4-8 weeks"),
            Timeline::Flexible => Some("8-12 weeks"),
            Timeline::Unspecified => None,
        }
    }
}

impl From<String> for Timeline {
    fn from(s: String) -> Self {
        Timeline::from_string(&s)
    }
}

/// A prospective project lead.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Inquiry {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub project_type: String,
    pub goal: Option<String>,
    pub requirements: Option<String>,
    #[sqlx(try_from = "String")]
    pub timeline: Timeline,
    #[sqlx(try_from = "String")]
    pub status: InquiryStatus,
    pub final_price_minor_units: Option<i64>,
    pub quoted_at: Option<DateTime<Utc>>,
    pub converted_to_client_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Billing party. Owned by the CRUD side of the system; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub company: Option<String>,
    /// Never empty once loaded through a repository; the first entry is the
    /// primary address.
    pub emails: Vec<String>,
    /// Multi-line postal address.
    pub address: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Client {
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }

    /// Name to print on documents: company if present, otherwise the person.
    pub fn billing_name(&self) -> &str {
        self.company
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.name)
    }

    pub fn address_lines(&self) -> Vec<&str> {
        self.address
            .as_deref()
            .map(|a| a.lines().map(str::trim).filter(|l| !l.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Client rows written before the schema moved to a list of addresses carry
/// a single `email` column. Both shapes are folded into one ordered,
/// de-duplicated list here and nowhere else.
pub fn normalize_emails(legacy: Option<&str>, emails: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(emails.len() + 1);
    let candidates = emails.iter().map(String::as_str).chain(legacy);
    for raw in candidates {
        let email = raw.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') || out.contains(&email) {
            continue;
        }
        out.push(email);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_buckets() {
        assert_eq!(Timeline::Urgent.range_label(), Some("1-2 weeks"));
        assert_eq!(Timeline::Fast.range_label(), Some("2-4 weeks"));
        assert_eq!(Timeline::Normal.range_label(), Some("4-8 weeks"));
        assert_eq!(Timeline::Flexible.range_label(), Some("8-12 weeks"));
        assert_eq!(Timeline::Unspecified.range_label(), None);
        assert_eq!(Timeline::from_string("asap"), Timeline::Unspecified);
    }

    #[test]
    fn unknown_timeline_deserializes_as_unspecified() {
        let t: Timeline = serde_json::from_str("\"whenever\"").unwrap();
        assert_eq!(t, Timeline::Unspecified);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            InquiryStatus::New,
            InquiryStatus::Contacted,
            InquiryStatus::Quoted,
            InquiryStatus::Accepted,
            InquiryStatus::Declined,
            InquiryStatus::Archived,
        ] {
            assert_eq!(InquiryStatus::from_string(status.as_str()), status);
        }
    }

    #[test]
    fn legacy_single_email_is_folded_into_list() {
        assert_eq!(
            normalize_emails(Some("A@Acme.test"), &[]),
            vec!["a@acme.test".to_string()]
        );
        assert_eq!(
            normalize_emails(
                Some("a@acme.test"),
                &["billing@acme.test".to_string(), "a@acme.test".to_string()]
            ),
            vec!["billing@acme.test".to_string(), "a@acme.test".to_string()]
        );
        assert!(normalize_emails(Some("  "), &["not-an-email".to_string()]).is_empty());
    }

    #[test]
    fn billing_name_prefers_company() {
        let mut client = Client {
            id: Uuid::new_v4(),
            name: "Jane Doe".to_string(),
            company: Some("Acme Ltd".to_string()),
            emails: vec!["a@acme.test".to_string()],
            address: Some("1 Road\n\nTown ".to_string()),
            created_utc: Utc::now(),
        };
        assert_eq!(client.billing_name(), "Acme Ltd");
        assert_eq!(client.address_lines(), vec!["1 Road", "Town"]);
        client.company = None;
        assert_eq!(client.billing_name(), "Jane Doe");
    }
}
