//! Quote and line item models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::{round_cents, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Being written by the professional, invisible to the client
    Draft,
    /// Awaiting the client's answer
    Sent,
    Accepted,
    Rejected,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 4] = [
        QuoteStatus::Draft,
        QuoteStatus::Sent,
        QuoteStatus::Accepted,
        QuoteStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Sent => "sent",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QuoteStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(QuoteStatus::Draft),
            "sent" => Ok(QuoteStatus::Sent),
            "accepted" => Ok(QuoteStatus::Accepted),
            "rejected" => Ok(QuoteStatus::Rejected),
            _ => Err(ParseEnumError::new("status", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quote {
    pub id: String,
    pub quote_number: String,
    pub work_request_id: String,
    pub professional_id: String,
    pub client_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub tax_rate: f64,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub valid_until: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Quote {
    pub fn status_enum(&self) -> QuoteStatus {
        self.status.parse().unwrap_or(QuoteStatus::Draft)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuoteItem {
    pub id: String,
    pub quote_id: String,
    pub position: i64,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
}

/// Quote with its line items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteDetail {
    #[serde(flatten)]
    pub quote: Quote,
    pub items: Vec<QuoteItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteItemInput {
    #[serde(default)]
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
}

impl QuoteItemInput {
    pub fn line_total(&self) -> f64 {
        round_cents(self.quantity * self.unit_price)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateQuoteRequest {
    pub work_request_id: String,
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    /// Percentage, defaults to the configured VAT rate
    pub tax_rate: Option<f64>,
    /// Date (YYYY-MM-DD) after which the quote lapses
    pub valid_until: Option<String>,
    #[serde(default)]
    pub items: Vec<QuoteItemInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteQuery {
    pub status: Option<String>,
    pub work_request_id: Option<String>,
}

/// Subtotal, tax and total of a set of line items
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteTotals {
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
}

impl QuoteTotals {
    pub fn compute(items: &[QuoteItemInput], tax_rate: f64) -> Self {
        let subtotal = round_cents(items.iter().map(QuoteItemInput::line_total).sum());
        let tax_amount = round_cents(subtotal * tax_rate / 100.0);
        Self {
            subtotal,
            tax_amount,
            total: round_cents(subtotal + tax_amount),
        }
    }
}

/// Human-facing quote reference, e.g. `DEV-2026-3F9A12BC`
pub fn generate_quote_number(id: &uuid::Uuid) -> String {
    let year = chrono::Utc::now().format("%Y");
    let short = id.simple().to_string()[..8].to_uppercase();
    format!("DEV-{}-{}", year, short)
}
