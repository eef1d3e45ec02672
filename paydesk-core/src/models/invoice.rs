use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::client::NewClient;

/// Invoice status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    #[sqlx(rename = "draft")]
    Draft,
    #[sqlx(rename = "sent")]
    Sent,
    #[sqlx(rename = "paid")]
    Paid,
    #[sqlx(rename = "overdue")]
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice model representing an invoice in the system.
///
/// Maps to the `invoices` table. `subtotal`, `tax_amount` and `total` are
/// computed once at creation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    /// Unique identifier for the invoice
    pub id: Uuid,

    /// ID of the user who owns this invoice
    pub user_id: Uuid,

    /// ID of the billed client
    pub client_id: Uuid,

    /// Invoice number (unique per user)
    pub invoice_number: String,

    /// Date when invoice was issued
    pub issue_date: NaiveDate,

    /// Due date for payment
    pub due_date: NaiveDate,

    /// Invoice status
    pub status: InvoiceStatus,

    /// Currency code (ISO 4217)
    pub currency: String,

    /// Sum of line item amounts
    pub subtotal: Decimal,

    /// Tax rate in percent
    pub tax_rate: Decimal,

    pub tax_amount: Decimal,

    /// `subtotal + tax_amount`
    pub total: Decimal,

    pub notes: Option<String>,

    /// Payable reference (checkout URL) minted by the payment processor
    pub payment_reference: Option<String>,

    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,

    /// Payout that disbursed this invoice, once reconciled
    pub payout_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single billed line. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub rate: Decimal,
    /// `quantity * rate`
    pub amount: Decimal,
    pub position: i32,
}

/// Line item creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLineItem {
    pub description: String,
    pub quantity: i32,
    pub rate: Decimal,
}

/// Which client an invoice is billed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRef {
    /// An existing, non-archived client of the same user
    Existing(Uuid),
    /// A client created in the same transaction as the invoice
    New(NewClient),
}

/// Invoice creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub client: ClientRef,
    pub due_date: NaiveDate,
    pub issue_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub line_items: Vec<NewLineItem>,
    #[serde(default)]
    pub tax_rate: Decimal,
    pub notes: Option<String>,
}

impl NewInvoice {
    /// Checks every caller-supplied field. Nothing is written when this
    /// fails.
    pub fn validate(&self) -> BillingResult<()> {
        if self.line_items.is_empty() {
            return Err(BillingError::validation("at least one line item is required"));
        }
        for (index, item) in self.line_items.iter().enumerate() {
            let line = index + 1;
            if item.description.trim().is_empty() {
                return Err(BillingError::validation(format!(
                    "line {}: description is required",
                    line
                )));
            }
            if item.quantity <= 0 {
                return Err(BillingError::validation(format!(
                    "line {}: quantity must be positive",
                    line
                )));
            }
            if item.rate.is_sign_negative() && !item.rate.is_zero() {
                return Err(BillingError::validation(format!(
                    "line {}: rate must not be negative",
                    line
                )));
            }
            if item.rate.normalize().scale() > crate::money::MINOR_UNIT_DIGITS {
                return Err(BillingError::validation(format!(
                    "line {}: rate has more than {} decimal places",
                    line,
                    crate::money::MINOR_UNIT_DIGITS
                )));
            }
        }
        if self.tax_rate.is_sign_negative() && !self.tax_rate.is_zero()
            || self.tax_rate > Decimal::ONE_HUNDRED
        {
            return Err(BillingError::validation("tax rate must be between 0 and 100"));
        }
        if let Some(currency) = &self.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(BillingError::validation(format!(
                    "currency {:?} is not an ISO 4217 code",
                    currency
                )));
            }
        }
        if let Some(issue_date) = self.issue_date {
            if self.due_date < issue_date {
                return Err(BillingError::validation("due date is before the issue date"));
            }
        }
        if let ClientRef::New(client) = &self.client {
            client.validate()?;
        }
        Ok(())
    }

    pub fn currency_code(&self) -> String {
        self.currency
            .as_deref()
            .unwrap_or("USD")
            .to_ascii_uppercase()
    }
}

/// Invoice with its line items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
}

/// Status change request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: InvoiceStatus,
}
