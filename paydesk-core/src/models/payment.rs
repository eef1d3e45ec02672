use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Manual,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// A collection against an invoice. Every paid invoice has at least one
/// completed payment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Processor transaction id, unique when present
    pub external_ref: Option<String>,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub currency: Option<String>,
    /// Connected account that received its share at settlement. Such a
    /// payment is never disbursed again by the payout batch.
    pub destination_account: Option<String>,
}

/// Payment data accompanying a transition to `paid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub external_ref: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub currency: Option<String>,
    pub destination_account: Option<String>,
}

impl PaymentRecord {
    /// Payment recorded by the invoice owner marking it paid by hand.
    pub fn manual(amount: Decimal) -> Self {
        PaymentRecord {
            amount,
            method: PaymentMethod::Manual,
            external_ref: None,
            paid_at: Utc::now(),
            currency: None,
            destination_account: None,
        }
    }

    /// Whether the funds were collected into the platform account by the
    /// processor and are still owed to the invoice owner.
    pub fn is_platform_collected(&self) -> bool {
        self.method == PaymentMethod::Card && self.external_ref.is_some() && self.destination_account.is_none()
    }
}
