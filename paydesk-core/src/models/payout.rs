use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Where a user's earnings are sent: a connected account at the payment
/// processor. One per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayoutDestination {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Processor-assigned connected account id
    pub account_id: String,

    pub details_submitted: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutDestination {
    /// Onboarding is complete and the account can take split charges.
    pub fn is_ready(&self) -> bool {
        self.details_submitted && self.charges_enabled && self.payouts_enabled
    }
}

/// Payout lifecycle: `requested -> completed | failed`. Transfers the
/// processor settles synchronously are recorded straight as `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Requested,
    Completed,
    Failed,
}

/// Funds transferred to a payout destination. Every invoice it covers
/// carries its id in `invoices.payout_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payout {
    pub id: Uuid,
    pub user_id: Uuid,
    pub destination_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PayoutStatus,
    /// Processor transfer id
    pub transfer_ref: String,
    pub arrival_date: NaiveDate,
    pub invoice_count: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination(details: bool, charges: bool, payouts: bool) -> PayoutDestination {
        PayoutDestination {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            account_id: "acct_1".into(),
            details_submitted: details,
            charges_enabled: charges,
            payouts_enabled: payouts,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ready_needs_every_flag() {
        assert!(destination(true, true, true).is_ready());
        assert!(!destination(true, true, false).is_ready());
        assert!(!destination(true, false, true).is_ready());
        assert!(!destination(false, true, true).is_ready());
    }
}
