use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExternalError;

/// Request for a hosted checkout that a payer uses to settle one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub invoice_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    /// Connected account that receives the funds less the fee
    pub destination_account: Option<String>,
    /// Platform share withheld by the processor at settlement
    pub application_fee_minor: Option<i64>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub destination_account: String,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    /// The processor returns the original transfer for a repeated key
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Paid,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: String,
    pub status: TransferState,
    pub arrival_date: Option<NaiveDate>,
}

/// Onboarding state of a connected account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    pub details_submitted: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingLink {
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Capabilities the platform needs from a payment processor.
///
/// Errors are reported as-is; callers decide whether to retry
/// ([`ExternalError::is_retryable`]).
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, ExternalError>;

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, ExternalError>;

    async fn create_account(&self, email: &str) -> Result<ConnectedAccount, ExternalError>;

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        return_url: &str,
    ) -> Result<OnboardingLink, ExternalError>;

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ExternalError>;
}
