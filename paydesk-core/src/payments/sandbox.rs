use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::ExternalError;
use crate::payments::processor::{
    CheckoutRequest, CheckoutSession, ConnectedAccount, OnboardingLink, PaymentProcessor,
    TransferReceipt, TransferRequest, TransferState,
};

const SERVICE: &str = "sandbox processor";

#[derive(Default)]
struct SandboxState {
    accounts: HashMap<String, ConnectedAccount>,
    checkouts: Vec<CheckoutRequest>,
    /// Keyed by idempotency key
    transfers: HashMap<String, (TransferRequest, TransferReceipt)>,
    failing_accounts: HashSet<String>,
    unavailable: bool,
}

/// In-process payment processor for local runs and tests.
///
/// Transfers settle immediately and are deduplicated by idempotency key.
#[derive(Default)]
pub struct SandboxProcessor {
    state: Mutex<SandboxState>,
    auto_approve: bool,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts are created with onboarding already complete.
    pub fn auto_approving() -> Self {
        Self {
            state: Mutex::new(SandboxState::default()),
            auto_approve: true,
        }
    }

    /// Completes onboarding of `account_id`, creating it if needed.
    pub async fn enable_account(&self, account_id: &str) {
        let mut state = self.state.lock().await;
        state.accounts.insert(account_id.to_string(), ready_account(account_id));
    }

    /// Transfers to `account_id` are rejected from now on.
    pub async fn fail_transfers_to(&self, account_id: &str) {
        self.state.lock().await.failing_accounts.insert(account_id.to_string());
    }

    /// Every call fails with a network error while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.state.lock().await.checkouts.clone()
    }

    pub async fn transfers(&self) -> Vec<TransferRequest> {
        self.state
            .lock()
            .await
            .transfers
            .values()
            .map(|(request, _)| request.clone())
            .collect()
    }
}

fn ready_account(account_id: &str) -> ConnectedAccount {
    ConnectedAccount {
        id: account_id.to_string(),
        details_submitted: true,
        charges_enabled: true,
        payouts_enabled: true,
    }
}

fn unavailable() -> ExternalError {
    ExternalError::Network {
        service: SERVICE,
        message: "sandbox set unavailable".to_string(),
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, ExternalError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(unavailable());
        }
        if request.amount_minor <= 0 {
            return Err(ExternalError::Rejected {
                service: SERVICE,
                status: 400,
                message: "amount must be positive".to_string(),
            });
        }
        state.checkouts.push(request.clone());

        let id = format!("cs_sandbox_{}", Uuid::new_v4().simple());
        info!(session_id = %id, invoice_id = %request.invoice_id, "Sandbox checkout created");
        Ok(CheckoutSession {
            url: format!("https://sandbox.paydesk.local/checkout/{}", id),
            id,
        })
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, ExternalError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(unavailable());
        }
        if let Some((_, receipt)) = state.transfers.get(&request.idempotency_key) {
            return Ok(receipt.clone());
        }
        if state.failing_accounts.contains(&request.destination_account) {
            return Err(ExternalError::Rejected {
                service: SERVICE,
                status: 400,
                message: format!("transfers to {} are disabled", request.destination_account),
            });
        }

        let receipt = TransferReceipt {
            id: format!("tr_sandbox_{}", Uuid::new_v4().simple()),
            status: TransferState::Paid,
            arrival_date: None,
        };
        state
            .transfers
            .insert(request.idempotency_key.clone(), (request.clone(), receipt.clone()));
        info!(
            transfer_id = %receipt.id,
            destination = %request.destination_account,
            amount_minor = request.amount_minor,
            "Sandbox transfer settled"
        );
        Ok(receipt)
    }

    async fn create_account(&self, _email: &str) -> Result<ConnectedAccount, ExternalError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(unavailable());
        }
        let id = format!("acct_sandbox_{}", Uuid::new_v4().simple());
        let account = if self.auto_approve {
            ready_account(&id)
        } else {
            ConnectedAccount {
                id: id.clone(),
                details_submitted: false,
                charges_enabled: false,
                payouts_enabled: false,
            }
        };
        state.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        return_url: &str,
    ) -> Result<OnboardingLink, ExternalError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(OnboardingLink {
            url: format!(
                "https://sandbox.paydesk.local/onboarding/{}?return_url={}",
                account_id, return_url
            ),
            expires_at: None,
        })
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ExternalError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(unavailable());
        }
        state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| ExternalError::Rejected {
                service: SERVICE,
                status: 404,
                message: format!("no such account: {}", account_id),
            })
    }
}
