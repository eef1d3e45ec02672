use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ProcessorConfig;
use crate::error::ExternalError;
use crate::external::JsonApi;
use crate::payments::processor::{
    CheckoutRequest, CheckoutSession, ConnectedAccount, OnboardingLink, PaymentProcessor,
    TransferReceipt, TransferRequest,
};

/// Payment processor reached over its REST API.
#[derive(Clone)]
pub struct HttpPaymentProcessor {
    api: JsonApi,
}

#[derive(Serialize)]
struct NewAccount<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct NewAccountLink<'a> {
    account: &'a str,
    return_url: &'a str,
}

/// Changes whenever the request body would, so a session minted before a
/// destination became ready is never replayed for a split checkout.
pub fn checkout_idempotency_key(request: &CheckoutRequest) -> String {
    format!(
        "checkout-{}-{}-{}-{}-{}",
        request.invoice_id,
        request.amount_minor,
        request.currency,
        request.destination_account.as_deref().unwrap_or("platform"),
        request.application_fee_minor.unwrap_or(0)
    )
}

impl HttpPaymentProcessor {
    pub fn new(config: &ProcessorConfig, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            api: JsonApi::new("payment processor", &config.base_url, Some(config.api_key.as_str()), timeout)?,
        })
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, ExternalError> {
        self.api
            .post("/v1/checkout_sessions", request, Some(&checkout_idempotency_key(request)))
            .await
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, ExternalError> {
        self.api
            .post("/v1/transfers", request, Some(&request.idempotency_key))
            .await
    }

    async fn create_account(&self, email: &str) -> Result<ConnectedAccount, ExternalError> {
        self.api.post("/v1/accounts", &NewAccount { email }, None).await
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        return_url: &str,
    ) -> Result<OnboardingLink, ExternalError> {
        self.api
            .post(
                "/v1/account_links",
                &NewAccountLink {
                    account: account_id,
                    return_url,
                },
                None,
            )
            .await
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ExternalError> {
        self.api.get(&format!("/v1/accounts/{}", account_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[test]
    fn test_split_checkout_gets_a_new_key() {
        let unsplit = CheckoutRequest {
            invoice_id: Uuid::new_v4(),
            amount_minor: 10_000,
            currency: "usd".into(),
            destination_account: None,
            application_fee_minor: None,
            metadata: BTreeMap::new(),
        };
        let split = CheckoutRequest {
            destination_account: Some("acct_1".into()),
            application_fee_minor: Some(300),
            ..unsplit.clone()
        };
        let refee = CheckoutRequest {
            application_fee_minor: Some(250),
            ..split.clone()
        };

        assert_eq!(checkout_idempotency_key(&unsplit), checkout_idempotency_key(&unsplit.clone()));
        assert_ne!(checkout_idempotency_key(&unsplit), checkout_idempotency_key(&split));
        assert_ne!(checkout_idempotency_key(&split), checkout_idempotency_key(&refee));
    }
}
