use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BankLinkConfig;
use crate::error::ExternalError;
use crate::external::JsonApi;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkToken {
    pub link_token: String,
    pub expiration: Option<String>,
}

/// Durable credential returned when a public token is exchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccessGrant {
    pub access_token: String,
    pub item_id: String,
    #[serde(default)]
    pub institution_name: Option<String>,
}

/// Account metadata. Balances and transactions are not requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub account_id: String,
    pub name: String,
    pub mask: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub subtype: Option<String>,
}

/// Bank-linking aggregator used to verify payout bank accounts.
#[async_trait]
pub trait BankLinkProvider: Send + Sync {
    async fn create_link_token(&self, user_id: Uuid) -> Result<LinkToken, ExternalError>;

    async fn exchange_public_token(&self, public_token: &str) -> Result<AccessGrant, ExternalError>;

    async fn accounts(&self, access_token: &str) -> Result<Vec<BankAccount>, ExternalError>;
}

/// Aggregator reached over its REST API. Credentials travel in the request
/// body, not in an authorization header.
#[derive(Clone)]
pub struct HttpBankLinkClient {
    api: JsonApi,
    client_id: String,
    secret: String,
}

#[derive(Serialize)]
struct Authenticated<'a, T: Serialize> {
    client_id: &'a str,
    secret: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct LinkTokenBody {
    client_user_id: String,
    products: [&'static str; 1],
}

#[derive(Serialize)]
struct PublicTokenBody<'a> {
    public_token: &'a str,
}

#[derive(Serialize)]
struct AccessTokenBody<'a> {
    access_token: &'a str,
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<BankAccount>,
}

impl HttpBankLinkClient {
    pub fn new(config: &BankLinkConfig, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            api: JsonApi::new("bank-link aggregator", &config.base_url, None, timeout)?,
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
        })
    }

    fn authenticated<T: Serialize>(&self, body: T) -> Authenticated<'_, T> {
        Authenticated {
            client_id: &self.client_id,
            secret: &self.secret,
            body,
        }
    }
}

#[async_trait]
impl BankLinkProvider for HttpBankLinkClient {
    async fn create_link_token(&self, user_id: Uuid) -> Result<LinkToken, ExternalError> {
        let body = self.authenticated(LinkTokenBody {
            client_user_id: user_id.to_string(),
            products: ["auth"],
        });
        self.api.post("/link/token/create", &body, None).await
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<AccessGrant, ExternalError> {
        let body = self.authenticated(PublicTokenBody { public_token });
        self.api.post("/item/public_token/exchange", &body, None).await
    }

    async fn accounts(&self, access_token: &str) -> Result<Vec<BankAccount>, ExternalError> {
        let body = self.authenticated(AccessTokenBody { access_token });
        let response: AccountsResponse = self.api.post("/accounts/get", &body, None).await?;
        Ok(response.accounts)
    }
}
