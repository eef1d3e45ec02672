//! Shared JSON-over-HTTP plumbing for the payment processor and the
//! bank-link aggregator clients.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::ExternalError;

/// A base URL, an optional bearer credential and a client with a request
/// timeout.
#[derive(Clone)]
pub struct JsonApi {
    service: &'static str,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl JsonApi {
    pub fn new(
        service: &'static str,
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::Network {
                service,
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POSTs `body` as JSON. An idempotency key lets the remote side
    /// deduplicate retried requests.
    pub async fn post<B, R>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: Option<&str>,
    ) -> Result<R, ExternalError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        self.execute(request).await
    }

    pub async fn get<R>(&self, path: &str) -> Result<R, ExternalError>
    where
        R: DeserializeOwned,
    {
        self.execute(self.client.get(self.url(path))).await
    }

    async fn execute<R>(&self, request: RequestBuilder) -> Result<R, ExternalError>
    where
        R: DeserializeOwned,
    {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check_status(response).await?;
        response.json::<R>().await.map_err(|e| ExternalError::Decode {
            service: self.service,
            message: e.to_string(),
        })
    }

    async fn check_status(&self, response: Response) -> Result<Response, ExternalError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        debug!(service = self.service, status = status.as_u16(), "Remote call rejected");
        Err(ExternalError::Rejected {
            service: self.service,
            status: status.as_u16(),
            message,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> ExternalError {
        if error.is_timeout() {
            ExternalError::Timeout {
                service: self.service,
            }
        } else {
            ExternalError::Network {
                service: self.service,
                message: error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let api = JsonApi::new(
            "payment processor",
            "https://api.processor.test/",
            Some("sk_test"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(api.url("/v1/transfers"), "https://api.processor.test/v1/transfers");
        assert_eq!(api.url("v1/accounts/acct_1"), "https://api.processor.test/v1/accounts/acct_1");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_retryable_network_error() {
        // Port 9 (discard) on loopback refuses connections on CI hosts
        let api = JsonApi::new(
            "payment processor",
            "http://127.0.0.1:9",
            Some("sk_test"),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = api
            .get::<serde_json::Value>("/v1/accounts/acct_1")
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
