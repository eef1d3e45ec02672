//! Error taxonomy shared by every component.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::invoice::InvoiceStatus;

/// Failure of a call to an external service (payment processor, bank-link
/// aggregator, mail transport).
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("{service} unreachable: {message}")]
    Network { service: &'static str, message: String },

    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("{service} rejected the request ({status}): {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} returned an unreadable response: {message}")]
    Decode { service: &'static str, message: String },
}

impl ExternalError {
    /// Whether the caller may safely re-issue the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExternalError::Network { .. } | ExternalError::Timeout { .. } => true,
            ExternalError::Rejected { status, .. } => *status == 429 || *status >= 500,
            ExternalError::Decode { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Monthly invoice quota of {limit} reached")]
    QuotaExceeded { limit: i32 },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invoice cannot move from {from} to {to}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Invalid webhook event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Transient failures the caller may retry. Input, quota and signature
    /// failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::External(e) => e.is_retryable(),
            BillingError::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::Validation(_) | BillingError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            BillingError::SignatureInvalid => StatusCode::BAD_REQUEST,
            BillingError::QuotaExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            BillingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BillingError::InvalidTransition { .. } => StatusCode::CONFLICT,
            BillingError::Unauthorized => StatusCode::UNAUTHORIZED,
            BillingError::External(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::External(_) => StatusCode::BAD_GATEWAY,
            BillingError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BillingError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::Database(_) | BillingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retryable = self.is_retryable();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            match &self {
                // Store errors can carry SQL fragments
                BillingError::Database(_) | BillingError::Internal(_) => {
                    "internal error".to_string()
                }
                other => other.to_string(),
            }
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
            self.to_string()
        };

        let body = Json(serde_json::json!({
            "error": message,
            "retryable": retryable,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_network_errors_are_retryable() {
        let err = BillingError::from(ExternalError::Network {
            service: "payment processor",
            message: "connection reset".into(),
        });
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_client_rejections_are_terminal() {
        let err = BillingError::from(ExternalError::Rejected {
            service: "payment processor",
            status: 400,
            message: "amount too small".into(),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let throttled = ExternalError::Rejected {
            service: "payment processor",
            status: 429,
            message: "slow down".into(),
        };
        assert!(throttled.is_retryable());
    }

    #[test]
    fn test_caller_errors_map_to_client_statuses() {
        assert_eq!(
            BillingError::QuotaExceeded { limit: 3 }.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            BillingError::not_found("invoice", "abc").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BillingError::InvalidTransition {
                from: InvoiceStatus::Paid,
                to: InvoiceStatus::Draft,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert!(!BillingError::SignatureInvalid.is_retryable());
    }
}
