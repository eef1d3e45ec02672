use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::{BillingError, BillingResult};
use crate::invoices;
use crate::models::payment::{PaymentMethod, PaymentRecord};
use crate::payments::webhook::{on_external_confirmation, Outcome, SIGNATURE_HEADER};

/// Processor event endpoint.
///
/// The signature is checked against the raw body before anything is
/// parsed. Rejected events are logged and answered with `400`; the
/// processor does not retry those.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> BillingResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let confirmation =
        on_external_confirmation(&body, signature, &state.webhook_secret, Utc::now().timestamp()).map_err(|e| {
            warn!("Dropping processor event: {}", e);
            e
        })?;

    match confirmation.outcome {
        Outcome::Paid {
            amount,
            currency,
            transaction_id,
            paid_at,
            destination_account,
        } => {
            let invoice_id = confirmation
                .invoice_id
                .ok_or_else(|| BillingError::InvalidEvent("paid event without invoice id".into()))?;
            info!(
                event_id = %confirmation.event_id,
                invoice_id = %invoice_id,
                amount = %amount,
                currency = ?currency,
                destination = ?destination_account,
                "Payment confirmed"
            );
            let record = PaymentRecord {
                amount,
                method: PaymentMethod::Card,
                external_ref: Some(transaction_id),
                paid_at,
                currency,
                destination_account,
            };
            invoices::mark_paid(&state.db, invoice_id, record).await?;
        }
        Outcome::Failed { transaction_id, reason } => {
            warn!(event_id = %confirmation.event_id, reason = %reason, "Payment failed");
            if let Some(invoice_id) = confirmation.invoice_id {
                invoices::record_failed_payment(&state.db, invoice_id, transaction_id.as_deref()).await?;
            }
        }
        Outcome::Ignored => {}
    }

    Ok(Json(serde_json::json!({ "received": true })))
}
