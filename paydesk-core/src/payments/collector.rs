use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::invoices;
use crate::models::invoice::InvoiceStatus;
use crate::models::payout::PayoutDestination;
use crate::money::{split_fee, to_minor_units, FeeSplit};
use crate::payments::processor::{CheckoutRequest, PaymentProcessor};
use crate::payouts::destination::find_destination;

/// Opaque handle a payer uses to settle an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayableReference {
    pub session_id: String,
    pub url: String,
    /// Present when settlement is split with a connected account
    pub split: Option<FeeSplit>,
}

/// Mints payable references through the configured processor.
#[derive(Clone)]
pub struct PaymentCollector {
    processor: Arc<dyn PaymentProcessor>,
    fee_bps: u32,
}

impl PaymentCollector {
    pub fn new(processor: Arc<dyn PaymentProcessor>, fee_bps: u32) -> Self {
        Self { processor, fee_bps }
    }

    pub fn processor(&self) -> &Arc<dyn PaymentProcessor> {
        &self.processor
    }

    /// Creates a payable reference for `amount_minor` tied to `invoice_id`.
    ///
    /// With an onboarded destination the processor withholds the platform
    /// fee and routes the rest to the destination at settlement. Without one
    /// (or with onboarding incomplete) the full amount goes to the platform.
    ///
    /// Processor failures are returned unchanged; network and timeout
    /// failures are retryable.
    pub async fn create_payable_reference(
        &self,
        invoice_id: Uuid,
        amount_minor: i64,
        currency: &str,
        destination: Option<&PayoutDestination>,
    ) -> BillingResult<PayableReference> {
        if amount_minor <= 0 {
            return Err(BillingError::validation("amount to collect must be positive"));
        }

        let routed = destination.filter(|d| d.is_ready());
        if let Some(dest) = destination {
            if routed.is_none() {
                warn!(
                    account_id = %dest.account_id,
                    "Destination onboarding incomplete, collecting to platform account"
                );
            }
        }

        let split = match routed {
            Some(_) => Some(split_fee(amount_minor, self.fee_bps)?),
            None => None,
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("invoice_id".to_string(), invoice_id.to_string());
        if let Some(dest) = routed {
            // Echoed back in the paid event so the payment is recorded as split
            metadata.insert("destination_account".to_string(), dest.account_id.clone());
        }

        let request = CheckoutRequest {
            invoice_id,
            amount_minor,
            currency: currency.to_ascii_lowercase(),
            destination_account: routed.map(|d| d.account_id.clone()),
            application_fee_minor: split.map(|s| s.platform_fee),
            metadata,
        };

        let session = self.processor.create_checkout(&request).await?;

        info!(
            invoice_id = %invoice_id,
            session_id = %session.id,
            amount_minor,
            fee_minor = ?request.application_fee_minor,
            "Payable reference created"
        );

        Ok(PayableReference {
            session_id: session.id,
            url: session.url,
            split,
        })
    }

    /// Creates a payable reference for an unpaid invoice of `user_id` and
    /// attaches it to the invoice.
    #[instrument(skip(self, pool), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn collect_for_invoice(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> BillingResult<PayableReference> {
        let detail = invoices::get_invoice(pool, user_id, invoice_id).await?;
        let invoice = detail.invoice;
        if invoice.status == InvoiceStatus::Paid {
            return Err(BillingError::validation(format!(
                "invoice {} is already paid",
                invoice.invoice_number
            )));
        }

        let destination = find_destination(pool, user_id).await?;
        let amount_minor = to_minor_units(invoice.total)?;

        let reference = self
            .create_payable_reference(invoice.id, amount_minor, &invoice.currency, destination.as_ref())
            .await?;

        invoices::attach_payment_reference(pool, user_id, invoice.id, &reference.url).await?;
        Ok(reference)
    }
}
