//! Payout reconciliation.
//!
//! Paid invoices are disbursed to the owner's connected account net of the
//! platform fee. Each invoice is tagged with the payout that covered it, so
//! an invoice can be part of at most one payout no matter how often the
//! batch runs.
//!
//! Only invoices whose completed payment the processor collected into the
//! platform account are owed. Invoices marked paid by hand were settled off
//! platform, and split charges already credited the connected account at
//! settlement; neither is ever disbursed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{BillingError, BillingResult};
use crate::models::payout::{Payout, PayoutDestination, PayoutStatus};
use crate::money::{from_minor_units, net_of_fee};
use crate::payments::processor::{PaymentProcessor, TransferRequest, TransferState};

/// Fee, threshold and settlement assumptions of a payout run.
#[derive(Debug, Clone, Copy)]
pub struct PayoutPolicy {
    pub fee_bps: u32,
    /// Balances below this are carried over to a later run
    pub minimum: Decimal,
    /// Assumed settlement delay when the processor reports no arrival date
    pub arrival_days: i64,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            fee_bps: 300,
            minimum: Decimal::new(1000, 2),
            arrival_days: 2,
        }
    }
}

impl PayoutPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fee_bps: config.platform_fee_bps,
            minimum: config.payout_minimum,
            arrival_days: config.payout_arrival_days,
        }
    }

    pub fn meets_minimum(&self, pending_minor: i64) -> bool {
        pending_minor > 0 && from_minor_units(pending_minor) >= self.minimum
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutFailure {
    pub user_id: Uuid,
    pub currency: Option<String>,
    pub error: String,
    pub retryable: bool,
}

/// Result of one batch. `total_amount` adds up payouts across currencies
/// and is meant for logs only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed_count: usize,
    pub skipped_count: usize,
    pub total_amount: Decimal,
    pub failures: Vec<PayoutFailure>,
}

/// Sum of fee-adjusted invoice totals in minor units. The fee is taken per
/// invoice, matching what the processor withholds at settlement.
pub fn pending_balance(totals: &[Decimal], fee_bps: u32) -> BillingResult<i64> {
    totals.iter().try_fold(0i64, |acc, total| {
        let net = net_of_fee(*total, fee_bps)?;
        acc.checked_add(net)
            .ok_or_else(|| BillingError::Internal("pending balance overflow".to_string()))
    })
}

/// Idempotency key of the transfer covering `invoice_ids`.
///
/// Derived from the covered set rather than generated, so a run that
/// crashed after the transfer but before commit presents the same key on
/// the next attempt and the processor returns the original transfer.
pub fn transfer_idempotency_key(user_id: Uuid, currency: &str, invoice_ids: &[Uuid]) -> String {
    let mut ids = invoice_ids.to_vec();
    ids.sort();

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(currency.to_ascii_uppercase().as_bytes());
    for id in &ids {
        hasher.update(id.as_bytes());
    }
    format!("payout-{}", hex::encode(hasher.finalize()))
}

/// Disburses pending balances to connected accounts.
#[derive(Clone)]
pub struct PayoutReconciler {
    pool: PgPool,
    processor: Arc<dyn PaymentProcessor>,
    policy: PayoutPolicy,
}

impl PayoutReconciler {
    pub fn new(pool: PgPool, processor: Arc<dyn PaymentProcessor>, policy: PayoutPolicy) -> Self {
        Self {
            pool,
            processor,
            policy,
        }
    }

    /// Runs one reconciliation pass over every destination with payouts
    /// enabled.
    ///
    /// Users (and currencies within a user) are settled in separate
    /// transactions. A failure is recorded in the summary and the batch
    /// moves on to the next user.
    #[instrument(skip(self), fields(as_of = %as_of))]
    pub async fn run_payout_batch(&self, as_of: DateTime<Utc>) -> BillingResult<BatchSummary> {
        let destinations = sqlx::query_as::<_, PayoutDestination>(
            r#"
            SELECT * FROM payout_destinations
            WHERE payouts_enabled = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        info!("Reconciling payouts for {} destination(s)", destinations.len());

        let mut summary = BatchSummary::default();

        for destination in &destinations {
            let currencies = match self.pending_currencies(destination.user_id, as_of).await {
                Ok(currencies) => currencies,
                Err(e) => {
                    error!(user_id = %destination.user_id, "Failed to load pending invoices: {}", e);
                    summary.failures.push(PayoutFailure {
                        user_id: destination.user_id,
                        currency: None,
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if currencies.is_empty() {
                summary.skipped_count += 1;
                continue;
            }

            for currency in currencies {
                match self.settle(destination, &currency, as_of).await {
                    Ok(Some(payout)) => {
                        summary.processed_count += 1;
                        summary.total_amount += payout.amount;
                    }
                    Ok(None) => summary.skipped_count += 1,
                    Err(e) => {
                        error!(
                            user_id = %destination.user_id,
                            currency = %currency,
                            "Payout failed: {}",
                            e
                        );
                        summary.failures.push(PayoutFailure {
                            user_id: destination.user_id,
                            currency: Some(currency),
                            retryable: e.is_retryable(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            processed = summary.processed_count,
            skipped = summary.skipped_count,
            failed = summary.failures.len(),
            total = %summary.total_amount,
            "Payout batch finished"
        );

        Ok(summary)
    }

    async fn pending_currencies(&self, user_id: Uuid, as_of: DateTime<Utc>) -> BillingResult<Vec<String>> {
        let currencies = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT currency FROM invoices
            WHERE user_id = $1
                AND status = 'paid'
                AND payout_id IS NULL
                AND paid_at <= $2
                AND EXISTS (
                    SELECT 1 FROM payments p
                    WHERE p.invoice_id = invoices.id
                        AND p.status = 'completed'
                        AND p.method = 'card'
                        AND p.external_ref IS NOT NULL
                        AND p.destination_account IS NULL
                )
            ORDER BY currency
            "#,
        )
        .bind(user_id)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;
        Ok(currencies)
    }

    /// Pays out one user's balance in one currency. Returns `None` when the
    /// balance is below the minimum; nothing is written in that case.
    async fn settle(
        &self,
        destination: &PayoutDestination,
        currency: &str,
        as_of: DateTime<Utc>,
    ) -> BillingResult<Option<Payout>> {
        let user_id = destination.user_id;
        let mut tx = self.pool.begin().await?;

        let invoices = sqlx::query_as::<_, (Uuid, Decimal)>(
            r#"
            SELECT id, total FROM invoices
            WHERE user_id = $1
                AND currency = $2
                AND status = 'paid'
                AND payout_id IS NULL
                AND paid_at <= $3
                AND EXISTS (
                    SELECT 1 FROM payments p
                    WHERE p.invoice_id = invoices.id
                        AND p.status = 'completed'
                        AND p.method = 'card'
                        AND p.external_ref IS NOT NULL
                        AND p.destination_account IS NULL
                )
            ORDER BY paid_at ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .bind(as_of)
        .fetch_all(&mut *tx)
        .await?;

        let (invoice_ids, totals): (Vec<Uuid>, Vec<Decimal>) = invoices.into_iter().unzip();
        let pending_minor = pending_balance(&totals, self.policy.fee_bps)?;

        if !self.policy.meets_minimum(pending_minor) {
            info!(
                user_id = %user_id,
                currency = %currency,
                pending = %from_minor_units(pending_minor),
                minimum = %self.policy.minimum,
                "Pending balance below payout minimum, skipping"
            );
            return Ok(None);
        }

        let request = TransferRequest {
            destination_account: destination.account_id.clone(),
            amount_minor: pending_minor,
            currency: currency.to_ascii_lowercase(),
            description: format!("Payout for {} invoice(s)", invoice_ids.len()),
            idempotency_key: transfer_idempotency_key(user_id, currency, &invoice_ids),
        };
        let receipt = self.processor.create_transfer(&request).await?;

        let status = match receipt.status {
            TransferState::Paid => PayoutStatus::Completed,
            TransferState::Pending => PayoutStatus::Requested,
        };
        let arrival_date = receipt
            .arrival_date
            .unwrap_or_else(|| as_of.date_naive() + Duration::days(self.policy.arrival_days));

        let payout = sqlx::query_as::<_, Payout>(
            r#"
            INSERT INTO payouts (
                id, user_id, destination_id, amount, currency, status,
                transfer_ref, arrival_date, invoice_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(destination.id)
        .bind(from_minor_units(pending_minor))
        .bind(currency)
        .bind(status)
        .bind(&receipt.id)
        .bind(arrival_date)
        .bind(invoice_ids.len() as i32)
        .fetch_one(&mut *tx)
        .await?;

        let tagged = sqlx::query(
            r#"
            UPDATE invoices
            SET payout_id = $1, updated_at = NOW()
            WHERE id = ANY($2)
            "#,
        )
        .bind(payout.id)
        .bind(&invoice_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if tagged != invoice_ids.len() as u64 {
            warn!(
                payout_id = %payout.id,
                expected = invoice_ids.len(),
                tagged,
                "Tagged fewer invoices than the payout covers"
            );
        }

        tx.commit().await?;

        info!(
            user_id = %user_id,
            payout_id = %payout.id,
            transfer_ref = %payout.transfer_ref,
            amount = %payout.amount,
            currency = %payout.currency,
            invoices = payout.invoice_count,
            "Payout created"
        );

        Ok(Some(payout))
    }
}
