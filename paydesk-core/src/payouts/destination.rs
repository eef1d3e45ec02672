//! Payout destination onboarding.

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::payout::PayoutDestination;
use crate::payments::processor::{OnboardingLink, PaymentProcessor};

pub async fn find_destination(pool: &PgPool, user_id: Uuid) -> BillingResult<Option<PayoutDestination>> {
    let destination = sqlx::query_as::<_, PayoutDestination>(
        "SELECT * FROM payout_destinations WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(destination)
}

/// Returns an onboarding link for the user's connected account, creating
/// the account at the processor on first use.
///
/// The user row is locked for the duration, so two concurrent requests
/// cannot both create an account.
#[instrument(skip(pool, processor), fields(user_id = %user_id))]
pub async fn setup_destination(
    pool: &PgPool,
    processor: &dyn PaymentProcessor,
    user_id: Uuid,
    return_url: &str,
) -> BillingResult<(PayoutDestination, OnboardingLink)> {
    let mut tx = pool.begin().await?;

    let email = sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| BillingError::not_found("user", user_id))?;

    let existing = sqlx::query_as::<_, PayoutDestination>(
        "SELECT * FROM payout_destinations WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let destination = match existing {
        Some(destination) => destination,
        None => {
            let account = processor.create_account(&email).await?;
            let destination = sqlx::query_as::<_, PayoutDestination>(
                r#"
                INSERT INTO payout_destinations (
                    id, user_id, account_id, details_submitted, charges_enabled, payouts_enabled
                ) VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&account.id)
            .bind(account.details_submitted)
            .bind(account.charges_enabled)
            .bind(account.payouts_enabled)
            .fetch_one(&mut *tx)
            .await?;
            info!(account_id = %destination.account_id, "Connected account created");
            destination
        }
    };

    tx.commit().await?;

    let link = processor
        .create_onboarding_link(&destination.account_id, return_url)
        .await?;
    Ok((destination, link))
}

/// Polls the processor for the account's onboarding state and stores the
/// three flags.
#[instrument(skip(pool, processor), fields(user_id = %user_id))]
pub async fn refresh_destination(
    pool: &PgPool,
    processor: &dyn PaymentProcessor,
    user_id: Uuid,
) -> BillingResult<PayoutDestination> {
    let mut tx = pool.begin().await?;

    let destination = sqlx::query_as::<_, PayoutDestination>(
        "SELECT * FROM payout_destinations WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| BillingError::not_found("payout destination", user_id))?;

    let account = processor.retrieve_account(&destination.account_id).await?;

    let updated = sqlx::query_as::<_, PayoutDestination>(
        r#"
        UPDATE payout_destinations
        SET details_submitted = $2, charges_enabled = $3, payouts_enabled = $4, updated_at = $5
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(destination.id)
    .bind(account.details_submitted)
    .bind(account.charges_enabled)
    .bind(account.payouts_enabled)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    if updated.is_ready() && !destination.is_ready() {
        info!(account_id = %updated.account_id, "Payout destination onboarding complete");
    }
    Ok(updated)
}
