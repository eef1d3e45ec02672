use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::banking::provider::{BankAccount, BankLinkProvider};
use crate::error::{BillingError, BillingResult};
use crate::models::bank_link::BankLink;

/// Exchanges a short-lived public token for a durable grant and stores it.
/// A user has at most one link; relinking replaces the stored grant.
#[instrument(skip(pool, provider, public_token), fields(user_id = %user_id))]
pub async fn exchange_and_store(
    pool: &PgPool,
    provider: &dyn BankLinkProvider,
    user_id: Uuid,
    public_token: &str,
) -> BillingResult<BankLink> {
    if public_token.trim().is_empty() {
        return Err(BillingError::validation("public token is required"));
    }

    let grant = provider.exchange_public_token(public_token).await?;

    let link = sqlx::query_as::<_, BankLink>(
        r#"
        INSERT INTO bank_links (id, user_id, item_id, access_token, institution_name)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO UPDATE
        SET
            item_id = EXCLUDED.item_id,
            access_token = EXCLUDED.access_token,
            institution_name = EXCLUDED.institution_name,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&grant.item_id)
    .bind(&grant.access_token)
    .bind(grant.institution_name.as_deref())
    .fetch_one(pool)
    .await?;

    info!(item_id = %link.item_id, "Bank link stored");
    Ok(link)
}

/// Re-queries account metadata for the user's stored link.
pub async fn refresh_accounts(
    pool: &PgPool,
    provider: &dyn BankLinkProvider,
    user_id: Uuid,
) -> BillingResult<Vec<BankAccount>> {
    let link = sqlx::query_as::<_, BankLink>("SELECT * FROM bank_links WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BillingError::not_found("bank link", user_id))?;

    Ok(provider.accounts(&link.access_token).await?)
}
