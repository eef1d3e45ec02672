//! Client records. Clients are archived, never deleted.

use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::client::{Client, NewClient};

/// Inserts a client on an open connection so that invoice creation can
/// create one inside its own transaction.
pub async fn insert_client(
    conn: &mut PgConnection,
    user_id: Uuid,
    input: &NewClient,
) -> BillingResult<Client> {
    input.validate()?;

    let client = sqlx::query_as::<_, Client>(
        r#"
        INSERT INTO clients (id, user_id, name, email, address, company, phone)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(input.name.trim())
    .bind(input.email.trim())
    .bind(input.address.as_deref())
    .bind(input.company.as_deref())
    .bind(input.phone.as_deref())
    .fetch_one(conn)
    .await?;

    Ok(client)
}

pub async fn create_client(pool: &PgPool, user_id: Uuid, input: &NewClient) -> BillingResult<Client> {
    let mut conn = pool.acquire().await?;
    let client = insert_client(&mut conn, user_id, input).await?;
    info!(client_id = %client.id, user_id = %user_id, "Created client");
    Ok(client)
}

pub async fn get_client(pool: &PgPool, user_id: Uuid, client_id: Uuid) -> BillingResult<Client> {
    sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1 AND user_id = $2")
        .bind(client_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BillingError::not_found("client", client_id))
}

/// Active clients of a user, by name.
pub async fn list_clients(pool: &PgPool, user_id: Uuid) -> BillingResult<Vec<Client>> {
    let clients = sqlx::query_as::<_, Client>(
        r#"
        SELECT * FROM clients
        WHERE user_id = $1 AND archived_at IS NULL
        ORDER BY name ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(clients)
}

/// Locks an active client of `user_id` for the rest of the transaction so
/// it cannot be archived while an invoice is being attached to it.
pub async fn lock_active_client(
    conn: &mut PgConnection,
    user_id: Uuid,
    client_id: Uuid,
) -> BillingResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM clients
        WHERE id = $1 AND user_id = $2 AND archived_at IS NULL
        FOR SHARE
        "#,
    )
    .bind(client_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| BillingError::not_found("client", client_id))
}

/// Archives a client. Its invoices stay untouched; archiving twice keeps
/// the first timestamp.
pub async fn archive_client(pool: &PgPool, user_id: Uuid, client_id: Uuid) -> BillingResult<Client> {
    let client = sqlx::query_as::<_, Client>(
        r#"
        UPDATE clients
        SET archived_at = COALESCE(archived_at, NOW()), updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(client_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| BillingError::not_found("client", client_id))?;

    info!(client_id = %client_id, user_id = %user_id, "Archived client");
    Ok(client)
}
