//! Account registration, password login and monthly usage.

use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::user::{CreateUser, Credentials, Plan, User};

const MIN_PASSWORD_LEN: usize = 8;

fn validate_registration(input: &CreateUser) -> BillingResult<()> {
    let email = input.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(BillingError::validation("a valid email address is required"));
    }
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(BillingError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Creates a free-plan user capped at `invoice_cap` invoices a month.
pub async fn register(pool: &PgPool, input: CreateUser, invoice_cap: i32) -> BillingResult<User> {
    validate_registration(&input)?;
    let email = input.email.trim().to_lowercase();

    let password = input.password;
    let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| BillingError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| BillingError::Internal(format!("password hashing failed: {}", e)))?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, password_hash, full_name, plan, max_invoices)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&password_hash)
    .bind(input.full_name.as_deref())
    .bind(Plan::Free)
    .bind(invoice_cap)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| BillingError::validation("an account with this email already exists"))?;

    info!(user_id = %user.id, "Registered user");
    Ok(user)
}

/// Checks a password login. Unknown emails and wrong passwords fail the
/// same way.
pub async fn authenticate(pool: &PgPool, credentials: Credentials) -> BillingResult<User> {
    let email = credentials.email.trim().to_lowercase();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    let Some(user) = user else {
        warn!("Login attempt for unknown email");
        return Err(BillingError::Unauthorized);
    };

    let hash = user.password_hash.clone();
    let password = credentials.password;
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| BillingError::Internal(format!("hashing task failed: {}", e)))?
        .unwrap_or(false);

    if !valid {
        warn!(user_id = %user.id, "Login attempt with wrong password");
        return Err(BillingError::Unauthorized);
    }
    Ok(user)
}

/// Starts a new usage period for every user. Returns the number of users
/// whose counter was reset.
pub async fn reset_monthly_usage(pool: &PgPool) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET invoices_this_month = 0, updated_at = NOW()
        WHERE invoices_this_month > 0
        "#,
    )
    .execute(pool)
    .await?;

    info!(count = result.rows_affected(), "Monthly invoice usage reset");
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(email: &str, password: &str) -> CreateUser {
        CreateUser {
            email: email.into(),
            password: password.into(),
            full_name: None,
        }
    }

    #[test]
    fn test_registration_requires_email_and_password() {
        assert!(validate_registration(&registration("a@b.test", "long enough")).is_ok());
        assert!(validate_registration(&registration("", "long enough")).is_err());
        assert!(validate_registration(&registration("not-an-email", "long enough")).is_err());
        assert!(validate_registration(&registration("a@b.test", "short")).is_err());
    }
}
