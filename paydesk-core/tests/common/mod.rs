//! Helpers for the database-backed tests. Every test creates its own user
//! so the tests can share one database and run in parallel.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use paydesk_core::accounts;
use paydesk_core::db;
use paydesk_core::models::client::NewClient;
use paydesk_core::models::invoice::{ClientRef, NewInvoice, NewLineItem};
use paydesk_core::models::user::{CreateUser, User};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

/// Connects to `DATABASE_URL` and applies the migrations.
pub async fn create_test_pool() -> Result<PgPool, anyhow::Error> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL not set for tests"))?;

    let pool = db::create_pool(&database_url, 5).await?;
    db::run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn create_user(pool: &PgPool, invoice_cap: i32) -> User {
    accounts::register(
        pool,
        CreateUser {
            email: format!("user-{}@paydesk.test", Uuid::new_v4().simple()),
            password: "correct horse battery".to_string(),
            full_name: Some("Test User".to_string()),
        },
        invoice_cap,
    )
    .await
    .expect("register user")
}

pub fn new_client() -> NewClient {
    NewClient {
        name: "Acme Corp".to_string(),
        email: "billing@acme.test".to_string(),
        address: None,
        company: Some("Acme".to_string()),
        phone: None,
    }
}

pub fn line(description: &str, quantity: i32, rate: Decimal) -> NewLineItem {
    NewLineItem {
        description: description.to_string(),
        quantity,
        rate,
    }
}

pub fn invoice_for(client: ClientRef, line_items: Vec<NewLineItem>, tax_rate: Decimal) -> NewInvoice {
    NewInvoice {
        client,
        due_date: (Utc::now() + Duration::days(30)).date_naive(),
        issue_date: None,
        currency: None,
        line_items,
        tax_rate,
        notes: None,
    }
}

pub async fn usage(pool: &PgPool, user_id: Uuid) -> i32 {
    sqlx::query_scalar::<_, i32>("SELECT invoices_this_month FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("usage query")
}
