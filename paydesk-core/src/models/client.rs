use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A user's customer.
///
/// Clients are archived rather than deleted so that the invoices that
/// reference them keep their history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    pub name: String,
    pub email: String,

    /// Postal address, free form
    pub address: Option<String>,

    pub company: Option<String>,
    pub phone: Option<String>,

    /// Set when the client was archived; archived clients cannot be
    /// invoiced
    pub archived_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    pub address: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
}

impl NewClient {
    pub fn validate(&self) -> BillingResult<()> {
        if self.name.trim().is_empty() {
            return Err(BillingError::validation("client name is required"));
        }
        let email = self.email.trim();
        if email.is_empty() {
            return Err(BillingError::validation("client email is required"));
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(BillingError::validation(format!(
                "client email {:?} is not an email address",
                email
            )));
        }
        Ok(())
    }
}
