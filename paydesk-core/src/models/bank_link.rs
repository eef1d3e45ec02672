use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Durable aggregator credential for a user's linked bank. Only used to
/// re-query account metadata; money never moves through it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BankLink {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub institution_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
