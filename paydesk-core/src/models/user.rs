use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription plan. Only the free plan is subject to the monthly
/// invoice cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Business,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Pro, Plan::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Business => "business",
        }
    }

    pub fn is_capped(&self) -> bool {
        matches!(self, Plan::Free)
    }

    /// Names of the plans subject to the monthly cap, as stored.
    pub fn capped_names() -> Vec<&'static str> {
        Plan::ALL
            .iter()
            .filter(|plan| plan.is_capped())
            .map(Plan::as_str)
            .collect()
    }
}

/// User model representing an account holder.
///
/// Maps to the `users` table and carries the plan, the monthly usage
/// counter and the per-user invoice number sequence.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique identifier for the user
    pub id: Uuid,

    /// User's email address (unique)
    pub email: String,

    /// Bcrypt hashed password
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// User's full name
    pub full_name: Option<String>,

    /// Subscription plan
    pub plan: Plan,

    /// Monthly invoice cap, enforced for the free plan
    pub max_invoices: i32,

    /// Invoices counted toward the current period
    pub invoices_this_month: i32,

    /// Last issued invoice sequence number
    pub invoice_seq: i64,

    /// Timestamp when the user was created
    pub created_at: DateTime<Utc>,

    /// Timestamp when the user was last updated
    pub updated_at: DateTime<Utc>,
}

/// User creation request (without password hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// User response (public representation, excludes sensitive data)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub plan: Plan,
    pub max_invoices: i32,
    pub invoices_this_month: i32,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            plan: user.plan,
            max_invoices: user.max_invoices,
            invoices_this_month: user.invoices_this_month,
            created_at: user.created_at,
        }
    }
}
