use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use rust_decimal::Decimal;

/// Connection settings for an HTTP API guarded by a bearer key.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Credentials for the bank-linking aggregator.
#[derive(Debug, Clone)]
pub struct BankLinkConfig {
    pub base_url: String,
    pub client_id: String,
    pub secret: String,
}

/// Runtime configuration, read from the environment (and `.env` when the
/// binaries call `dotenv()` first).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub webhook_secret: String,
    pub processor: Option<ProcessorConfig>,
    /// Allows the server to fall back to the in-process sandbox processor
    /// when no processor is configured
    pub processor_sandbox: bool,
    pub bank_link: Option<BankLinkConfig>,
    pub platform_fee_bps: u32,
    pub payout_minimum: Decimal,
    pub payout_arrival_days: i64,
    pub free_plan_invoice_cap: i32,
    pub external_timeout: Duration,
    pub sender_name: String,
    pub onboarding_return_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> anyhow::Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("{} must be set", key))
        };

        let processor = match lookup("PROCESSOR_BASE_URL") {
            Some(base_url) if !base_url.trim().is_empty() => Some(ProcessorConfig {
                base_url,
                api_key: required("PROCESSOR_API_KEY")?,
            }),
            _ => None,
        };

        let bank_link = match lookup("BANK_LINK_BASE_URL") {
            Some(base_url) if !base_url.trim().is_empty() => Some(BankLinkConfig {
                base_url,
                client_id: required("BANK_LINK_CLIENT_ID")?,
                secret: required("BANK_LINK_SECRET")?,
            }),
            _ => None,
        };

        let platform_fee_bps: u32 = parsed(&lookup, "PLATFORM_FEE_BPS", 300)?;
        if platform_fee_bps > 10_000 {
            return Err(anyhow!("PLATFORM_FEE_BPS cannot exceed 10000"));
        }

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parsed(&lookup, "SERVER_PORT", 3000)?,
            jwt_secret: required("JWT_SECRET")?,
            token_ttl_hours: parsed(&lookup, "TOKEN_TTL_HOURS", 24)?,
            webhook_secret: required("WEBHOOK_SECRET")?,
            processor,
            processor_sandbox: flag(&lookup, "PROCESSOR_SANDBOX")?,
            bank_link,
            platform_fee_bps,
            payout_minimum: parsed(&lookup, "PAYOUT_MINIMUM", Decimal::TEN)?,
            payout_arrival_days: parsed(&lookup, "PAYOUT_ARRIVAL_DAYS", 2)?,
            free_plan_invoice_cap: parsed(&lookup, "FREE_PLAN_INVOICE_CAP", 3)?,
            external_timeout: Duration::from_secs(parsed(&lookup, "EXTERNAL_TIMEOUT_SECONDS", 15)?),
            sender_name: lookup("SENDER_NAME").unwrap_or_else(|| "Paydesk".to_string()),
            onboarding_return_url: lookup("ONBOARDING_RETURN_URL")
                .unwrap_or_else(|| "http://localhost:3000/settings/payouts".to_string()),
        })
    }
}

fn flag<F>(lookup: &F, key: &str) -> anyhow::Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => Err(anyhow!("Invalid {}: {:?}", key, other)),
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
