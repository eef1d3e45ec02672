//! Paydesk core: invoicing, payment collection and payout reconciliation.
//!
//! The crate is organised around three money-bearing components:
//!
//! - [`invoices`] owns invoice creation and every status transition,
//! - [`payments`] talks to the payment processor and verifies its webhooks,
//! - [`payouts`] disburses fee-adjusted balances to connected accounts.
//!
//! Everything else (clients, accounts, notifications, bank linking and the
//! HTTP surface) is plumbing around those three.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod banking;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod external;
pub mod invoices;
pub mod models;
pub mod money;
pub mod notify;
pub mod payments;
pub mod payouts;

pub use config::Config;
pub use error::{BillingError, BillingResult, ExternalError};
