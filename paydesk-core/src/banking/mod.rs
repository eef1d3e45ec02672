//! Bank-linking aggregator boundary. Used to verify the bank account behind
//! a payout destination; no funds move through it.

pub mod link;
pub mod provider;

pub use link::{exchange_and_store, refresh_accounts};
pub use provider::{AccessGrant, BankAccount, BankLinkProvider, HttpBankLinkClient, LinkToken};
