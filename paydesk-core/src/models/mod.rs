pub mod bank_link;
pub mod client;
pub mod invoice;
pub mod payment;
pub mod payout;
pub mod user;

pub use bank_link::BankLink;
pub use client::{Client, NewClient};
pub use invoice::{ClientRef, Invoice, InvoiceDetail, InvoiceStatus, LineItem, NewInvoice, NewLineItem};
pub use payment::{Payment, PaymentMethod, PaymentRecord, PaymentStatus};
pub use payout::{Payout, PayoutDestination, PayoutStatus};
pub use user::{Plan, User};
