pub mod lifecycle;
pub mod status;
pub mod totals;

pub use lifecycle::{
    attach_payment_reference, check_settlement, create_invoice, get_invoice, list_invoices,
    mark_overdue, mark_paid, record_failed_payment, send_invoice, transition_status,
};
pub use status::{InvoiceStateMachine, StatusChange};
pub use totals::{compute_totals, InvoiceTotals};
