use crate::error::{BillingError, BillingResult};
use crate::models::invoice::InvoiceStatus;

/// Outcome of asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Write the new status
    Apply(InvoiceStatus),
    /// Already in the requested state; nothing to write
    Unchanged,
}

/// Transition rules for invoice status.
///
/// - Draft -> Sent
/// - Sent -> Overdue
/// - Draft | Sent | Overdue -> Paid
/// - Paid -> Paid is a no-op; a paid invoice never moves back
pub struct InvoiceStateMachine;

impl InvoiceStateMachine {
    pub fn transition(current: InvoiceStatus, requested: InvoiceStatus) -> BillingResult<StatusChange> {
        use InvoiceStatus::*;

        if current == requested {
            return Ok(StatusChange::Unchanged);
        }

        match (current, requested) {
            (Draft, Sent) | (Sent, Overdue) => Ok(StatusChange::Apply(requested)),
            (Draft | Sent | Overdue, Paid) => Ok(StatusChange::Apply(Paid)),
            (from, to) => Err(BillingError::InvalidTransition { from, to }),
        }
    }

    pub fn can_transition(current: InvoiceStatus, requested: InvoiceStatus) -> bool {
        Self::transition(current, requested).is_ok()
    }
}
