pub mod destination;
pub mod reconciler;

pub use destination::{find_destination, refresh_destination, setup_destination};
pub use reconciler::{
    pending_balance, transfer_idempotency_key, BatchSummary, PayoutFailure, PayoutPolicy, PayoutReconciler,
};
