use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::error::{BillingError, BillingResult};

pub mod collector;
pub mod http;
pub mod processor;
pub mod sandbox;
pub mod webhook;

pub use collector::{PayableReference, PaymentCollector};
pub use http::HttpPaymentProcessor;
pub use processor::{
    CheckoutRequest, CheckoutSession, ConnectedAccount, OnboardingLink, PaymentProcessor,
    TransferReceipt, TransferRequest, TransferState,
};
pub use sandbox::SandboxProcessor;
pub use webhook::{on_external_confirmation, verify_signature, Confirmation, Outcome};

/// Builds the processor the server collects through.
///
/// The sandbox is used only when no processor is configured and
/// `PROCESSOR_SANDBOX` is set; otherwise a missing processor is an error.
pub fn processor_from_config(config: &Config) -> BillingResult<Arc<dyn PaymentProcessor>> {
    match &config.processor {
        Some(processor) => Ok(Arc::new(HttpPaymentProcessor::new(processor, config.external_timeout)?)),
        None if config.processor_sandbox => {
            warn!("PROCESSOR_SANDBOX set, using the sandbox payment processor; no money moves");
            Ok(Arc::new(SandboxProcessor::auto_approving()))
        }
        None => Err(BillingError::Unavailable("payment processor")),
    }
}
