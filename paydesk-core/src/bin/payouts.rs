use std::sync::Arc;

use chrono::Utc;
use dotenv::dotenv;
use paydesk_core::payments::{HttpPaymentProcessor, PaymentProcessor};
use paydesk_core::payouts::{PayoutPolicy, PayoutReconciler};
use paydesk_core::{accounts, db, invoices, Config};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: payouts [run | overdue | reset-usage]";

/// Operator entry point for the periodic jobs.
///
/// Runs one pass and exits so an external scheduler (cron, a k8s CronJob)
/// owns the cadence:
/// - `run` (default): overdue sweep, then one payout reconciliation batch
/// - `overdue`: only the overdue sweep
/// - `reset-usage`: starts a new monthly invoice usage period
///
/// `run` requires a configured payment processor. Exits non-zero when any
/// payout in the batch failed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());

    let config = Config::from_env()?;
    let db_pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(&db_pool).await?;

    let today = Utc::now().date_naive();

    match command.as_str() {
        "overdue" => {
            let moved = invoices::mark_overdue(&db_pool, today).await?;
            info!("Overdue sweep moved {} invoice(s)", moved);
        }
        "reset-usage" => {
            let reset = accounts::reset_monthly_usage(&db_pool).await?;
            info!("Reset monthly usage for {} user(s)", reset);
        }
        "run" => {
            let moved = invoices::mark_overdue(&db_pool, today).await?;
            info!("Overdue sweep moved {} invoice(s)", moved);

            // Payouts only run against a real processor
            let Some(processor_config) = &config.processor else {
                anyhow::bail!("PROCESSOR_BASE_URL must be set to run payouts");
            };
            let processor: Arc<dyn PaymentProcessor> =
                Arc::new(HttpPaymentProcessor::new(processor_config, config.external_timeout)?);

            let reconciler = PayoutReconciler::new(db_pool.clone(), processor, PayoutPolicy::from_config(&config));
            let summary = reconciler.run_payout_batch(Utc::now()).await?;

            info!(
                "Payout batch: {} processed, {} skipped, {} failed, {} disbursed",
                summary.processed_count,
                summary.skipped_count,
                summary.failures.len(),
                summary.total_amount
            );

            if !summary.failures.is_empty() {
                for failure in &summary.failures {
                    error!(
                        user_id = %failure.user_id,
                        currency = ?failure.currency,
                        retryable = failure.retryable,
                        "{}",
                        failure.error
                    );
                }
                anyhow::bail!("{} payout(s) failed", summary.failures.len());
            }
        }
        other => {
            anyhow::bail!("unknown command {:?}\n{}", other, USAGE);
        }
    }

    Ok(())
}
