//! Payout reconciliation against a live database.
//!
//! Batches scan every destination in the database, so assertions are made
//! per user rather than on batch-wide counts. The tests take a lock so one
//! test's batch never settles another test's users through a different
//! sandbox. Paid invoices are confirmed the way the processor confirms them
//! unless a test says otherwise.

mod common;

use std::sync::Arc;

use chrono::Utc;
use paydesk_core::invoices;
use paydesk_core::models::invoice::{ClientRef, Invoice, InvoiceStatus};
use paydesk_core::models::payment::{PaymentMethod, PaymentRecord};
use paydesk_core::models::payout::{Payout, PayoutDestination, PayoutStatus};
use paydesk_core::models::user::User;
use paydesk_core::payments::{PaymentCollector, SandboxProcessor, TransferRequest};
use paydesk_core::payouts::{destination, PayoutPolicy, PayoutReconciler};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use common::{create_test_pool, create_user, invoice_for, line, new_client};

static BATCH_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn onboarded_user(pool: &PgPool, sandbox: &SandboxProcessor) -> (User, PayoutDestination) {
    let user = create_user(pool, 10).await;
    let (dest, link) = destination::setup_destination(pool, sandbox, user.id, "http://localhost/return")
        .await
        .unwrap();
    assert!(link.url.contains(&dest.account_id));
    assert!(dest.is_ready());
    (user, dest)
}

async fn draft_invoice(pool: &PgPool, user_id: Uuid, amount: Decimal) -> Invoice {
    invoices::create_invoice(
        pool,
        user_id,
        invoice_for(ClientRef::New(new_client()), vec![line("Work", 1, amount)], dec!(0)),
    )
    .await
    .unwrap()
    .invoice
}

fn processor_payment(invoice: &Invoice, destination_account: Option<&str>) -> PaymentRecord {
    PaymentRecord {
        amount: invoice.total,
        method: PaymentMethod::Card,
        external_ref: Some(format!("pi_{}", invoice.id.simple())),
        paid_at: Utc::now(),
        currency: Some(invoice.currency.clone()),
        destination_account: destination_account.map(str::to_string),
    }
}

/// An invoice the processor collected into the platform account.
async fn paid_invoice(pool: &PgPool, user_id: Uuid, amount: Decimal) -> Invoice {
    let draft = draft_invoice(pool, user_id, amount).await;
    invoices::mark_paid(pool, draft.id, processor_payment(&draft, None))
        .await
        .unwrap()
}

fn transfers_to(transfers: Vec<TransferRequest>, account_id: &str) -> Vec<i64> {
    transfers
        .into_iter()
        .filter(|t| t.destination_account == account_id)
        .map(|t| t.amount_minor)
        .collect()
}

async fn payouts_of(pool: &PgPool, user_id: Uuid) -> Vec<Payout> {
    sqlx::query_as::<_, Payout>("SELECT * FROM payouts WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn payout_id_of(pool: &PgPool, invoice_id: Uuid) -> Option<Uuid> {
    sqlx::query_scalar::<_, Option<Uuid>>("SELECT payout_id FROM invoices WHERE id = $1")
        .bind(invoice_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_back_to_back_runs_pay_once() {
    let _guard = BATCH_LOCK.lock().await;
    let pool = create_test_pool().await.expect("Failed to create test pool");
    let sandbox = Arc::new(SandboxProcessor::auto_approving());
    let (user, dest) = onboarded_user(&pool, &sandbox).await;

    let a = paid_invoice(&pool, user.id, dec!(100.00)).await;
    let b = paid_invoice(&pool, user.id, dec!(37.50)).await;

    let reconciler = PayoutReconciler::new(pool.clone(), sandbox.clone(), PayoutPolicy::default());

    let first = reconciler.run_payout_batch(Utc::now()).await.unwrap();
    assert!(first.failures.iter().all(|f| f.user_id != user.id));

    let payouts = payouts_of(&pool, user.id).await;
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, dec!(133.37));
    assert_eq!(payouts[0].invoice_count, 2);
    assert_eq!(payouts[0].status, PayoutStatus::Completed);
    assert_eq!(payouts[0].destination_id, dest.id);
    assert_eq!(payout_id_of(&pool, a.id).await, Some(payouts[0].id));
    assert_eq!(payout_id_of(&pool, b.id).await, Some(payouts[0].id));

    reconciler.run_payout_batch(Utc::now()).await.unwrap();
    assert_eq!(payouts_of(&pool, user.id).await.len(), 1);

    assert_eq!(transfers_to(sandbox.transfers().await, &dest.account_id), vec![13_337]);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_balance_below_minimum_is_carried_over() {
    let _guard = BATCH_LOCK.lock().await;
    let pool = create_test_pool().await.expect("Failed to create test pool");
    let sandbox = Arc::new(SandboxProcessor::auto_approving());
    let (user, _) = onboarded_user(&pool, &sandbox).await;

    // 8.25 less the 3% fee leaves 8.00
    let small = paid_invoice(&pool, user.id, dec!(8.25)).await;

    let reconciler = PayoutReconciler::new(pool.clone(), sandbox.clone(), PayoutPolicy::default());
    reconciler.run_payout_batch(Utc::now()).await.unwrap();

    assert!(payouts_of(&pool, user.id).await.is_empty());
    assert_eq!(payout_id_of(&pool, small.id).await, None);

    // A later invoice lifts the balance over the minimum and both are paid
    paid_invoice(&pool, user.id, dec!(5.00)).await;
    reconciler.run_payout_batch(Utc::now()).await.unwrap();

    let payouts = payouts_of(&pool, user.id).await;
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].invoice_count, 2);
    assert_eq!(payout_id_of(&pool, small.id).await, Some(payouts[0].id));
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_failed_transfer_does_not_stop_the_batch() {
    let _guard = BATCH_LOCK.lock().await;
    let pool = create_test_pool().await.expect("Failed to create test pool");
    let sandbox = Arc::new(SandboxProcessor::auto_approving());
    let (failing, failing_dest) = onboarded_user(&pool, &sandbox).await;
    let (healthy, _) = onboarded_user(&pool, &sandbox).await;

    let stuck = paid_invoice(&pool, failing.id, dec!(50.00)).await;
    paid_invoice(&pool, healthy.id, dec!(50.00)).await;

    sandbox.fail_transfers_to(&failing_dest.account_id).await;

    let reconciler = PayoutReconciler::new(pool.clone(), sandbox.clone(), PayoutPolicy::default());
    let summary = reconciler.run_payout_batch(Utc::now()).await.unwrap();

    let failure = summary
        .failures
        .iter()
        .find(|f| f.user_id == failing.id)
        .expect("failure recorded for the rejected transfer");
    assert!(!failure.retryable);
    assert_eq!(failure.currency.as_deref(), Some("USD"));

    assert!(payouts_of(&pool, failing.id).await.is_empty());
    assert_eq!(payout_id_of(&pool, stuck.id).await, None);
    assert_eq!(payouts_of(&pool, healthy.id).await.len(), 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_invoices_paid_after_cutoff_wait_for_next_run() {
    let _guard = BATCH_LOCK.lock().await;
    let pool = create_test_pool().await.expect("Failed to create test pool");
    let sandbox = Arc::new(SandboxProcessor::auto_approving());
    let (user, _) = onboarded_user(&pool, &sandbox).await;

    let cutoff = Utc::now();
    let late = paid_invoice(&pool, user.id, dec!(100.00)).await;

    let reconciler = PayoutReconciler::new(pool.clone(), sandbox.clone(), PayoutPolicy::default());
    reconciler.run_payout_batch(cutoff).await.unwrap();
    assert_eq!(payout_id_of(&pool, late.id).await, None);

    reconciler.run_payout_batch(Utc::now()).await.unwrap();
    assert!(payout_id_of(&pool, late.id).await.is_some());
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_manually_paid_invoices_are_never_disbursed() {
    let _guard = BATCH_LOCK.lock().await;
    let pool = create_test_pool().await.expect("Failed to create test pool");
    let sandbox = Arc::new(SandboxProcessor::auto_approving());
    let (user, dest) = onboarded_user(&pool, &sandbox).await;

    let draft = draft_invoice(&pool, user.id, dec!(50000.00)).await;
    let manual = invoices::transition_status(&pool, user.id, draft.id, InvoiceStatus::Paid)
        .await
        .unwrap();
    assert_eq!(manual.status, InvoiceStatus::Paid);
    assert!(sandbox.checkouts().await.iter().all(|c| c.invoice_id != draft.id));

    let reconciler = PayoutReconciler::new(pool.clone(), sandbox.clone(), PayoutPolicy::default());
    reconciler.run_payout_batch(Utc::now()).await.unwrap();

    assert!(payouts_of(&pool, user.id).await.is_empty());
    assert_eq!(payout_id_of(&pool, draft.id).await, None);
    assert!(transfers_to(sandbox.transfers().await, &dest.account_id).is_empty());
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_split_settled_invoices_are_not_paid_again() {
    let _guard = BATCH_LOCK.lock().await;
    let pool = create_test_pool().await.expect("Failed to create test pool");
    let sandbox = Arc::new(SandboxProcessor::auto_approving());
    let (user, dest) = onboarded_user(&pool, &sandbox).await;

    let draft = draft_invoice(&pool, user.id, dec!(100.00)).await;
    let collector = PaymentCollector::new(sandbox.clone(), PayoutPolicy::default().fee_bps);
    let reference = collector.collect_for_invoice(&pool, user.id, draft.id).await.unwrap();
    let split = reference.split.expect("ready destination gets a split");
    assert_eq!(split.destination_amount, 9_700);

    // The processor reports the split account with the paid event
    invoices::mark_paid(&pool, draft.id, processor_payment(&draft, Some(&dest.account_id)))
        .await
        .unwrap();

    let reconciler = PayoutReconciler::new(pool.clone(), sandbox.clone(), PayoutPolicy::default());
    reconciler.run_payout_batch(Utc::now()).await.unwrap();

    assert!(payouts_of(&pool, user.id).await.is_empty());
    assert_eq!(payout_id_of(&pool, draft.id).await, None);
    assert!(transfers_to(sandbox.transfers().await, &dest.account_id).is_empty());
}
