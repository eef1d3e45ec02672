//! Invoice lifecycle: the only code that writes invoice `status` and
//! `total`.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clients;
use crate::error::{BillingError, BillingResult};
use crate::invoices::status::{InvoiceStateMachine, StatusChange};
use crate::invoices::totals::compute_totals;
use crate::models::client::Client;
use crate::models::invoice::{ClientRef, Invoice, InvoiceDetail, InvoiceStatus, LineItem, NewInvoice};
use crate::models::payment::{PaymentRecord, PaymentStatus};
use crate::models::user::Plan;
use crate::notify::{render_invoice_email, Mailer};

/// Formats the per-user sequence number.
pub fn format_invoice_number(seq: i64) -> String {
    format!("INV-{:04}", seq)
}

/// Creates an invoice with its line items.
///
/// Runs in one transaction:
/// 1. claims a quota slot and the next invoice number with a single
///    conditional update of the user row,
/// 2. resolves or creates the client,
/// 3. inserts the invoice and its line items.
///
/// Any failure rolls back every step, including the usage increment.
///
/// # Errors
///
/// - `Validation` for bad input (nothing is written)
/// - `QuotaExceeded` when a user on a capped plan has used their monthly cap
/// - `NotFound` for an unknown user or a client that is not theirs
#[instrument(skip(pool, input), fields(user_id = %user_id))]
pub async fn create_invoice(pool: &PgPool, user_id: Uuid, input: NewInvoice) -> BillingResult<InvoiceDetail> {
    input.validate()?;
    let totals = compute_totals(&input.line_items, input.tax_rate)?;

    let mut tx = pool.begin().await?;

    let seq = claim_invoice_slot(&mut tx, user_id).await?;
    let invoice_number = format_invoice_number(seq);

    let client_id = match &input.client {
        ClientRef::Existing(client_id) => clients::lock_active_client(&mut tx, user_id, *client_id).await?,
        ClientRef::New(new_client) => clients::insert_client(&mut tx, user_id, new_client).await?.id,
    };

    let issue_date = input.issue_date.unwrap_or_else(|| Utc::now().date_naive());

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (
            id, user_id, client_id, invoice_number, issue_date, due_date,
            status, currency, subtotal, tax_rate, tax_amount, total, notes
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
        )
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(client_id)
    .bind(&invoice_number)
    .bind(issue_date)
    .bind(input.due_date)
    .bind(InvoiceStatus::Draft)
    .bind(input.currency_code())
    .bind(totals.subtotal)
    .bind(input.tax_rate)
    .bind(totals.tax_amount)
    .bind(totals.total)
    .bind(input.notes.as_deref())
    .fetch_one(&mut *tx)
    .await?;

    let mut line_items = Vec::with_capacity(input.line_items.len());
    for (position, (item, amount)) in input.line_items.iter().zip(&totals.line_amounts).enumerate() {
        let line = sqlx::query_as::<_, LineItem>(
            r#"
            INSERT INTO invoice_line_items (id, invoice_id, description, quantity, rate, amount, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice.id)
        .bind(item.description.trim())
        .bind(item.quantity)
        .bind(item.rate)
        .bind(*amount)
        .bind(position as i32)
        .fetch_one(&mut *tx)
        .await?;
        line_items.push(line);
    }

    tx.commit().await?;

    info!(
        invoice_id = %invoice.id,
        invoice_number = %invoice.invoice_number,
        total = %invoice.total,
        "Created invoice"
    );

    Ok(InvoiceDetail { invoice, line_items })
}

/// Claims one unit of monthly usage and the next invoice number.
///
/// The quota check and the increment are one statement, so concurrent
/// creations for the same user serialize on the user row and cannot both
/// pass a stale check.
async fn claim_invoice_slot(conn: &mut PgConnection, user_id: Uuid) -> BillingResult<i64> {
    let seq = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE users
        SET
            invoices_this_month = invoices_this_month + 1,
            invoice_seq = invoice_seq + 1,
            updated_at = NOW()
        WHERE id = $1
            AND (plan <> ALL($2) OR invoices_this_month < max_invoices)
        RETURNING invoice_seq
        "#,
    )
    .bind(user_id)
    .bind(Plan::capped_names())
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(seq) = seq {
        return Ok(seq);
    }

    let limit = sqlx::query_scalar::<_, i32>("SELECT max_invoices FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    match limit {
        Some(limit) => {
            warn!(user_id = %user_id, limit, "Invoice quota exceeded");
            Err(BillingError::QuotaExceeded { limit })
        }
        None => Err(BillingError::not_found("user", user_id)),
    }
}

pub async fn get_invoice(pool: &PgPool, user_id: Uuid, invoice_id: Uuid) -> BillingResult<InvoiceDetail> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 AND user_id = $2")
        .bind(invoice_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;

    let line_items = sqlx::query_as::<_, LineItem>(
        "SELECT * FROM invoice_line_items WHERE invoice_id = $1 ORDER BY position ASC",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;

    Ok(InvoiceDetail { invoice, line_items })
}

/// Invoices of a user, newest first.
pub async fn list_invoices(pool: &PgPool, user_id: Uuid) -> BillingResult<Vec<Invoice>> {
    let invoices = sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(invoices)
}

/// Locks an invoice row for the rest of the transaction. `owner` scopes
/// the lookup to one user; the processor webhook path passes `None`.
async fn lock_invoice(conn: &mut PgConnection, owner: Option<Uuid>, invoice_id: Uuid) -> BillingResult<Invoice> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT * FROM invoices
        WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
        FOR UPDATE
        "#,
    )
    .bind(invoice_id)
    .bind(owner)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| BillingError::not_found("invoice", invoice_id))
}

async fn write_status(conn: &mut PgConnection, invoice_id: Uuid, status: InvoiceStatus) -> BillingResult<Invoice> {
    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET
            status = $2,
            sent_at = CASE WHEN $2 = 'sent' THEN COALESCE(sent_at, NOW()) ELSE sent_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(status)
    .fetch_one(conn)
    .await?;
    Ok(invoice)
}

/// Records the payment and flips the invoice to `paid`. The payment insert
/// ignores an `external_ref` that was already recorded.
async fn write_paid(conn: &mut PgConnection, invoice: &Invoice, payment: &PaymentRecord) -> BillingResult<Invoice> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            id, invoice_id, amount, method, external_ref, status, paid_at,
            currency, destination_account
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (external_ref) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(invoice.id)
    .bind(payment.amount)
    .bind(payment.method)
    .bind(payment.external_ref.as_deref())
    .bind(PaymentStatus::Completed)
    .bind(payment.paid_at)
    .bind(payment.currency.as_deref().unwrap_or(&invoice.currency))
    .bind(payment.destination_account.as_deref())
    .execute(&mut *conn)
    .await?;

    let updated = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = 'paid', paid_at = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(invoice.id)
    .bind(payment.paid_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(updated)
}

/// Moves an invoice owned by `user_id` to `new_status`.
///
/// Marking an invoice paid by hand records a manual payment for its total.
/// Re-marking a paid invoice paid returns it unchanged and records nothing.
#[instrument(skip(pool), fields(user_id = %user_id, invoice_id = %invoice_id))]
pub async fn transition_status(
    pool: &PgPool,
    user_id: Uuid,
    invoice_id: Uuid,
    new_status: InvoiceStatus,
) -> BillingResult<Invoice> {
    let mut tx = pool.begin().await?;
    let invoice = lock_invoice(&mut tx, Some(user_id), invoice_id).await?;

    let updated = match InvoiceStateMachine::transition(invoice.status, new_status)? {
        StatusChange::Unchanged => invoice,
        StatusChange::Apply(InvoiceStatus::Paid) => {
            let payment = PaymentRecord::manual(invoice.total);
            write_paid(&mut tx, &invoice, &payment).await?
        }
        StatusChange::Apply(status) => write_status(&mut tx, invoice.id, status).await?,
    };

    tx.commit().await?;
    info!(status = %updated.status, "Invoice status updated");
    Ok(updated)
}

/// Checks that a processor confirmation settles `invoice` in full.
///
/// The currency must match the invoice and the amount must cover its total.
/// Overpayments are accepted and logged.
pub fn check_settlement(invoice: &Invoice, payment: &PaymentRecord) -> BillingResult<()> {
    let currency = payment
        .currency
        .as_deref()
        .ok_or_else(|| BillingError::InvalidEvent("confirmation without currency".into()))?;

    if !currency.eq_ignore_ascii_case(&invoice.currency) {
        return Err(BillingError::InvalidEvent(format!(
            "confirmation in {} for invoice {} in {}",
            currency.to_ascii_uppercase(),
            invoice.invoice_number,
            invoice.currency
        )));
    }

    if payment.amount < invoice.total {
        return Err(BillingError::InvalidEvent(format!(
            "confirmation of {} does not cover invoice {} total {}",
            payment.amount, invoice.invoice_number, invoice.total
        )));
    }

    if payment.amount > invoice.total {
        warn!(
            invoice_id = %invoice.id,
            expected = %invoice.total,
            received = %payment.amount,
            "Payment exceeds invoice total"
        );
    }
    Ok(())
}

/// Marks an invoice paid from a verified processor confirmation.
///
/// Idempotent: a repeated confirmation leaves the invoice paid and adds no
/// second payment.
///
/// # Errors
///
/// `InvalidEvent` when the confirmation is in another currency or short of
/// the invoice total; the invoice is left unpaid.
#[instrument(skip(pool, payment), fields(invoice_id = %invoice_id))]
pub async fn mark_paid(pool: &PgPool, invoice_id: Uuid, payment: PaymentRecord) -> BillingResult<Invoice> {
    let mut tx = pool.begin().await?;
    let invoice = lock_invoice(&mut tx, None, invoice_id).await?;

    let updated = match InvoiceStateMachine::transition(invoice.status, InvoiceStatus::Paid)? {
        StatusChange::Unchanged => {
            info!(external_ref = ?payment.external_ref, "Invoice already paid, confirmation ignored");
            invoice
        }
        StatusChange::Apply(_) => {
            if let Err(e) = check_settlement(&invoice, &payment) {
                warn!(external_ref = ?payment.external_ref, "Confirmation rejected: {}", e);
                return Err(e);
            }
            info!(
                platform_collected = payment.is_platform_collected(),
                destination = ?payment.destination_account,
                "Recording processor payment"
            );
            write_paid(&mut tx, &invoice, &payment).await?
        }
    };

    tx.commit().await?;
    Ok(updated)
}

/// Records a failed collection attempt for audit. The invoice is not
/// touched.
pub async fn record_failed_payment(
    pool: &PgPool,
    invoice_id: Uuid,
    external_ref: Option<&str>,
) -> BillingResult<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO payments (id, invoice_id, amount, method, external_ref, status, currency)
        SELECT $1, id, total, 'card', $3, 'failed', currency FROM invoices WHERE id = $2
        ON CONFLICT (external_ref) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(invoice_id)
    .bind(external_ref)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        warn!(invoice_id = %invoice_id, external_ref = ?external_ref, "Failed payment not recorded");
    }
    Ok(())
}

/// Sets the payable reference. Overwrites any previous one.
pub async fn attach_payment_reference(
    pool: &PgPool,
    user_id: Uuid,
    invoice_id: Uuid,
    reference: &str,
) -> BillingResult<Invoice> {
    sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET payment_reference = $3, updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(user_id)
    .bind(reference)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| BillingError::not_found("invoice", invoice_id))
}

/// Emails an invoice to its client and then marks it sent.
///
/// The status only advances after the mail transport confirms delivery
/// within `timeout`; a failed or timed-out send leaves the invoice as it
/// was.
#[instrument(skip(pool, mailer), fields(user_id = %user_id, invoice_id = %invoice_id))]
pub async fn send_invoice(
    pool: &PgPool,
    mailer: &dyn Mailer,
    sender_name: &str,
    user_id: Uuid,
    invoice_id: Uuid,
    timeout: Duration,
) -> BillingResult<Invoice> {
    let detail = get_invoice(pool, user_id, invoice_id).await?;
    InvoiceStateMachine::transition(detail.invoice.status, InvoiceStatus::Sent)?;

    let client: Client = clients::get_client(pool, user_id, detail.invoice.client_id).await?;
    let email = render_invoice_email(&detail, &client, sender_name);

    let handle = tokio::time::timeout(timeout, mailer.send(&email))
        .await
        .map_err(|_| BillingError::Timeout("invoice email"))??;

    info!(message_id = %handle.message_id, to = %client.email, "Invoice email delivered");

    let mut tx = pool.begin().await?;
    let invoice = lock_invoice(&mut tx, Some(user_id), invoice_id).await?;
    let updated = match InvoiceStateMachine::transition(invoice.status, InvoiceStatus::Sent) {
        Ok(StatusChange::Apply(status)) => write_status(&mut tx, invoice.id, status).await?,
        Ok(StatusChange::Unchanged) => invoice,
        Err(_) => {
            // Paid while the email was in flight
            warn!(status = %invoice.status, "Invoice changed during send, status kept");
            invoice
        }
    };
    tx.commit().await?;

    Ok(updated)
}

/// Moves every sent invoice due before `as_of` to `overdue`. Returns the
/// number of invoices moved.
pub async fn mark_overdue(pool: &PgPool, as_of: NaiveDate) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = 'overdue', updated_at = NOW()
        WHERE status = 'sent' AND due_date < $1
        "#,
    )
    .bind(as_of)
    .execute(pool)
    .await?;

    let count = result.rows_affected();
    if count > 0 {
        info!(count, as_of = %as_of, "Marked invoices overdue");
    }
    Ok(count)
}
