use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::models::invoice::NewLineItem;
use crate::money::round_money;

/// Largest amount a stored money column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

/// Amounts computed once when an invoice is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    /// `quantity * rate` per line, in input order
    pub line_amounts: Vec<Decimal>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

fn too_large(what: String) -> BillingError {
    BillingError::validation(format!("{} exceeds the maximum amount of {}", what, MAX_AMOUNT))
}

fn bounded(amount: Option<Decimal>, what: impl FnOnce() -> String) -> BillingResult<Decimal> {
    match amount {
        Some(amount) if amount <= MAX_AMOUNT => Ok(amount),
        _ => Err(too_large(what())),
    }
}

pub fn line_amount(quantity: i32, rate: Decimal) -> Option<Decimal> {
    Decimal::from(quantity).checked_mul(rate)
}

/// Computes line amounts, subtotal, tax and total.
///
/// Rates carry at most two decimals (checked by validation), so line
/// amounts and the subtotal are exact; only the tax is rounded, half up.
/// Fails with `Validation` when any line amount, the subtotal or the total
/// exceeds [`MAX_AMOUNT`].
pub fn compute_totals(items: &[NewLineItem], tax_rate: Decimal) -> BillingResult<InvoiceTotals> {
    let mut line_amounts = Vec::with_capacity(items.len());
    let mut subtotal = Decimal::ZERO;

    for (index, item) in items.iter().enumerate() {
        let amount = bounded(line_amount(item.quantity, item.rate), || format!("line {}", index + 1))?;
        subtotal = bounded(subtotal.checked_add(amount), || "subtotal".to_string())?;
        line_amounts.push(amount);
    }

    let subtotal = round_money(subtotal);
    let tax = subtotal
        .checked_mul(tax_rate)
        .and_then(|taxed| taxed.checked_div(Decimal::ONE_HUNDRED))
        .map(round_money);
    let tax_amount = bounded(tax, || "tax".to_string())?;
    let total = bounded(subtotal.checked_add(tax_amount), || "total".to_string())?;

    Ok(InvoiceTotals {
        line_amounts,
        subtotal,
        tax_amount,
        total,
    })
}
