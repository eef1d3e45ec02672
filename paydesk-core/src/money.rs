//! Money arithmetic.
//!
//! Amounts are `Decimal` with two fractional digits in the store and `i64`
//! minor units (cents) whenever they cross the processor boundary or a fee
//! is split. Every rounding step is half-up so totals and fees cannot drift
//! by more than one minor unit.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Fractional digits of every supported currency.
pub const MINOR_UNIT_DIGITS: u32 = 2;

const BASIS_POINTS: i128 = 10_000;

/// Rounds to the nearest minor unit, halves away from zero.
///
/// Money amounts here are never negative, so this is "round half up".
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MINOR_UNIT_DIGITS, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts a currency amount into minor units, rounding half up.
pub fn to_minor_units(amount: Decimal) -> BillingResult<i64> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(BillingError::validation("amount must not be negative"));
    }
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| BillingError::validation(format!("amount {} is out of range", amount)))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_DIGITS)
}

/// Platform fee and destination share of one collected amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub total: i64,
    pub platform_fee: i64,
    pub destination_amount: i64,
}

/// Fee in minor units for `amount_minor` at `fee_bps` basis points,
/// rounded half up.
pub fn platform_fee(amount_minor: i64, fee_bps: u32) -> BillingResult<i64> {
    if amount_minor < 0 {
        return Err(BillingError::validation("amount must not be negative"));
    }
    if i128::from(fee_bps) > BASIS_POINTS {
        return Err(BillingError::validation("fee rate cannot exceed 100%"));
    }
    let scaled = i128::from(amount_minor) * i128::from(fee_bps);
    let fee = (scaled + BASIS_POINTS / 2) / BASIS_POINTS;
    i64::try_from(fee).map_err(|_| BillingError::validation("fee is out of range"))
}

/// Splits an amount so that `platform_fee + destination_amount == total`
/// exactly. The destination share is derived by subtraction, never rounded
/// on its own.
pub fn split_fee(amount_minor: i64, fee_bps: u32) -> BillingResult<FeeSplit> {
    let platform_fee = platform_fee(amount_minor, fee_bps)?;
    Ok(FeeSplit {
        total: amount_minor,
        platform_fee,
        destination_amount: amount_minor - platform_fee,
    })
}

/// Fee-adjusted amount of an invoice total, in minor units.
pub fn net_of_fee(total: Decimal, fee_bps: u32) -> BillingResult<i64> {
    Ok(split_fee(to_minor_units(total)?, fee_bps)?.destination_amount)
}
