//! Integer money arithmetic for commissions and balances.
//!
//! Amounts are whole minor-currency units. Percentages arrive as floats and are
//! converted through their shortest decimal representation, so `33.3` is the
//! exact decimal `33.3` rather than its binary approximation.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MoneyError {
    #[error("commission rate {0} is not a finite decimal")]
    InvalidRate(f64),
    #[error("amount overflow while computing {0}")]
    Overflow(&'static str),
}

pub type MoneyResult<T> = Result<T, MoneyError>;

pub fn commission_amount(total: i64, percent: f64) -> MoneyResult<i64> {
    if percent.is_nan() {
        return Err(MoneyError::InvalidRate(percent));
    }
    if total <= 0 || percent <= 0.0 {
        return Ok(0);
    }

    let rate = decimal_rate(percent)?;
    let raw = Decimal::from(total)
        .checked_mul(rate)
        .ok_or(MoneyError::Overflow("commission"))?
        / Decimal::ONE_HUNDRED;

    raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(MoneyError::Overflow("commission"))
}

pub fn net_income(total: i64, percent: f64) -> MoneyResult<i64> {
    let commission = commission_amount(total, percent)?;
    total
        .checked_sub(commission)
        .ok_or(MoneyError::Overflow("net income"))
}

pub fn balance(net_income: i64, total_paid: i64) -> MoneyResult<i64> {
    net_income
        .checked_sub(total_paid)
        .ok_or(MoneyError::Overflow("balance"))
}

/// Sum of order or payment amounts.
pub fn sum_amounts<I>(amounts: I) -> MoneyResult<i64>
where
    I: IntoIterator<Item = i64>,
{
    amounts.into_iter().try_fold(0i64, |acc, amount| {
        acc.checked_add(amount).ok_or(MoneyError::Overflow("total"))
    })
}

fn decimal_rate(percent: f64) -> MoneyResult<Decimal> {
    if !percent.is_finite() {
        return Err(MoneyError::InvalidRate(percent));
    }
    Decimal::from_str(&percent.to_string()).map_err(|_| MoneyError::InvalidRate(percent))
}
