use crate::error::{AppError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monetary value with two fraction digits.
///
/// Every constructor rounds half away from zero, so totals computed from
/// rounded parts stay consistent with what gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Multiplies a unit price by a weight or piece count.
    ///
    /// Overflow is a validation error.
    pub fn times(self, quantity: Decimal) -> Result<Self> {
        self.0
            .checked_mul(quantity)
            .map(Self::new)
            .ok_or_else(out_of_range)
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0.checked_add(rhs.0).map(Self).ok_or_else(out_of_range)
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0.checked_sub(rhs.0).map(Self).ok_or_else(out_of_range)
    }

    /// Adds up a sequence of amounts, failing on the first overflow.
    pub fn total<I>(amounts: I) -> Result<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

fn out_of_range() -> AppError {
    AppError::validation("Amount out of range")
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
