//! Fixed-point scales and deterministic compounding.
//!
//! Rates are annual percentages scaled by 10^4, ratios are fractions scaled
//! by 10^6. Compounding raises a per-second factor with exponentiation by
//! squaring, rounding every intermediate to 27 decimals (ray precision), so
//! the same inputs produce the same base units on every host.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SettlementError;
use crate::types::{Moment, Money};
use crate::SettlementResult;

/// `10_000` raw units = 1% per annum.
pub const RATE_SCALING_FACTOR: u32 = 10_000;
/// `1_000_000` raw units = 100%.
pub const ONE_HUNDRED_PERCENT: u32 = 1_000_000;
pub const RAY_DECIMALS: u32 = 27;
pub const PRICE_DECIMALS: u32 = 18;
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

// ---------------------------------------------------------------------------
// Scaled integer types
// ---------------------------------------------------------------------------

/// Annual interest rate, percent scaled by 10^4.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InterestRate(pub u32);

impl InterestRate {
    pub const ZERO: InterestRate = InterestRate(0);

    pub fn from_percent(percent: u32) -> Self {
        InterestRate(percent.saturating_mul(RATE_SCALING_FACTOR))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// 50_000 (5%) -> 0.05
    pub fn as_fraction(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(ONE_HUNDRED_PERCENT)
    }

    pub fn saturating_add(self, other: InterestRate) -> InterestRate {
        InterestRate(self.0.saturating_add(other.0))
    }

    /// `1 + rate / seconds_per_year` at ray precision.
    pub fn per_second_factor(&self, seconds_per_year: u64) -> SettlementResult<Decimal> {
        if seconds_per_year == 0 {
            return Err(SettlementError::DivisionByZero {
                context: "per-second interest factor".into(),
            });
        }
        let per_second = self
            .as_fraction()
            .checked_div(Decimal::from(seconds_per_year))
            .ok_or_else(|| SettlementError::Overflow("per-second interest factor".into()))?;
        Ok(to_ray(Decimal::ONE + per_second))
    }
}

impl fmt::Display for InterestRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", Decimal::from(self.0) / Decimal::from(RATE_SCALING_FACTOR))
    }
}

/// Fraction scaled by 10^6.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ratio(pub u32);

impl Ratio {
    pub const ZERO: Ratio = Ratio(0);
    pub const ONE: Ratio = Ratio(ONE_HUNDRED_PERCENT);

    pub fn is_valid(&self) -> bool {
        self.0 <= ONE_HUNDRED_PERCENT
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(ONE_HUNDRED_PERCENT)
    }

    /// `1 - self`, saturating at zero.
    pub fn complement(&self) -> Ratio {
        Ratio(ONE_HUNDRED_PERCENT.saturating_sub(self.0))
    }

    /// `floor(amount * self)`.
    pub fn apply(&self, amount: Money) -> SettlementResult<Money> {
        let scaled = mul(amount, Decimal::from(self.0), "ratio application")?;
        Ok(floor_units(scaled / Decimal::from(ONE_HUNDRED_PERCENT)))
    }
}

// ---------------------------------------------------------------------------
// Rounding and checked arithmetic
// ---------------------------------------------------------------------------

pub fn to_ray(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RAY_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Round toward zero to whole base units.
pub fn floor_units(value: Decimal) -> Money {
    value.round_dp_with_strategy(0, RoundingStrategy::ToZero)
}

pub fn to_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::ToZero)
}

pub fn add(a: Decimal, b: Decimal, context: &str) -> SettlementResult<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| SettlementError::Overflow(context.to_string()))
}

pub fn mul(a: Decimal, b: Decimal, context: &str) -> SettlementResult<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| SettlementError::Overflow(context.to_string()))
}

pub fn div(a: Decimal, b: Decimal, context: &str) -> SettlementResult<Decimal> {
    if b.is_zero() {
        return Err(SettlementError::DivisionByZero {
            context: context.to_string(),
        });
    }
    a.checked_div(b)
        .ok_or_else(|| SettlementError::Overflow(context.to_string()))
}

/// Reject negative or fractional amounts.
pub fn ensure_amount(field: &str, amount: Money) -> SettlementResult<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(SettlementError::invalid(field, "amount cannot be negative"));
    }
    if !amount.fract().is_zero() {
        return Err(SettlementError::invalid(
            field,
            "amount must be a whole number of base units",
        ));
    }
    Ok(())
}

pub fn ensure_positive_amount(field: &str, amount: Money) -> SettlementResult<()> {
    ensure_amount(field, amount)?;
    if amount.is_zero() {
        return Err(SettlementError::invalid(field, "amount must be positive"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Compounding
// ---------------------------------------------------------------------------

/// `base^exp` by squaring, every product rounded to ray precision.
pub fn rpow(base: Decimal, mut exp: u64) -> SettlementResult<Decimal> {
    let mut result = Decimal::ONE;
    let mut factor = to_ray(base);
    while exp > 0 {
        if exp & 1 == 1 {
            result = to_ray(mul(result, factor, "rpow")?);
        }
        exp >>= 1;
        if exp > 0 {
            factor = to_ray(mul(factor, factor, "rpow")?);
        }
    }
    Ok(result)
}

/// Growth factor of `rate` over `elapsed` seconds.
pub fn accrual_factor(
    rate: InterestRate,
    elapsed: Moment,
    seconds_per_year: u64,
) -> SettlementResult<Decimal> {
    if rate.is_zero() || elapsed == 0 {
        return Ok(Decimal::ONE);
    }
    rpow(rate.per_second_factor(seconds_per_year)?, elapsed)
}

/// `floor(amount * (1 + rate/secondsPerYear)^elapsed)`.
pub fn compound(
    amount: Money,
    rate: InterestRate,
    elapsed: Moment,
    seconds_per_year: u64,
) -> SettlementResult<Money> {
    let factor = accrual_factor(rate, elapsed, seconds_per_year)?;
    Ok(floor_units(mul(amount, factor, "compound accrual")?))
}

/// `floor(amount / (1 + rate/secondsPerYear)^elapsed)`.
pub fn discount(
    amount: Money,
    rate: InterestRate,
    elapsed: Moment,
    seconds_per_year: u64,
) -> SettlementResult<Money> {
    let factor = accrual_factor(rate, elapsed, seconds_per_year)?;
    Ok(floor_units(div(amount, factor, "discounting")?))
}
