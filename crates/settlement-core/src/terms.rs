//! Loan terms and their compact 32-byte wire encoding.
//!
//! Layout (big-endian):
//!
//! | bytes  | field                     |
//! |--------|---------------------------|
//! | 0..12  | principal (u96)           |
//! | 12..15 | interest rate (u24, 10^4) |
//! | 15     | amortization unit         |
//! | 16..18 | term length (u16)         |
//! | 18     | grace period in days      |
//! | 19..32 | zero                      |

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::fixed::{ensure_positive_amount, InterestRate};
use crate::types::{hex_bytes, Moment, Money, SECONDS_PER_DAY};
use crate::SettlementResult;

const MAX_PRINCIPAL: u128 = (1u128 << 96) - 1;
const MAX_RATE: u32 = (1u32 << 24) - 1;

hex_bytes!(
    /// Packed loan terms as carried in debt orders.
    PackedTerms,
    32
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmortizationUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl AmortizationUnit {
    pub fn seconds(&self) -> Moment {
        match self {
            AmortizationUnit::Minutes => 60,
            AmortizationUnit::Hours => 3_600,
            AmortizationUnit::Days => SECONDS_PER_DAY,
            AmortizationUnit::Weeks => 7 * SECONDS_PER_DAY,
            AmortizationUnit::Months => 30 * SECONDS_PER_DAY,
            AmortizationUnit::Years => 365 * SECONDS_PER_DAY,
        }
    }

    fn code(&self) -> u8 {
        match self {
            AmortizationUnit::Minutes => 0,
            AmortizationUnit::Hours => 1,
            AmortizationUnit::Days => 2,
            AmortizationUnit::Weeks => 3,
            AmortizationUnit::Months => 4,
            AmortizationUnit::Years => 5,
        }
    }

    fn from_code(code: u8) -> SettlementResult<Self> {
        Ok(match code {
            0 => AmortizationUnit::Minutes,
            1 => AmortizationUnit::Hours,
            2 => AmortizationUnit::Days,
            3 => AmortizationUnit::Weeks,
            4 => AmortizationUnit::Months,
            5 => AmortizationUnit::Years,
            other => {
                return Err(SettlementError::MalformedTerms(format!(
                    "unknown amortization unit {other}"
                )))
            }
        })
    }
}

/// Structured loan terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: Money,
    pub interest_rate: InterestRate,
    pub amortization_unit: AmortizationUnit,
    /// Number of amortization units until maturity.
    pub term_length: u16,
    pub grace_period_days: u8,
}

impl LoanTerms {
    pub fn term_seconds(&self) -> Moment {
        self.amortization_unit.seconds() * Moment::from(self.term_length)
    }

    pub fn grace_seconds(&self) -> Moment {
        Moment::from(self.grace_period_days) * SECONDS_PER_DAY
    }

    pub fn maturity(&self, issued_at: Moment) -> Moment {
        issued_at.saturating_add(self.term_seconds())
    }

    pub fn encode(&self) -> SettlementResult<PackedTerms> {
        ensure_positive_amount("principal", self.principal)
            .map_err(|e| SettlementError::MalformedTerms(e.to_string()))?;
        let principal = self
            .principal
            .to_u128()
            .filter(|p| *p <= MAX_PRINCIPAL)
            .ok_or_else(|| SettlementError::MalformedTerms("principal exceeds 96 bits".into()))?;
        if self.interest_rate.0 > MAX_RATE {
            return Err(SettlementError::MalformedTerms(
                "interest rate exceeds 24 bits".into(),
            ));
        }
        if self.term_length == 0 {
            return Err(SettlementError::MalformedTerms(
                "term length must be positive".into(),
            ));
        }

        let mut out = [0u8; 32];
        out[0..12].copy_from_slice(&principal.to_be_bytes()[4..16]);
        out[12..15].copy_from_slice(&self.interest_rate.0.to_be_bytes()[1..4]);
        out[15] = self.amortization_unit.code();
        out[16..18].copy_from_slice(&self.term_length.to_be_bytes());
        out[18] = self.grace_period_days;
        Ok(PackedTerms(out))
    }
}

impl PackedTerms {
    pub fn decode(&self) -> SettlementResult<LoanTerms> {
        let b = &self.0;
        if b[19..].iter().any(|byte| *byte != 0) {
            return Err(SettlementError::MalformedTerms(
                "reserved bytes must be zero".into(),
            ));
        }

        let mut principal_bytes = [0u8; 16];
        principal_bytes[4..16].copy_from_slice(&b[0..12]);
        let principal = u128::from_be_bytes(principal_bytes);
        let principal = Decimal::try_from_i128_with_scale(principal as i128, 0)
            .map_err(|e| SettlementError::MalformedTerms(e.to_string()))?;
        if principal.is_zero() {
            return Err(SettlementError::MalformedTerms(
                "principal must be positive".into(),
            ));
        }

        let interest_rate = InterestRate(u32::from_be_bytes([0, b[12], b[13], b[14]]));
        let amortization_unit = AmortizationUnit::from_code(b[15])?;
        let term_length = u16::from_be_bytes([b[16], b[17]]);
        if term_length == 0 {
            return Err(SettlementError::MalformedTerms(
                "term length must be positive".into(),
            ));
        }

        Ok(LoanTerms {
            principal,
            interest_rate,
            amortization_unit,
            term_length,
            grace_period_days: b[18],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_terms() -> LoanTerms {
        LoanTerms {
            principal: dec!(10_000_000_000_000_000_000),
            interest_rate: InterestRate(50_000),
            amortization_unit: AmortizationUnit::Days,
            term_length: 10,
            grace_period_days: 2,
        }
    }

    #[test]
    fn test_encode_decode_preserves_terms() {
        let terms = sample_terms();
        let packed = terms.encode().unwrap();
        assert_eq!(packed.decode().unwrap(), terms);
    }

    #[test]
    fn test_field_positions() {
        let packed = sample_terms().encode().unwrap();
        // 50_000 = 0x00C350
        assert_eq!(&packed.0[12..15], &[0x00, 0xC3, 0x50]);
        assert_eq!(packed.0[15], 2);
        assert_eq!(&packed.0[16..18], &[0, 10]);
        assert_eq!(packed.0[18], 2);
    }

    #[test]
    fn test_maturity_and_grace() {
        let terms = sample_terms();
        assert_eq!(terms.term_seconds(), 864_000);
        assert_eq!(terms.grace_seconds(), 172_800);
        assert_eq!(terms.maturity(1_000), 865_000);
    }

    #[test]
    fn test_rejects_fractional_principal() {
        let mut terms = sample_terms();
        terms.principal = dec!(1.5);
        assert!(matches!(terms.encode(), Err(SettlementError::MalformedTerms(_))));
    }

    #[test]
    fn test_rejects_dirty_padding_and_unknown_unit() {
        let mut packed = sample_terms().encode().unwrap();
        packed.0[31] = 1;
        assert!(packed.decode().is_err());

        let mut packed = sample_terms().encode().unwrap();
        packed.0[15] = 9;
        assert!(matches!(packed.decode(), Err(SettlementError::MalformedTerms(_))));
    }

    #[test]
    fn test_rate_overflow() {
        let mut terms = sample_terms();
        terms.interest_rate = InterestRate(1 << 24);
        assert!(terms.encode().is_err());
    }
}
