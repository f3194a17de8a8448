//! Loan records and their time-dependent valuation.
//!
//! Nothing here is pushed by a scheduler: the write-off band, accrued
//! interest and recognised debt are all functions of the read time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::fixed::{compound, discount, ensure_positive_amount, InterestRate};
use crate::risk::RiskScore;
use crate::terms::{LoanTerms, PackedTerms};
use crate::types::{Address, AssetId, Moment, Money, PoolId, SECONDS_PER_DAY};
use crate::SettlementResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Issued,
    Repaying,
    Concluded,
    WrittenOffPartial,
    WrittenOffFull,
}

/// Time band of a loan relative to its maturity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtBand {
    Present,
    Overdue,
    WrittenOffPartial,
    WrittenOffFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPurpose {
    Loan,
    Invoice,
}

impl AssetPurpose {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(AssetPurpose::Loan),
            1 => Some(AssetPurpose::Invoice),
            _ => None,
        }
    }
}

/// Split of one repayment across interest and principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentSplit {
    pub to_interest: Money,
    pub to_principal: Money,
    /// Part of the offered amount above the outstanding debt
    pub change: Money,
}

impl RepaymentSplit {
    pub fn applied(&self) -> Money {
        self.to_interest + self.to_principal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: AssetId,
    pub pool: PoolId,
    pub creditor: Address,
    pub debtor: Address,
    pub terms_registry: Address,
    pub terms: LoanTerms,
    pub packed_terms: PackedTerms,
    /// 1-based bucket in the pool's risk table
    pub risk_score: u8,
    pub asset_purpose: AssetPurpose,
    pub expiration: Moment,
    pub issued_at: Moment,
    pub maturity: Moment,
    pub repaid_principal: Money,
    pub repaid_interest: Money,
    pub status: LoanStatus,
}

impl Loan {
    pub fn is_concluded(&self) -> bool {
        self.status == LoanStatus::Concluded
    }

    /// Terms rate, or the bucket rate when the terms carry none.
    pub fn accrual_rate(&self, bucket: &RiskScore) -> InterestRate {
        if self.terms.interest_rate.is_zero() {
            bucket.interest_rate
        } else {
            self.terms.interest_rate
        }
    }

    pub fn grace_end(&self, bucket: &RiskScore) -> Moment {
        let grace = self.terms.grace_seconds().max(bucket.grace_period);
        self.maturity.saturating_add(grace)
    }

    pub fn collection_end(&self, bucket: &RiskScore) -> Moment {
        self.grace_end(bucket)
            .saturating_add(bucket.collection_period)
    }

    pub fn band_at(&self, bucket: &RiskScore, at: Moment) -> DebtBand {
        if at < self.maturity {
            DebtBand::Present
        } else if at < self.grace_end(bucket) {
            DebtBand::Overdue
        } else if at < self.collection_end(bucket) {
            DebtBand::WrittenOffPartial
        } else {
            DebtBand::WrittenOffFull
        }
    }

    /// Whole days elapsed since maturity, zero before it.
    pub fn days_past_due(&self, at: Moment) -> u32 {
        let days = at.saturating_sub(self.maturity) / SECONDS_PER_DAY;
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    /// Principal plus compound interest up to `at`.
    ///
    /// Interest runs at the accrual rate until maturity, then at rate plus
    /// penalty until the end of grace, after which the balance is frozen.
    pub fn accrued_at(
        &self,
        bucket: &RiskScore,
        at: Moment,
        seconds_per_year: u64,
    ) -> SettlementResult<Money> {
        let until = at.min(self.grace_end(bucket));
        if until <= self.issued_at {
            return Ok(self.terms.principal);
        }

        let rate = self.accrual_rate(bucket);
        let regular = until.min(self.maturity).saturating_sub(self.issued_at);
        let mut balance = compound(self.terms.principal, rate, regular, seconds_per_year)?;

        if until > self.maturity {
            let penalised = rate.saturating_add(bucket.penalty_rate);
            balance = compound(balance, penalised, until - self.maturity, seconds_per_year)?;
        }
        Ok(balance)
    }

    pub fn outstanding_at(
        &self,
        bucket: &RiskScore,
        at: Moment,
        seconds_per_year: u64,
    ) -> SettlementResult<Money> {
        if self.is_concluded() {
            return Ok(Decimal::ZERO);
        }
        let accrued = self.accrued_at(bucket, at, seconds_per_year)?;
        Ok((accrued - self.repaid_principal - self.repaid_interest).max(Decimal::ZERO))
    }

    /// Recognised debt: outstanding balance scaled by the write-off band.
    ///
    /// The band factor always multiplies the full outstanding balance, never
    /// an earlier written-off figure.
    pub fn debt_at(
        &self,
        bucket: &RiskScore,
        at: Moment,
        seconds_per_year: u64,
    ) -> SettlementResult<Money> {
        let outstanding = self.outstanding_at(bucket, at, seconds_per_year)?;
        match self.band_at(bucket, at) {
            DebtBand::Present | DebtBand::Overdue => Ok(outstanding),
            DebtBand::WrittenOffPartial => bucket.write_off_after_grace_period.apply(outstanding),
            DebtBand::WrittenOffFull => bucket.write_off_after_collection_period.apply(outstanding),
        }
    }

    /// Risk-adjusted value of the expected cash flow, discounted back to `at`.
    pub fn present_value_at(
        &self,
        bucket: &RiskScore,
        at: Moment,
        seconds_per_year: u64,
    ) -> SettlementResult<Money> {
        if self.is_concluded() {
            return Ok(Decimal::ZERO);
        }
        if at >= self.maturity {
            return self.debt_at(bucket, at, seconds_per_year);
        }
        let expected = self.outstanding_at(bucket, self.maturity, seconds_per_year)?;
        let adjusted = bucket.expected_loss().complement().apply(expected)?;
        discount(
            adjusted,
            bucket.discount_rate,
            self.maturity - at,
            seconds_per_year,
        )
    }

    /// Book a repayment, interest first. Never takes more than outstanding.
    pub fn apply_repayment(
        &mut self,
        bucket: &RiskScore,
        amount: Money,
        at: Moment,
        seconds_per_year: u64,
    ) -> SettlementResult<RepaymentSplit> {
        ensure_positive_amount("repayment amount", amount)?;
        let accrued = self.accrued_at(bucket, at, seconds_per_year)?;
        let interest_due =
            ((accrued - self.terms.principal).max(Decimal::ZERO) - self.repaid_interest)
                .max(Decimal::ZERO);
        let principal_due = (self.terms.principal - self.repaid_principal).max(Decimal::ZERO);

        let to_interest = amount.min(interest_due);
        let to_principal = (amount - to_interest).min(principal_due);
        let split = RepaymentSplit {
            to_interest,
            to_principal,
            change: amount - to_interest - to_principal,
        };

        self.repaid_interest += to_interest;
        self.repaid_principal += to_principal;
        if self.status == LoanStatus::Issued {
            self.status = LoanStatus::Repaying;
        }
        Ok(split)
    }
}
