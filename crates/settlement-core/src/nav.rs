//! Loan valuation, the write-off state machine and pool aging.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::auth::AccessControl;
use crate::engine::{EngineState, SettlementEngine};
use crate::error::SettlementError;
use crate::fixed::add;
use crate::loan::{DebtBand, LoanStatus};
use crate::types::{AssetId, Moment, Money, PoolId};
use crate::SettlementResult;

/// Result of a write-off call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOffOutcome {
    pub asset: AssetId,
    pub previous: LoanStatus,
    pub band: DebtBand,
    /// Debt recognised after the call
    pub debt: Money,
    /// False when the loan was already in this band
    pub changed: bool,
}

/// Live loans of one days-past-due bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingBucket {
    /// 1-based risk score, 0 for loans below the first boundary
    pub risk_score: u8,
    pub days_past_due: u32,
    pub loans: usize,
    pub debt: Money,
}

impl EngineState {
    pub(crate) fn debt_at(&self, id: &AssetId, at: Moment, seconds_per_year: u64) -> SettlementResult<Money> {
        let (loan, bucket) = self.loan_with_bucket(id)?;
        loan.debt_at(bucket, at, seconds_per_year)
    }

    /// Sum of recognised debt over the pool's live loans.
    pub(crate) fn loans_nav(&self, pool: PoolId, at: Moment, seconds_per_year: u64) -> SettlementResult<Money> {
        let mut nav = Decimal::ZERO;
        for id in &self.pool(pool)?.assets {
            nav = add(nav, self.debt_at(id, at, seconds_per_year)?, "pool nav")?;
        }
        Ok(nav)
    }
}

impl<A: AccessControl> SettlementEngine<A> {
    pub fn debt(&self, id: &AssetId, at: Moment) -> SettlementResult<Money> {
        self.state().debt_at(id, at, self.config().seconds_per_year)
    }

    /// Live debt of every non-concluded loan in the pool.
    pub fn current_nav(&self, pool: PoolId, at: Moment) -> SettlementResult<Money> {
        self.state().loans_nav(pool, at, self.config().seconds_per_year)
    }

    /// Discounted, risk-adjusted value of the pool's loans as seen at `at`.
    pub fn expected_assets_value(&self, pool: PoolId, at: Moment) -> SettlementResult<Money> {
        let state = self.state();
        let mut total = Decimal::ZERO;
        for id in &state.pool(pool)?.assets {
            let (loan, bucket) = state.loan_with_bucket(id)?;
            total = add(
                total,
                loan.present_value_at(bucket, at, self.config().seconds_per_year)?,
                "expected assets value",
            )?;
        }
        Ok(total)
    }

    /// Move a loan into the write-off band its age calls for.
    ///
    /// Re-applying within the same band changes nothing.
    pub fn write_off(&mut self, id: &AssetId, now: Moment) -> SettlementResult<WriteOffOutcome> {
        let pool = self.state().loan(id)?.pool;
        let id = *id;
        self.transact(&[pool], |state, config, _| {
            let (loan, bucket) = state.loan_with_bucket(&id)?;
            if loan.is_concluded() {
                return Err(SettlementError::AlreadyConcluded(id));
            }
            let band = loan.band_at(bucket, now);
            match band {
                DebtBand::Present => {
                    return Err(SettlementError::MaturityInFuture {
                        asset: id,
                        maturity: loan.maturity,
                        now,
                    })
                }
                DebtBand::Overdue => {
                    return Err(SettlementError::GracePeriodActive {
                        asset: id,
                        grace_end: loan.grace_end(bucket),
                    })
                }
                DebtBand::WrittenOffPartial | DebtBand::WrittenOffFull => {}
            }

            let debt = loan.debt_at(bucket, now, config.seconds_per_year)?;
            let previous = loan.status;
            let status = if band == DebtBand::WrittenOffFull {
                LoanStatus::WrittenOffFull
            } else {
                LoanStatus::WrittenOffPartial
            };
            let changed = previous != status;
            if changed {
                if let Some(loan) = state.loans.get_mut(&id) {
                    loan.status = status;
                }
                info!(asset = %id, ?band, %debt, "loan written off");
            }
            Ok(WriteOffOutcome {
                asset: id,
                previous,
                band,
                debt,
                changed,
            })
        })
    }

    /// Group the pool's live loans by days-past-due bucket.
    pub fn aging_report(&self, pool: PoolId, at: Moment) -> SettlementResult<Vec<AgingBucket>> {
        let state = self.state();
        let table = &state.pool(pool)?.risk_scores;
        let mut buckets: BTreeMap<u8, AgingBucket> = BTreeMap::new();
        for id in &state.pool(pool)?.assets {
            let (loan, bucket) = state.loan_with_bucket(id)?;
            let days = loan.days_past_due(at);
            let (score, boundary) = table
                .bucket_for_days_past_due(days)
                .map(|(score, b)| (score, b.days_past_due))
                .unwrap_or((0, 0));
            let debt = loan.debt_at(bucket, at, self.config().seconds_per_year)?;
            let entry = buckets.entry(score).or_insert(AgingBucket {
                risk_score: score,
                days_past_due: boundary,
                loans: 0,
                debt: Decimal::ZERO,
            });
            entry.loans += 1;
            entry.debt = add(entry.debt, debt, "aging bucket")?;
        }
        Ok(buckets.into_values().collect())
    }
}
