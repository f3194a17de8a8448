use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

use crate::auth::{AccessControl, Role};
use crate::engine::SettlementEngine;
use crate::error::SettlementError;
use crate::fixed::{compound, ensure_amount, mul, InterestRate, Ratio, ONE_HUNDRED_PERCENT};
use crate::risk::{RiskScore, RiskScoreTable};
use crate::types::{Address, AssetId, Moment, Money, PoolId, Tranche};
use crate::SettlementResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Open,
    IssuingTokens,
    Active,
    Closed,
}

/// Another pool's tranche held by this pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub target: PoolId,
    pub tranche: Tranche,
    /// Currency paid for the tokens
    pub invested: Money,
    pub tokens: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    /// Account holding the pool's reserve and its loan assets
    pub address: Address,
    pub owner: Address,
    pub currency: Address,
    pub min_first_loss: Ratio,
    pub debt_ceiling: Money,
    pub risk_scores: RiskScoreTable,
    pub state: PoolState,
    pub validators: BTreeSet<Address>,
    pub redeem_disabled: bool,
    pub assets: BTreeSet<AssetId>,
    pub senior_paid_in: Money,
    pub junior_paid_in: Money,
    /// Senior debt as of `senior_debt_updated`
    pub senior_debt: Money,
    pub senior_debt_updated: Moment,
    pub senior_interest: InterestRate,
    /// Reserve committed to the open distribution cycle
    pub earmarked: Money,
    pub investments: Vec<Investment>,
}

impl Pool {
    pub fn address_for(id: PoolId) -> Address {
        Address::derive(b"pool", &id.0.to_be_bytes())
    }

    pub fn is_closed(&self) -> bool {
        self.state == PoolState::Closed
    }

    pub fn senior_debt_at(&self, at: Moment, seconds_per_year: u64) -> SettlementResult<Money> {
        compound(
            self.senior_debt,
            self.senior_interest,
            at.saturating_sub(self.senior_debt_updated),
            seconds_per_year,
        )
    }

    /// Roll senior debt forward to `at` so it can be adjusted in place.
    pub(crate) fn accrue_senior_debt(&mut self, at: Moment, seconds_per_year: u64) -> SettlementResult<()> {
        if at > self.senior_debt_updated {
            self.senior_debt = self.senior_debt_at(at, seconds_per_year)?;
            self.senior_debt_updated = at;
        }
        Ok(())
    }

    /// `senior * mfl <= junior * (1 - mfl)`; a zero ratio always holds.
    pub fn satisfies_min_first_loss(&self, senior: Money, junior: Money) -> SettlementResult<bool> {
        if self.min_first_loss.is_zero() {
            return Ok(true);
        }
        let lhs = mul(senior, Decimal::from(self.min_first_loss.0), "min first loss")?;
        let rhs = mul(
            junior,
            Decimal::from(ONE_HUNDRED_PERCENT - self.min_first_loss.0),
            "min first loss",
        )?;
        Ok(lhs <= rhs)
    }

    pub(crate) fn ensure_min_first_loss(&self, senior: Money, junior: Money) -> SettlementResult<()> {
        if self.satisfies_min_first_loss(senior, junior)? {
            Ok(())
        } else {
            Err(SettlementError::MinFirstLossViolated { senior, junior })
        }
    }

    pub(crate) fn ensure_open_for_business(&self) -> SettlementResult<()> {
        if self.is_closed() {
            return Err(SettlementError::PoolClosed(self.id));
        }
        Ok(())
    }

    /// Owner, the pool's own account, or a pool admin.
    pub(crate) fn ensure_admin(
        &self,
        caller: &Address,
        access: &dyn AccessControl,
        action: &str,
    ) -> SettlementResult<()> {
        if *caller == self.owner
            || *caller == self.address
            || access.has_role(caller, Role::PoolAdmin, Some(self.id))
        {
            Ok(())
        } else {
            Err(SettlementError::unauthorized(*caller, action))
        }
    }
}

/// Parameters of a new pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    pub owner: Address,
    pub currency: Address,
    #[serde(default)]
    pub min_first_loss: Ratio,
    pub debt_ceiling: Money,
    #[serde(default)]
    pub validators: Vec<Address>,
    #[serde(default)]
    pub risk_scores: Vec<RiskScore>,
}

impl<A: AccessControl> SettlementEngine<A> {
    pub fn create_pool(&mut self, caller: Address, params: PoolParams) -> SettlementResult<PoolId> {
        self.transact(&[], |state, _, access| {
            if !access.has_role(&caller, Role::PoolCreator, None) {
                return Err(SettlementError::unauthorized(caller, "create pools"));
            }
            if params.owner.is_zero() {
                return Err(SettlementError::ZeroAddress { field: "owner".into() });
            }
            if params.currency.is_zero() {
                return Err(SettlementError::ZeroAddress { field: "currency".into() });
            }
            if !params.min_first_loss.is_valid() {
                return Err(SettlementError::invalid(
                    "min_first_loss",
                    "ratio cannot exceed 100%",
                ));
            }
            ensure_amount("debt_ceiling", params.debt_ceiling)?;
            if params.validators.iter().any(Address::is_zero) {
                return Err(SettlementError::ZeroAddress { field: "validators".into() });
            }
            let risk_scores = RiskScoreTable::new(params.risk_scores)?;

            let id = PoolId(state.next_pool_id);
            state.next_pool_id += 1;
            let pool = Pool {
                id,
                address: Pool::address_for(id),
                owner: params.owner,
                currency: params.currency,
                min_first_loss: params.min_first_loss,
                debt_ceiling: params.debt_ceiling,
                risk_scores,
                state: PoolState::Open,
                validators: params.validators.into_iter().collect(),
                redeem_disabled: false,
                assets: BTreeSet::new(),
                senior_paid_in: Decimal::ZERO,
                junior_paid_in: Decimal::ZERO,
                senior_debt: Decimal::ZERO,
                senior_debt_updated: 0,
                senior_interest: InterestRate::ZERO,
                earmarked: Decimal::ZERO,
                investments: Vec::new(),
            };
            info!(pool = %id, owner = %pool.owner, currency = %pool.currency, "pool created");
            state.pools.insert(id, pool);
            Ok(id)
        })
    }

    /// Replace the pool's risk table. Buckets must be strictly sorted.
    pub fn setup_risk_scores(
        &mut self,
        pool: PoolId,
        caller: Address,
        scores: Vec<RiskScore>,
    ) -> SettlementResult<()> {
        self.transact(&[pool], |state, _, access| {
            let table = RiskScoreTable::new(scores)?;
            let p = state.pool_mut(pool)?;
            p.ensure_admin(&caller, access, "set up risk scores")?;
            // live loans must keep a valid bucket
            let highest = state
                .loans
                .values()
                .filter(|l| l.pool == pool && !l.is_concluded())
                .map(|l| l.risk_score)
                .max();
            if let Some(score) = highest {
                table.get(score)?;
            }
            let p = state.pool_mut(pool)?;
            info!(pool = %pool, buckets = table.len(), "risk scores updated");
            p.risk_scores = table;
            Ok(())
        })
    }

    pub fn add_validator(&mut self, pool: PoolId, caller: Address, validator: Address) -> SettlementResult<()> {
        self.transact(&[pool], |state, _, access| {
            let p = state.pool_mut(pool)?;
            p.ensure_admin(&caller, access, "register validators")?;
            if validator.is_zero() {
                return Err(SettlementError::ZeroAddress { field: "validator".into() });
            }
            p.validators.insert(validator);
            Ok(())
        })
    }

    pub fn remove_validator(&mut self, pool: PoolId, caller: Address, validator: Address) -> SettlementResult<()> {
        self.transact(&[pool], |state, _, access| {
            let p = state.pool_mut(pool)?;
            p.ensure_admin(&caller, access, "remove validators")?;
            p.validators.remove(&validator);
            Ok(())
        })
    }

    pub fn set_debt_ceiling(&mut self, pool: PoolId, caller: Address, ceiling: Money) -> SettlementResult<()> {
        self.transact(&[pool], |state, _, access| {
            ensure_amount("debt_ceiling", ceiling)?;
            let p = state.pool_mut(pool)?;
            p.ensure_admin(&caller, access, "set the debt ceiling")?;
            p.debt_ceiling = ceiling;
            Ok(())
        })
    }

    /// Block or unblock new redeem orders and purchases.
    pub fn set_redeem_disabled(&mut self, pool: PoolId, caller: Address, disabled: bool) -> SettlementResult<()> {
        self.transact(&[pool], |state, _, access| {
            if !access.has_role(&caller, Role::RedeemAdmin, Some(pool)) {
                return Err(SettlementError::unauthorized(caller, "toggle redemptions"));
            }
            let p = state.pool_mut(pool)?;
            p.redeem_disabled = disabled;
            info!(pool = %pool, disabled, "redeem flag changed");
            Ok(())
        })
    }

    /// Deactivate the pool. Pending redemptions keep working.
    pub fn close_pool(&mut self, pool: PoolId, caller: Address) -> SettlementResult<()> {
        self.transact(&[pool], |state, _, access| {
            let p = state.pool_mut(pool)?;
            p.ensure_admin(&caller, access, "close the pool")?;
            p.ensure_open_for_business()?;
            p.state = PoolState::Closed;
            info!(pool = %pool, "pool closed");
            Ok(())
        })
    }
}
