//! Timed, capped tranche sales.
//!
//! A sale stops on whichever comes first: the closing time or the cap. The
//! window is `[opening, closing)`, so at the closing instant the time stop
//! already holds and no purchase lands. Senior sales carry a stepped interest
//! schedule; the rate current at the stop is frozen as the pool's senior
//! interest.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::auth::{AccessControl, Role};
use crate::config::EngineConfig;
use crate::engine::{EngineState, SettlementEngine};
use crate::error::SettlementError;
use crate::fixed::{add, ensure_positive_amount, floor_units, mul, InterestRate};
use crate::pool::{Investment, PoolState};
use crate::types::{Address, Moment, Money, PoolId, TokenId, Tranche};
use crate::SettlementResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SaleId {
    pub pool: PoolId,
    pub tranche: Tranche,
}

impl SaleId {
    pub fn new(pool: PoolId, tranche: Tranche) -> Self {
        Self { pool, tranche }
    }

    pub fn token(&self) -> TokenId {
        TokenId::tranche(self.pool, self.tranche)
    }
}

impl fmt::Display for SaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool, self.tranche)
    }
}

/// Senior interest rising by a fixed step per elapsed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestSchedule {
    pub initial_interest: InterestRate,
    pub final_interest: InterestRate,
    /// Seconds per step
    pub time_interval: Moment,
    pub amount_per_interval: InterestRate,
}

impl InterestSchedule {
    /// `min(final, initial + floor((t - opening) / interval) * step)`
    pub fn interest_at(&self, opening: Moment, at: Moment) -> InterestRate {
        if self.time_interval == 0 {
            return self.initial_interest;
        }
        let steps = at.saturating_sub(opening) / self.time_interval;
        let raised = u64::from(self.initial_interest.0)
            .saturating_add(steps.saturating_mul(u64::from(self.amount_per_interval.0)));
        let capped = raised.min(u64::from(self.final_interest.0));
        InterestRate(u32::try_from(capped).unwrap_or(u32::MAX))
    }

    fn validate(&self) -> SettlementResult<()> {
        if self.time_interval == 0 {
            return Err(SettlementError::invalid("interest.time_interval", "must be positive"));
        }
        if self.final_interest < self.initial_interest {
            return Err(SettlementError::invalid(
                "interest.final_interest",
                "must not be below the initial interest",
            ));
        }
        Ok(())
    }
}

/// Configuration of one sale round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRound {
    pub opening_time: Moment,
    pub closing_time: Moment,
    /// Tranche tokens minted per currency unit
    #[serde(default = "default_rate")]
    pub rate: Decimal,
    pub total_cap: Money,
    #[serde(default)]
    pub interest: Option<InterestSchedule>,
}

fn default_rate() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    CapReached,
    ClosingTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheSale {
    pub id: SaleId,
    pub round: SaleRound,
    pub round_number: u32,
    pub total_raised: Money,
    pub tokens_sold: Money,
    pub finalized: bool,
    pub finalized_at: Option<Moment>,
    pub stop_reason: Option<StopReason>,
    pub picked_interest: Option<InterestRate>,
}

impl TrancheSale {
    pub fn cap_reached(&self) -> bool {
        self.total_raised >= self.round.total_cap
    }

    pub fn is_open(&self, now: Moment) -> bool {
        !self.finalized
            && self.round.opening_time <= now
            && now < self.round.closing_time
            && !self.cap_reached()
    }

    /// Frozen interest once finalized, otherwise the schedule at `now`.
    pub fn current_interest(&self, now: Moment) -> InterestRate {
        if let Some(picked) = self.picked_interest {
            return picked;
        }
        self.round
            .interest
            .map(|s| s.interest_at(self.round.opening_time, now))
            .unwrap_or(InterestRate::ZERO)
    }
}

/// Outcome of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub sale: SaleId,
    pub paid: Money,
    pub tokens: Money,
    /// The purchase filled the cap and stopped the sale
    pub finalized: bool,
}

fn finalize_at(state: &mut EngineState, config: &EngineConfig, id: SaleId, at: Moment, reason: StopReason) -> SettlementResult<()> {
    let sale = state
        .sales
        .get_mut(&id)
        .ok_or_else(|| SettlementError::UnknownSale(id.to_string()))?;
    let picked = sale.current_interest(at);
    sale.finalized = true;
    sale.finalized_at = Some(at);
    sale.stop_reason = Some(reason);
    sale.picked_interest = Some(picked);
    let raised = sale.total_raised;

    let pool = state.pool_mut(id.pool)?;
    if id.tranche == Tranche::Senior {
        // debt up to `at` accrues at the old rate, from `at` on at the picked one
        pool.accrue_senior_debt(at, config.seconds_per_year)?;
        pool.senior_interest = picked;
    }
    info!(sale = %id, ?reason, %raised, picked_interest = %picked, "sale finalized");

    let any_open = state
        .sales
        .values()
        .any(|s| s.id.pool == id.pool && !s.finalized);
    let pool = state.pool_mut(id.pool)?;
    if !any_open && !pool.is_closed() {
        pool.state = PoolState::Active;
    }
    Ok(())
}

/// Finalize the pool's senior sale at its closing time once that has passed.
/// Runs before senior debt moves past the closing time.
pub(crate) fn finalize_elapsed_senior_sale(
    state: &mut EngineState,
    config: &EngineConfig,
    pool: PoolId,
    now: Moment,
) -> SettlementResult<()> {
    let id = SaleId::new(pool, Tranche::Senior);
    let closing = match state.sales.get(&id) {
        Some(sale) if !sale.finalized && now >= sale.round.closing_time => sale.round.closing_time,
        _ => return Ok(()),
    };
    finalize_at(state, config, id, closing, StopReason::ClosingTime)
}

/// Buy without the investor check; used directly for pool-to-pool purchases.
pub(crate) fn purchase(
    state: &mut EngineState,
    config: &EngineConfig,
    id: SaleId,
    buyer: Address,
    amount: Money,
    now: Moment,
) -> SettlementResult<Purchase> {
    ensure_positive_amount("amount", amount)?;
    let pool = state.pool(id.pool)?.clone();
    pool.ensure_open_for_business()?;
    if pool.redeem_disabled {
        return Err(SettlementError::RedeemDisabled(id.pool));
    }

    let sale = state
        .sales
        .get(&id)
        .ok_or_else(|| SettlementError::UnknownSale(id.to_string()))?;
    if !sale.is_open(now) {
        return Err(SettlementError::SaleNotOpen);
    }
    let requested = add(sale.total_raised, amount, "sale total")?;
    if requested > sale.round.total_cap {
        return Err(SettlementError::CapExceeded {
            cap: sale.round.total_cap,
            requested,
        });
    }
    if id.tranche == Tranche::Senior {
        pool.ensure_min_first_loss(add(pool.senior_paid_in, amount, "senior paid in")?, pool.junior_paid_in)?;
    }
    let tokens = floor_units(mul(amount, sale.round.rate, "token rate")?);
    if tokens.is_zero() {
        return Err(SettlementError::invalid("amount", "buys less than one token unit"));
    }

    state
        .ledger_mut(TokenId::Currency(pool.currency))
        .transfer(buyer, pool.address, amount)?;
    state.ledger_mut(id.token()).mint(buyer, tokens)?;

    let sale = state
        .sales
        .get_mut(&id)
        .ok_or_else(|| SettlementError::UnknownSale(id.to_string()))?;
    sale.total_raised = requested;
    sale.tokens_sold = add(sale.tokens_sold, tokens, "tokens sold")?;
    let filled = sale.cap_reached();

    let p = state.pool_mut(id.pool)?;
    match id.tranche {
        Tranche::Senior => {
            p.senior_paid_in = add(p.senior_paid_in, amount, "senior paid in")?;
            p.accrue_senior_debt(now, config.seconds_per_year)?;
            p.senior_debt = add(p.senior_debt, amount, "senior debt")?;
        }
        Tranche::Junior => p.junior_paid_in = add(p.junior_paid_in, amount, "junior paid in")?,
    }

    if filled {
        finalize_at(state, config, id, now, StopReason::CapReached)?;
    }
    Ok(Purchase {
        sale: id,
        paid: amount,
        tokens,
        finalized: filled,
    })
}

impl<A: AccessControl> SettlementEngine<A> {
    /// Open a new round, replacing any round that has not been finalized.
    pub fn start_new_round_sale(
        &mut self,
        id: SaleId,
        caller: Address,
        round: SaleRound,
    ) -> SettlementResult<()> {
        self.transact(&[id.pool], |state, _, access| {
            let pool = state.pool(id.pool)?;
            pool.ensure_admin(&caller, access, "start a sale round")?;
            pool.ensure_open_for_business()?;

            if round.opening_time >= round.closing_time {
                return Err(SettlementError::invalid("closing_time", "must be after opening_time"));
            }
            if round.rate <= Decimal::ZERO {
                return Err(SettlementError::invalid("rate", "must be positive"));
            }
            ensure_positive_amount("total_cap", round.total_cap)?;
            match (id.tranche, &round.interest) {
                (Tranche::Senior, None) => {
                    return Err(SettlementError::invalid("interest", "senior sales need an interest schedule"))
                }
                (Tranche::Junior, Some(_)) => {
                    return Err(SettlementError::invalid("interest", "junior sales carry no interest"))
                }
                (_, Some(schedule)) => schedule.validate()?,
                (Tranche::Junior, None) => {}
            }

            let round_number = match state.sales.get(&id) {
                Some(prev) if !prev.finalized => {
                    warn!(sale = %id, raised = %prev.total_raised, "replacing unfinalized round");
                    prev.round_number
                }
                Some(prev) => prev.round_number + 1,
                None => 1,
            };
            info!(sale = %id, round = round_number, opening = round.opening_time, closing = round.closing_time, cap = %round.total_cap, "sale round started");
            state.sales.insert(
                id,
                TrancheSale {
                    id,
                    round,
                    round_number,
                    total_raised: Decimal::ZERO,
                    tokens_sold: Decimal::ZERO,
                    finalized: false,
                    finalized_at: None,
                    stop_reason: None,
                    picked_interest: None,
                },
            );
            state.pool_mut(id.pool)?.state = PoolState::IssuingTokens;
            Ok(())
        })
    }

    pub fn buy_tokens(
        &mut self,
        id: SaleId,
        buyer: Address,
        amount: Money,
        now: Moment,
    ) -> SettlementResult<Purchase> {
        self.transact(&[id.pool], |state, config, access| {
            if !access.has_role(&buyer, Role::Investor, Some(id.pool)) {
                return Err(SettlementError::unauthorized(buyer, "buy tranche tokens"));
            }
            purchase(state, config, id, buyer, amount, now)
        })
    }

    /// Finalize a stopped sale. Anyone may call this.
    pub fn finalize_sale(&mut self, id: SaleId, now: Moment) -> SettlementResult<TrancheSale> {
        self.transact(&[id.pool], |state, config, _| {
            let sale = state
                .sales
                .get(&id)
                .ok_or_else(|| SettlementError::UnknownSale(id.to_string()))?;
            if sale.finalized {
                return Err(SettlementError::AlreadyFinalized);
            }
            let reason = if sale.cap_reached() {
                StopReason::CapReached
            } else if now >= sale.round.closing_time {
                StopReason::ClosingTime
            } else {
                return Err(SettlementError::SaleStillOpen);
            };
            let at = now.min(sale.round.closing_time);
            finalize_at(state, config, id, at, reason)?;
            state
                .sales
                .get(&id)
                .cloned()
                .ok_or_else(|| SettlementError::UnknownSale(id.to_string()))
        })
    }

    pub fn current_interest(&self, id: SaleId, now: Moment) -> SettlementResult<InterestRate> {
        Ok(self.sale(id)?.current_interest(now))
    }

    /// Have `holder` buy into another pool's sale from its available reserve.
    ///
    /// The target purchase runs first; the holder's books change only after
    /// it succeeds.
    pub fn invest_in_pool(
        &mut self,
        holder: PoolId,
        target: SaleId,
        amount: Money,
        caller: Address,
        now: Moment,
    ) -> SettlementResult<Purchase> {
        self.transact(&[holder, target.pool], |state, config, access| {
            let holder_pool = state.pool(holder)?.clone();
            holder_pool.ensure_admin(&caller, access, "invest pool funds")?;
            let target_pool = state.pool(target.pool)?;
            if target_pool.currency != holder_pool.currency {
                return Err(SettlementError::invalid("target", "pools use different currencies"));
            }
            if state.depends_on(target.pool, holder)? {
                return Err(SettlementError::InvestmentCycle {
                    holder,
                    target: target.pool,
                });
            }
            let available = state.available_reserve(&holder_pool);
            if amount > available {
                return Err(SettlementError::InsufficientReserve {
                    available,
                    requested: amount,
                });
            }

            let bought = purchase(state, config, target, holder_pool.address, amount, now)?;

            let p = state.pool_mut(holder)?;
            match p
                .investments
                .iter_mut()
                .find(|i| i.target == target.pool && i.tranche == target.tranche)
            {
                Some(existing) => {
                    existing.invested = add(existing.invested, amount, "investment")?;
                    existing.tokens = add(existing.tokens, bought.tokens, "investment")?;
                }
                None => p.investments.push(Investment {
                    target: target.pool,
                    tranche: target.tranche,
                    invested: amount,
                    tokens: bought.tokens,
                }),
            }
            info!(holder = %holder, target = %target, %amount, tokens = %bought.tokens, "pool investment booked");
            Ok(bought)
        })
    }
}
