//! Tranche valuation and the senior-before-junior redemption waterfall.
//!
//! Redemptions are two-phase. `pre_distribute` snapshots token prices and
//! earmarks currency (senior first, junior from what is left), then
//! `disburse_all` burns the locked tokens and pays investors out of the
//! earmarked funds. Earmarked currency is invisible to loan financing and
//! pool-to-pool investment while the cycle is pending.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::auth::{message_digest, verify, AccessControl, KeyPair, PublicKey, Role, SignatureBytes};
use crate::engine::{EngineState, SettlementEngine};
use crate::error::SettlementError;
use crate::fixed::{add, div, ensure_amount, ensure_positive_amount, floor_units, mul, to_price, InterestRate};
use crate::pool::PoolState;
use crate::sale::finalize_elapsed_senior_sale;
use crate::types::{Address, Moment, Money, PoolId, TokenId, Tranche};
use crate::SettlementResult;

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheValues {
    pub pool_value: Money,
    pub senior_debt: Money,
    pub senior_asset: Money,
    pub junior_asset: Money,
}

impl TrancheValues {
    pub fn asset(&self, tranche: Tranche) -> Money {
        match tranche {
            Tranche::Senior => self.senior_asset,
            Tranche::Junior => self.junior_asset,
        }
    }
}

impl EngineState {
    /// Whether `pool` holds, directly or through other pools, tokens of `other`.
    pub(crate) fn depends_on(&self, pool: PoolId, other: PoolId) -> SettlementResult<bool> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![pool];
        while let Some(current) = stack.pop() {
            if current == other {
                return Ok(true);
            }
            if seen.insert(current) {
                stack.extend(self.pool(current)?.investments.iter().map(|i| i.target));
            }
        }
        Ok(false)
    }

    fn pool_value(
        &self,
        pool: PoolId,
        at: Moment,
        seconds_per_year: u64,
        visiting: &mut BTreeSet<PoolId>,
    ) -> SettlementResult<Money> {
        if !visiting.insert(pool) {
            return Err(SettlementError::InvestmentCycle {
                holder: pool,
                target: pool,
            });
        }
        let p = self.pool(pool)?;
        let mut value = add(self.reserve(p), self.loans_nav(pool, at, seconds_per_year)?, "pool value")?;
        for inv in &p.investments {
            let held = self.balance(TokenId::tranche(inv.target, inv.tranche), &p.address);
            if held.is_zero() {
                continue;
            }
            let price = self.token_price(inv.target, inv.tranche, at, seconds_per_year, visiting)?;
            value = add(value, floor_units(mul(held, price, "investment value")?), "pool value")?;
        }
        visiting.remove(&pool);
        Ok(value)
    }

    fn tranche_values(
        &self,
        pool: PoolId,
        at: Moment,
        seconds_per_year: u64,
        visiting: &mut BTreeSet<PoolId>,
    ) -> SettlementResult<TrancheValues> {
        let pool_value = self.pool_value(pool, at, seconds_per_year, visiting)?;
        let senior_debt = self.pool(pool)?.senior_debt_at(at, seconds_per_year)?;
        let senior_asset = senior_debt.min(pool_value);
        Ok(TrancheValues {
            pool_value,
            senior_debt,
            senior_asset,
            junior_asset: pool_value - senior_asset,
        })
    }

    fn token_price(
        &self,
        pool: PoolId,
        tranche: Tranche,
        at: Moment,
        seconds_per_year: u64,
        visiting: &mut BTreeSet<PoolId>,
    ) -> SettlementResult<Decimal> {
        let supply = self.total_supply(TokenId::tranche(pool, tranche));
        if supply.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let asset = self
            .tranche_values(pool, at, seconds_per_year, visiting)?
            .asset(tranche);
        Ok(to_price(div(asset, supply, "token price")?))
    }

    pub(crate) fn values_at(&self, pool: PoolId, at: Moment, seconds_per_year: u64) -> SettlementResult<TrancheValues> {
        self.tranche_values(pool, at, seconds_per_year, &mut BTreeSet::new())
    }

    pub(crate) fn price_at(&self, pool: PoolId, tranche: Tranche, at: Moment, seconds_per_year: u64) -> SettlementResult<Decimal> {
        self.token_price(pool, tranche, at, seconds_per_year, &mut BTreeSet::new())
    }
}

/// Point-in-time overview of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub pool: PoolId,
    pub state: PoolState,
    pub reserve: Money,
    pub earmarked: Money,
    pub loans_nav: Money,
    pub live_loans: usize,
    pub pool_value: Money,
    pub senior_interest: InterestRate,
    pub senior_debt: Money,
    pub senior_asset: Money,
    pub junior_asset: Money,
    pub senior_supply: Money,
    pub junior_supply: Money,
    pub senior_price: Decimal,
    pub junior_price: Decimal,
}

// ---------------------------------------------------------------------------
// Redeem orders
// ---------------------------------------------------------------------------

/// Investor request to redeem tranche tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemOrder {
    pub pool: PoolId,
    pub tranche: Tranche,
    pub investor: Address,
    pub amount: Money,
    pub nonce: u64,
    pub chain_id: u64,
}

impl RedeemOrder {
    pub fn digest(&self) -> SettlementResult<[u8; 32]> {
        ensure_positive_amount("amount", self.amount)?;
        let amount = self
            .amount
            .to_u128()
            .ok_or_else(|| SettlementError::invalid("amount", "does not fit in 128 bits"))?;
        let tranche = match self.tranche {
            Tranche::Senior => 0u8,
            Tranche::Junior => 1u8,
        };
        Ok(message_digest(
            b"REDEEM_ORDER_V1",
            &[
                self.investor.as_bytes(),
                &self.pool.0.to_be_bytes(),
                &[tranche],
                &amount.to_be_bytes(),
                &self.nonce.to_be_bytes(),
                &self.chain_id.to_be_bytes(),
            ],
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRedeemOrder {
    pub order: RedeemOrder,
    pub signer: PublicKey,
    pub signature: SignatureBytes,
}

impl SignedRedeemOrder {
    pub fn sign(key: &KeyPair, order: RedeemOrder) -> SettlementResult<Self> {
        let digest = order.digest()?;
        Ok(Self {
            signer: key.public_key(),
            signature: key.sign(&digest),
            order,
        })
    }
}

/// Accepted order with the part not yet disbursed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemRecord {
    pub order: RedeemOrder,
    pub remaining: Money,
    pub submitted_at: Moment,
}

// ---------------------------------------------------------------------------
// Distribution cycles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheReservation {
    /// Locked tokens offered for redemption in this cycle
    pub tokens: Money,
    /// Price snapshot taken by `pre_distribute`
    pub price: Decimal,
    pub reserved: Money,
    pub disbursed: Money,
    pub tokens_redeemed: Money,
}

impl TrancheReservation {
    pub fn remaining(&self) -> Money {
        (self.reserved - self.disbursed).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionCycle {
    pub pool: PoolId,
    pub opened_at: Moment,
    pub senior: TrancheReservation,
    pub junior: TrancheReservation,
}

impl DistributionCycle {
    pub fn reservation(&self, tranche: Tranche) -> &TrancheReservation {
        match tranche {
            Tranche::Senior => &self.senior,
            Tranche::Junior => &self.junior,
        }
    }

    fn reservation_mut(&mut self, tranche: Tranche) -> &mut TrancheReservation {
        match tranche {
            Tranche::Senior => &mut self.senior,
            Tranche::Junior => &mut self.junior,
        }
    }

    pub fn outstanding(&self) -> Money {
        self.senior.remaining() + self.junior.remaining()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disbursement {
    pub investor: Address,
    pub currency: Money,
    pub tokens: Money,
}

/// Reduce the investor's open orders oldest nonce first.
fn consume_orders(
    state: &mut EngineState,
    investor: Address,
    pool: PoolId,
    tranche: Tranche,
    mut tokens: Money,
) -> SettlementResult<()> {
    let keys: Vec<(Address, u64)> = state
        .redeem_orders
        .range((investor, 0)..=(investor, u64::MAX))
        .filter(|(_, r)| r.order.pool == pool && r.order.tranche == tranche)
        .map(|(k, _)| *k)
        .collect();

    for key in keys {
        if tokens.is_zero() {
            break;
        }
        let Some(record) = state.redeem_orders.get_mut(&key) else {
            continue;
        };
        let take = record.remaining.min(tokens);
        record.remaining -= take;
        tokens -= take;
        if record.remaining.is_zero() {
            state.redeem_orders.remove(&key);
        }
    }

    if !tokens.is_zero() {
        return Err(SettlementError::invalid(
            "token_amounts",
            format!("{investor} has no open orders covering {tokens} more tokens"),
        ));
    }
    Ok(())
}

fn ensure_backend(access: &dyn AccessControl, caller: &Address, pool: PoolId) -> SettlementResult<()> {
    if access.has_role(caller, Role::Backend, Some(pool)) {
        Ok(())
    } else {
        Err(SettlementError::unauthorized(*caller, "run distributions"))
    }
}

impl<A: AccessControl> SettlementEngine<A> {
    pub fn pool_value(&self, pool: PoolId, at: Moment) -> SettlementResult<Money> {
        Ok(self.tranche_values(pool, at)?.pool_value)
    }

    pub fn tranche_values(&self, pool: PoolId, at: Moment) -> SettlementResult<TrancheValues> {
        self.state().values_at(pool, at, self.config().seconds_per_year)
    }

    pub fn senior_asset(&self, pool: PoolId, at: Moment) -> SettlementResult<Money> {
        Ok(self.tranche_values(pool, at)?.senior_asset)
    }

    pub fn junior_asset(&self, pool: PoolId, at: Moment) -> SettlementResult<Money> {
        Ok(self.tranche_values(pool, at)?.junior_asset)
    }

    /// Tranche asset value per token; zero while the tranche has no supply.
    pub fn calc_token_price(&self, pool: PoolId, tranche: Tranche, at: Moment) -> SettlementResult<Decimal> {
        self.state()
            .price_at(pool, tranche, at, self.config().seconds_per_year)
    }

    pub fn pool_summary(&self, pool: PoolId, at: Moment) -> SettlementResult<PoolSummary> {
        let state = self.state();
        let p = state.pool(pool)?;
        let values = self.tranche_values(pool, at)?;
        Ok(PoolSummary {
            pool,
            state: p.state,
            reserve: state.reserve(p),
            earmarked: p.earmarked,
            loans_nav: self.current_nav(pool, at)?,
            live_loans: p.assets.len(),
            pool_value: values.pool_value,
            senior_interest: p.senior_interest,
            senior_debt: values.senior_debt,
            senior_asset: values.senior_asset,
            junior_asset: values.junior_asset,
            senior_supply: state.total_supply(TokenId::tranche(pool, Tranche::Senior)),
            junior_supply: state.total_supply(TokenId::tranche(pool, Tranche::Junior)),
            senior_price: self.calc_token_price(pool, Tranche::Senior, at)?,
            junior_price: self.calc_token_price(pool, Tranche::Junior, at)?,
        })
    }

    /// Accept a signed redeem order and lock the tokens it covers.
    pub fn redeem_order(&mut self, signed: SignedRedeemOrder, now: Moment) -> SettlementResult<RedeemRecord> {
        let pool = signed.order.pool;
        self.transact(&[pool], |state, config, _| {
            let order = &signed.order;
            if order.chain_id != config.chain_id {
                return Err(SettlementError::WrongChain {
                    expected: config.chain_id,
                    actual: order.chain_id,
                });
            }
            if signed.signer.to_address() != order.investor {
                return Err(SettlementError::InvalidSignature);
            }
            let digest = order.digest()?;
            if !verify(&signed.signer, &digest, &signed.signature) {
                return Err(SettlementError::InvalidSignature);
            }
            if state.pool(pool)?.redeem_disabled {
                return Err(SettlementError::RedeemDisabled(pool));
            }
            state.redeem_nonces.consume_increasing(order.investor, order.nonce)?;
            state
                .ledger_mut(TokenId::tranche(pool, order.tranche))
                .lock(order.investor, order.amount)?;

            let record = RedeemRecord {
                order: order.clone(),
                remaining: order.amount,
                submitted_at: now,
            };
            state
                .redeem_orders
                .insert((order.investor, order.nonce), record.clone());
            info!(pool = %pool, tranche = %order.tranche, investor = %order.investor, amount = %order.amount, nonce = order.nonce, "redeem order accepted");
            Ok(record)
        })
    }

    /// Snapshot prices and earmark currency for the offered redemptions.
    ///
    /// Senior is reserved in full before any junior amount is computed.
    pub fn pre_distribute(
        &mut self,
        pool: PoolId,
        caller: Address,
        amount: Money,
        tranches: &[Tranche],
        token_amounts: &[Money],
        now: Moment,
    ) -> SettlementResult<DistributionCycle> {
        self.transact(&[pool], |state, config, access| {
            ensure_backend(access, &caller, pool)?;
            finalize_elapsed_senior_sale(state, config, pool, now)?;
            if tranches.len() != token_amounts.len() {
                return Err(SettlementError::MalformedOrder {
                    field: "token_amounts".into(),
                    expected: tranches.len(),
                    actual: token_amounts.len(),
                });
            }
            if state.cycles.get(&pool).is_some_and(|c| !c.outstanding().is_zero()) {
                return Err(SettlementError::DistributionPending(pool));
            }
            ensure_amount("amount", amount)?;
            let p = state.pool(pool)?;
            let available = state.available_reserve(p);
            if amount > available {
                return Err(SettlementError::InsufficientReserve {
                    available,
                    requested: amount,
                });
            }

            let mut offered = [Decimal::ZERO; 2];
            let mut seen = BTreeSet::new();
            for (tranche, tokens) in tranches.iter().zip(token_amounts) {
                ensure_amount("token_amounts", *tokens)?;
                if !seen.insert(*tranche) {
                    return Err(SettlementError::invalid("tranches", format!("{tranche} listed twice")));
                }
                let locked = state.total_locked(TokenId::tranche(pool, *tranche));
                if *tokens > locked {
                    return Err(SettlementError::invalid(
                        "token_amounts",
                        format!("{tokens} {tranche} offered but only {locked} locked in redeem orders"),
                    ));
                }
                offered[*tranche as usize] = *tokens;
            }

            let mut cycle = DistributionCycle {
                pool,
                opened_at: now,
                senior: TrancheReservation::default(),
                junior: TrancheReservation::default(),
            };
            let mut left = amount;
            for tranche in [Tranche::Senior, Tranche::Junior] {
                let tokens = offered[tranche as usize];
                let price = state.price_at(pool, tranche, now, config.seconds_per_year)?;
                let entitled = floor_units(mul(tokens, price, "redemption entitlement")?);
                let reserved = entitled.min(left);
                left -= reserved;
                let slot = cycle.reservation_mut(tranche);
                slot.tokens = tokens;
                slot.price = price;
                slot.reserved = reserved;
                debug!(pool = %pool, %tranche, %tokens, %price, %reserved, "tranche reserved");
            }

            let total = cycle.outstanding();
            let p = state.pool_mut(pool)?;
            p.earmarked = add(p.earmarked, total, "earmarked reserve")?;
            info!(pool = %pool, senior = %cycle.senior.reserved, junior = %cycle.junior.reserved, "distribution cycle opened");
            state.cycles.insert(pool, cycle.clone());
            Ok(cycle)
        })
    }

    /// Pay out one tranche of the open cycle and burn the redeemed tokens.
    #[allow(clippy::too_many_arguments)]
    pub fn disburse_all(
        &mut self,
        pool: PoolId,
        caller: Address,
        tranche: Tranche,
        investors: &[Address],
        currency_amounts: &[Money],
        token_amounts: &[Money],
        now: Moment,
    ) -> SettlementResult<Vec<Disbursement>> {
        self.transact(&[pool], |state, config, access| {
            ensure_backend(access, &caller, pool)?;
            finalize_elapsed_senior_sale(state, config, pool, now)?;
            for (field, len) in [("currency_amounts", currency_amounts.len()), ("token_amounts", token_amounts.len())] {
                if len != investors.len() {
                    return Err(SettlementError::MalformedOrder {
                        field: field.into(),
                        expected: investors.len(),
                        actual: len,
                    });
                }
            }
            let cycle = state
                .cycles
                .get(&pool)
                .ok_or(SettlementError::NoActiveDistribution(pool))?;
            if tranche == Tranche::Junior && !cycle.senior.remaining().is_zero() {
                return Err(SettlementError::SeniorFirst);
            }
            let slot = cycle.reservation(tranche).clone();

            let mut total_paid = Decimal::ZERO;
            let mut total_tokens = Decimal::ZERO;
            for (paid, tokens) in currency_amounts.iter().zip(token_amounts) {
                ensure_amount("currency_amounts", *paid)?;
                ensure_amount("token_amounts", *tokens)?;
                let entitled = floor_units(mul(*tokens, slot.price, "redemption entitlement")?);
                if *paid > entitled {
                    return Err(SettlementError::ExceedsEntitlement {
                        entitled,
                        requested: *paid,
                    });
                }
                total_paid = add(total_paid, *paid, "disbursement total")?;
                total_tokens = add(total_tokens, *tokens, "disbursement total")?;
            }
            if total_paid > slot.remaining() {
                return Err(SettlementError::ExceedsEntitlement {
                    entitled: slot.remaining(),
                    requested: total_paid,
                });
            }
            if total_tokens > slot.tokens - slot.tokens_redeemed {
                return Err(SettlementError::invalid(
                    "token_amounts",
                    "exceed the tokens offered in this cycle",
                ));
            }

            let p = state.pool(pool)?.clone();
            let token = TokenId::tranche(pool, tranche);
            let mut out = Vec::with_capacity(investors.len());
            for ((investor, paid), tokens) in investors.iter().zip(currency_amounts).zip(token_amounts) {
                if investor.is_zero() {
                    return Err(SettlementError::ZeroAddress { field: "investor".into() });
                }
                if !tokens.is_zero() {
                    state.ledger_mut(token).burn_locked(*investor, *tokens)?;
                    consume_orders(state, *investor, pool, tranche, *tokens)?;
                }
                if !paid.is_zero() {
                    state
                        .ledger_mut(TokenId::Currency(p.currency))
                        .transfer(p.address, *investor, *paid)?;
                }
                out.push(Disbursement {
                    investor: *investor,
                    currency: *paid,
                    tokens: *tokens,
                });
            }

            let mut released = Decimal::ZERO;
            if let Some(cycle) = state.cycles.get_mut(&pool) {
                let slot = cycle.reservation_mut(tranche);
                slot.disbursed = add(slot.disbursed, total_paid, "disbursed")?;
                slot.tokens_redeemed = add(slot.tokens_redeemed, total_tokens, "tokens redeemed")?;
                // per-investor floors can leave dust once every offered token is burned
                if slot.tokens_redeemed >= slot.tokens {
                    released = slot.remaining();
                    slot.reserved = slot.disbursed;
                }
            }
            if !released.is_zero() {
                debug!(pool = %pool, %tranche, %released, "reservation dust returned to reserve");
            }
            let p = state.pool_mut(pool)?;
            p.earmarked = (p.earmarked - total_paid - released).max(Decimal::ZERO);
            match tranche {
                Tranche::Senior => {
                    p.accrue_senior_debt(now, config.seconds_per_year)?;
                    p.senior_debt = (p.senior_debt - total_paid).max(Decimal::ZERO);
                    p.senior_paid_in = (p.senior_paid_in - total_paid).max(Decimal::ZERO);
                }
                Tranche::Junior => {
                    p.junior_paid_in = (p.junior_paid_in - total_paid).max(Decimal::ZERO);
                    if !p.senior_paid_in.is_zero() {
                        p.ensure_min_first_loss(p.senior_paid_in, p.junior_paid_in)?;
                    }
                }
            }
            info!(pool = %pool, %tranche, investors = out.len(), paid = %total_paid, burned = %total_tokens, "disbursed");
            Ok(out)
        })
    }

    /// Close the open cycle and release whatever it still earmarks.
    pub fn release_distribution(&mut self, pool: PoolId, caller: Address) -> SettlementResult<Money> {
        self.transact(&[pool], |state, _, access| {
            ensure_backend(access, &caller, pool)?;
            let cycle = state
                .cycles
                .remove(&pool)
                .ok_or(SettlementError::NoActiveDistribution(pool))?;
            let released = cycle.outstanding();
            let p = state.pool_mut(pool)?;
            p.earmarked = (p.earmarked - released).max(Decimal::ZERO);
            info!(pool = %pool, %released, "distribution cycle released");
            Ok(released)
        })
    }
}
