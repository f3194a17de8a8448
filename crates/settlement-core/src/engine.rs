//! Engine state, staged commits and the per-pool lock set.
//!
//! Every mutating operation runs against a clone of [`EngineState`] and the
//! clone replaces the live state only when the operation returns `Ok`, so a
//! failing batch leaves no trace. Operations acquire the locks of every pool
//! they touch before staging; a pool that is already locked yields
//! [`SettlementError::Reentrancy`].

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::auth::{AccessControl, NonceStore};
use crate::config::EngineConfig;
use crate::distribution::{DistributionCycle, RedeemRecord};
use crate::error::SettlementError;
use crate::ledger::Ledger;
use crate::loan::Loan;
use crate::pool::Pool;
use crate::risk::RiskScore;
use crate::sale::{SaleId, TrancheSale};
use crate::types::{Address, AssetId, Money, PoolId, TokenId};
use crate::SettlementResult;

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// Set of pools with an operation in flight.
#[derive(Debug, Clone, Default)]
pub struct PoolLocks {
    held: Arc<Mutex<BTreeSet<PoolId>>>,
}

impl PoolLocks {
    pub fn acquire(&self, pool: PoolId) -> SettlementResult<PoolGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(pool) {
            return Err(SettlementError::Reentrancy(pool));
        }
        Ok(PoolGuard {
            pool,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, pool: PoolId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pool)
    }
}

/// Releases its pool on drop, including on error paths.
#[derive(Debug)]
pub struct PoolGuard {
    pool: PoolId,
    held: Arc<Mutex<BTreeSet<PoolId>>>,
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pool);
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub(crate) pools: BTreeMap<PoolId, Pool>,
    pub(crate) loans: BTreeMap<AssetId, Loan>,
    pub(crate) mint_nonces: NonceStore,
    pub(crate) sales: BTreeMap<SaleId, TrancheSale>,
    pub(crate) tokens: BTreeMap<TokenId, Ledger>,
    pub(crate) redeem_orders: BTreeMap<(Address, u64), RedeemRecord>,
    pub(crate) redeem_nonces: NonceStore,
    pub(crate) cycles: BTreeMap<PoolId, DistributionCycle>,
    pub(crate) next_pool_id: u64,
}

impl EngineState {
    pub(crate) fn pool(&self, id: PoolId) -> SettlementResult<&Pool> {
        self.pools.get(&id).ok_or(SettlementError::UnknownPool(id))
    }

    pub(crate) fn pool_mut(&mut self, id: PoolId) -> SettlementResult<&mut Pool> {
        self.pools.get_mut(&id).ok_or(SettlementError::UnknownPool(id))
    }

    pub(crate) fn loan(&self, id: &AssetId) -> SettlementResult<&Loan> {
        self.loans.get(id).ok_or(SettlementError::UnknownAsset(*id))
    }

    /// Loan together with the risk bucket it is valued under.
    pub(crate) fn loan_with_bucket(&self, id: &AssetId) -> SettlementResult<(&Loan, &RiskScore)> {
        let loan = self.loan(id)?;
        let bucket = self.pool(loan.pool)?.risk_scores.get(loan.risk_score)?;
        Ok((loan, bucket))
    }

    pub(crate) fn balance(&self, token: TokenId, holder: &Address) -> Money {
        self.tokens
            .get(&token)
            .map(|l| l.balance_of(holder))
            .unwrap_or(Decimal::ZERO)
    }

    pub(crate) fn locked(&self, token: TokenId, holder: &Address) -> Money {
        self.tokens
            .get(&token)
            .map(|l| l.locked_of(holder))
            .unwrap_or(Decimal::ZERO)
    }

    pub(crate) fn total_supply(&self, token: TokenId) -> Money {
        self.tokens
            .get(&token)
            .map(Ledger::total_supply)
            .unwrap_or(Decimal::ZERO)
    }

    pub(crate) fn total_locked(&self, token: TokenId) -> Money {
        self.tokens
            .get(&token)
            .map(Ledger::total_locked)
            .unwrap_or(Decimal::ZERO)
    }

    pub(crate) fn ledger_mut(&mut self, token: TokenId) -> &mut Ledger {
        self.tokens.entry(token).or_default()
    }

    /// Currency held by the pool, earmarked funds included.
    pub(crate) fn reserve(&self, pool: &Pool) -> Money {
        self.balance(TokenId::Currency(pool.currency), &pool.address)
    }

    /// Reserve not committed to a pending distribution.
    pub(crate) fn available_reserve(&self, pool: &Pool) -> Money {
        (self.reserve(pool) - pool.earmarked).max(Decimal::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Settlement engine over an injected access-control collaborator.
#[derive(Debug)]
pub struct SettlementEngine<A: AccessControl> {
    config: EngineConfig,
    access: A,
    state: EngineState,
    locks: PoolLocks,
}

impl<A: AccessControl> SettlementEngine<A> {
    pub fn new(config: EngineConfig, access: A) -> SettlementResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            access,
            state: EngineState {
                next_pool_id: 1,
                ..EngineState::default()
            },
            locks: PoolLocks::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    /// Shared handle to the lock set, for hosts that call back into the engine.
    pub fn locks(&self) -> PoolLocks {
        self.locks.clone()
    }

    pub(crate) fn state(&self) -> &EngineState {
        &self.state
    }

    // -- Read accessors -----------------------------------------------------

    pub fn pool(&self, id: PoolId) -> SettlementResult<&Pool> {
        self.state.pool(id)
    }

    pub fn pool_ids(&self) -> Vec<PoolId> {
        self.state.pools.keys().copied().collect()
    }

    pub fn loan(&self, id: &AssetId) -> SettlementResult<&Loan> {
        self.state.loan(id)
    }

    pub fn sale(&self, id: SaleId) -> SettlementResult<&TrancheSale> {
        self.state
            .sales
            .get(&id)
            .ok_or_else(|| SettlementError::UnknownSale(id.to_string()))
    }

    pub fn balance_of(&self, token: TokenId, holder: &Address) -> Money {
        self.state.balance(token, holder)
    }

    pub fn locked_of(&self, token: TokenId, holder: &Address) -> Money {
        self.state.locked(token, holder)
    }

    pub fn total_supply(&self, token: TokenId) -> Money {
        self.state.total_supply(token)
    }

    /// Next nonce a validator must use in a mint authorization.
    pub fn next_mint_nonce(&self, validator: &Address) -> u64 {
        self.state.mint_nonces.next_expected(validator)
    }

    pub fn last_redeem_nonce(&self, investor: &Address) -> Option<u64> {
        self.state.redeem_nonces.last(investor)
    }

    pub fn redeem_record(&self, investor: &Address, nonce: u64) -> Option<&RedeemRecord> {
        self.state.redeem_orders.get(&(*investor, nonce))
    }

    pub fn distribution_cycle(&self, pool: PoolId) -> Option<&DistributionCycle> {
        self.state.cycles.get(&pool)
    }

    pub fn reserve(&self, pool: PoolId) -> SettlementResult<Money> {
        Ok(self.state.reserve(self.state.pool(pool)?))
    }

    pub fn available_reserve(&self, pool: PoolId) -> SettlementResult<Money> {
        Ok(self.state.available_reserve(self.state.pool(pool)?))
    }

    /// Credit currency from the external token contract.
    pub fn fund(&mut self, currency: Address, holder: Address, amount: Money) -> SettlementResult<()> {
        self.transact(&[], |state, _, _| {
            state.ledger_mut(TokenId::Currency(currency)).mint(holder, amount)
        })
    }

    /// Run `op` on staged state, committing only on success.
    ///
    /// Staging clones the whole `EngineState`, so every call costs time in
    /// proportion to total engine state rather than to the locked pools.
    pub(crate) fn transact<T>(
        &mut self,
        pools: &[PoolId],
        op: impl FnOnce(&mut EngineState, &EngineConfig, &A) -> SettlementResult<T>,
    ) -> SettlementResult<T> {
        let mut guards = Vec::with_capacity(pools.len());
        for pool in pools {
            guards.push(self.locks.acquire(*pool)?);
        }

        let mut staged = self.state.clone();
        let out = op(&mut staged, &self.config, &self.access)?;
        self.state = staged;
        drop(guards);
        Ok(out)
    }
}
