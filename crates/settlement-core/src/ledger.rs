//! Narrow fungible-token operations (mint, burn, transfer, lock).
//!
//! Stands in for the external currency and tranche token contracts. Locked
//! balances are tokens an investor has committed to a pending redeem order:
//! still part of total supply, no longer transferable.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::error::SettlementError;
use crate::fixed::{add, ensure_amount};
use crate::types::{Address, Money};
use crate::SettlementResult;

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    balances: BTreeMap<Address, Money>,
    locked: BTreeMap<Address, Money>,
    total_supply: Money,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_supply(&self) -> Money {
        self.total_supply
    }

    /// Free (transferable) balance.
    pub fn balance_of(&self, holder: &Address) -> Money {
        self.balances.get(holder).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn locked_of(&self, holder: &Address) -> Money {
        self.locked.get(holder).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total_locked(&self) -> Money {
        self.locked.values().copied().sum()
    }

    pub fn mint(&mut self, to: Address, amount: Money) -> SettlementResult<()> {
        ensure_amount("mint amount", amount)?;
        if to.is_zero() {
            return Err(SettlementError::ZeroAddress { field: "mint recipient".into() });
        }
        let supply = add(self.total_supply, amount, "total supply")?;
        self.credit(to, amount)?;
        self.total_supply = supply;
        Ok(())
    }

    pub fn burn(&mut self, from: Address, amount: Money) -> SettlementResult<()> {
        ensure_amount("burn amount", amount)?;
        self.debit(from, amount)?;
        self.total_supply -= amount;
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: Money) -> SettlementResult<()> {
        ensure_amount("transfer amount", amount)?;
        if to.is_zero() {
            return Err(SettlementError::ZeroAddress { field: "transfer recipient".into() });
        }
        add(self.balance_of(&to), amount, "recipient balance")?;
        self.debit(from, amount)?;
        self.credit(to, amount)
    }

    /// Move `amount` from the free balance into the locked balance.
    pub fn lock(&mut self, holder: Address, amount: Money) -> SettlementResult<()> {
        ensure_amount("lock amount", amount)?;
        let locked = add(self.locked_of(&holder), amount, "locked balance")?;
        self.debit(holder, amount)?;
        self.locked.insert(holder, locked);
        Ok(())
    }

    pub fn burn_locked(&mut self, holder: Address, amount: Money) -> SettlementResult<()> {
        ensure_amount("burn amount", amount)?;
        let available = self.locked_of(&holder);
        if available < amount {
            return Err(SettlementError::InsufficientBalance {
                holder,
                available,
                requested: amount,
            });
        }
        let remaining = available - amount;
        if remaining.is_zero() {
            self.locked.remove(&holder);
        } else {
            self.locked.insert(holder, remaining);
        }
        self.total_supply -= amount;
        Ok(())
    }

    fn credit(&mut self, holder: Address, amount: Money) -> SettlementResult<()> {
        let balance = add(self.balance_of(&holder), amount, "balance")?;
        self.balances.insert(holder, balance);
        Ok(())
    }

    fn debit(&mut self, holder: Address, amount: Money) -> SettlementResult<()> {
        let available = self.balance_of(&holder);
        if available < amount {
            return Err(SettlementError::InsufficientBalance {
                holder,
                available,
                requested: amount,
            });
        }
        let remaining = available - amount;
        if remaining.is_zero() {
            self.balances.remove(&holder);
        } else {
            self.balances.insert(holder, remaining);
        }
        Ok(())
    }
}
