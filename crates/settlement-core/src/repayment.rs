use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{AccessControl, Role};
use crate::engine::{EngineState, SettlementEngine};
use crate::error::SettlementError;
use crate::loan::{LoanStatus, RepaymentSplit};
use crate::types::{Address, AssetId, Moment, Money, PoolId, TokenId};
use crate::SettlementResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentReceipt {
    pub asset: AssetId,
    #[serde(flatten)]
    pub split: RepaymentSplit,
    pub concluded: bool,
}

/// Mark loans concluded and release them from their pools.
fn conclude(
    state: &mut EngineState,
    creditors: &[Address],
    ids: &[AssetId],
    terms_registry: &Address,
) -> SettlementResult<()> {
    if creditors.len() != ids.len() {
        return Err(SettlementError::MalformedOrder {
            field: "creditors".into(),
            expected: ids.len(),
            actual: creditors.len(),
        });
    }
    if terms_registry.is_zero() {
        return Err(SettlementError::ZeroAddress { field: "terms_registry".into() });
    }

    for (creditor, id) in creditors.iter().zip(ids) {
        if creditor.is_zero() {
            return Err(SettlementError::ZeroAddress { field: "creditor".into() });
        }
        let loan = state
            .loans
            .get_mut(id)
            .ok_or(SettlementError::UnknownAsset(*id))?;
        if loan.is_concluded() {
            return Err(SettlementError::AlreadyConcluded(*id));
        }
        if loan.terms_registry != *terms_registry {
            return Err(SettlementError::invalid("terms_registry", "does not match the loan"));
        }
        if loan.creditor != *creditor {
            return Err(SettlementError::invalid("creditor", "does not own the loan"));
        }
        loan.status = LoanStatus::Concluded;
        let pool = loan.pool;
        state.pool_mut(pool)?.assets.remove(id);
        info!(asset = %id, pool = %pool, "loan concluded");
    }
    Ok(())
}

fn pools_of(state: &EngineState, ids: &[AssetId]) -> Vec<PoolId> {
    let mut pools: Vec<PoolId> = ids
        .iter()
        .filter_map(|id| state.loans.get(id).map(|l| l.pool))
        .collect();
    pools.sort();
    pools.dedup();
    pools
}

impl<A: AccessControl> SettlementEngine<A> {
    /// Settle loans on behalf of the repayment router.
    pub fn conclude_loans(
        &mut self,
        caller: Address,
        creditors: &[Address],
        ids: &[AssetId],
        terms_registry: Address,
    ) -> SettlementResult<()> {
        let pools = pools_of(self.state(), ids);
        self.transact(&pools, |state, config, access| {
            if caller != config.repayment_router
                && !access.has_role(&caller, Role::RepaymentRouter, None)
            {
                return Err(SettlementError::unauthorized(caller, "conclude loans"));
            }
            conclude(state, creditors, ids, &terms_registry)
        })
    }

    /// Route repayments into the owning pools, concluding loans paid in full.
    pub fn repay(
        &mut self,
        payer: Address,
        ids: &[AssetId],
        amounts: &[Money],
        now: Moment,
    ) -> SettlementResult<Vec<RepaymentReceipt>> {
        if ids.len() != amounts.len() {
            return Err(SettlementError::MalformedOrder {
                field: "amounts".into(),
                expected: ids.len(),
                actual: amounts.len(),
            });
        }
        let pools = pools_of(self.state(), ids);
        self.transact(&pools, |state, config, _| {
            let mut receipts = Vec::with_capacity(ids.len());
            for (id, amount) in ids.iter().zip(amounts) {
                let (loan, bucket) = state.loan_with_bucket(id)?;
                if loan.is_concluded() {
                    return Err(SettlementError::AlreadyConcluded(*id));
                }
                let bucket = bucket.clone();
                let pool = state.pool(loan.pool)?.clone();

                let loan = state
                    .loans
                    .get_mut(id)
                    .ok_or(SettlementError::UnknownAsset(*id))?;
                let split = loan.apply_repayment(&bucket, *amount, now, config.seconds_per_year)?;
                let remaining = loan.outstanding_at(&bucket, now, config.seconds_per_year)?;
                let (creditor, registry) = (loan.creditor, loan.terms_registry);

                let applied = split.applied();
                if applied > Decimal::ZERO {
                    state
                        .ledger_mut(TokenId::Currency(pool.currency))
                        .transfer(payer, pool.address, applied)?;
                }

                let concluded = remaining.is_zero();
                if concluded {
                    conclude(state, &[creditor], &[*id], &registry)?;
                }
                info!(asset = %id, pool = %pool.id, interest = %split.to_interest, principal = %split.to_principal, concluded, "repayment booked");
                receipts.push(RepaymentReceipt {
                    asset: *id,
                    split,
                    concluded,
                });
            }
            Ok(receipts)
        })
    }
}
