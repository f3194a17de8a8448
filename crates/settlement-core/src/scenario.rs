//! Scripted replay of engine operations.
//!
//! A scenario names its parties instead of carrying keys: every party's
//! signing key is derived from its name, so a file can be replayed
//! deterministically and signatures can be produced on the fly. Pools are
//! referenced by id in creation order (the first pool is `1`), loans by the
//! label given when they were tokenized.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::auth::{KeyPair, Role, RoleRegistry};
use crate::config::EngineConfig;
use crate::distribution::{PoolSummary, RedeemOrder, SignedRedeemOrder};
use crate::engine::SettlementEngine;
use crate::error::{ErrorKind, SettlementError};
use crate::fixed::Ratio;
use crate::kernel::{asset_id, DebtOrder, MintAuthorization};
use crate::pool::PoolParams;
use crate::risk::RiskScore;
use crate::sale::{SaleId, SaleRound};
use crate::terms::LoanTerms;
use crate::types::{with_metadata, Address, AssetId, ComputationOutput, Moment, Money, PoolId, Tranche};
use crate::SettlementResult;

/// Address of a named party.
pub fn party(name: &str) -> Address {
    KeyPair::from_name(name).address()
}

/// Address of a currency by its code, e.g. `USDC`.
pub fn currency(code: &str) -> Address {
    Address::labeled(code)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(default)]
    pub grants: Vec<Grant>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub party: String,
    pub role: Role,
    /// Omitted for a global grant
    #[serde(default)]
    pub pool: Option<PoolId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub at: Moment,
    #[serde(flatten)]
    pub action: Action,
    /// Error kind this step is expected to fail with
    #[serde(default)]
    pub expect_error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioLoan {
    pub label: String,
    pub debtor: String,
    pub validator: String,
    pub terms: LoanTerms,
    #[serde(default = "default_risk_score")]
    pub risk_score: u8,
    #[serde(default)]
    pub salt: u64,
    pub expiration: Moment,
}

fn default_risk_score() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrancheTokens {
    pub tranche: Tranche,
    pub tokens: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub investor: String,
    pub currency: Money,
    pub tokens: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Fund {
        party: String,
        currency: String,
        amount: Money,
    },
    CreatePool {
        caller: String,
        owner: String,
        currency: String,
        #[serde(default)]
        min_first_loss: Ratio,
        debt_ceiling: Money,
        #[serde(default)]
        validators: Vec<String>,
        #[serde(default)]
        risk_scores: Vec<RiskScore>,
    },
    SetupRiskScores {
        caller: String,
        pool: PoolId,
        risk_scores: Vec<RiskScore>,
    },
    AddValidator {
        caller: String,
        pool: PoolId,
        validator: String,
    },
    SetRedeemDisabled {
        caller: String,
        pool: PoolId,
        disabled: bool,
    },
    ClosePool {
        caller: String,
        pool: PoolId,
    },
    StartSale {
        caller: String,
        pool: PoolId,
        tranche: Tranche,
        round: SaleRound,
    },
    Buy {
        investor: String,
        pool: PoolId,
        tranche: Tranche,
        amount: Money,
    },
    FinalizeSale {
        pool: PoolId,
        tranche: Tranche,
    },
    FillDebtOrder {
        pool: PoolId,
        terms_registry: String,
        #[serde(default)]
        asset_purpose: u64,
        #[serde(default)]
        max_payout: Money,
        loans: Vec<ScenarioLoan>,
    },
    Repay {
        payer: String,
        loan: String,
        amount: Money,
    },
    ConcludeLoan {
        caller: String,
        loan: String,
    },
    WriteOff {
        loan: String,
    },
    RedeemOrder {
        investor: String,
        pool: PoolId,
        tranche: Tranche,
        amount: Money,
        /// Defaults to one above the investor's last nonce
        #[serde(default)]
        nonce: Option<u64>,
    },
    PreDistribute {
        caller: String,
        pool: PoolId,
        amount: Money,
        tranches: Vec<TrancheTokens>,
    },
    DisburseAll {
        caller: String,
        pool: PoolId,
        tranche: Tranche,
        payouts: Vec<Payout>,
    },
    ReleaseDistribution {
        caller: String,
        pool: PoolId,
    },
    InvestInPool {
        caller: String,
        holder: PoolId,
        pool: PoolId,
        tranche: Tranche,
        amount: Money,
    },
    Snapshot {
        pool: PoolId,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Fund { .. } => "fund",
            Action::CreatePool { .. } => "create_pool",
            Action::SetupRiskScores { .. } => "setup_risk_scores",
            Action::AddValidator { .. } => "add_validator",
            Action::SetRedeemDisabled { .. } => "set_redeem_disabled",
            Action::ClosePool { .. } => "close_pool",
            Action::StartSale { .. } => "start_sale",
            Action::Buy { .. } => "buy",
            Action::FinalizeSale { .. } => "finalize_sale",
            Action::FillDebtOrder { .. } => "fill_debt_order",
            Action::Repay { .. } => "repay",
            Action::ConcludeLoan { .. } => "conclude_loan",
            Action::WriteOff { .. } => "write_off",
            Action::RedeemOrder { .. } => "redeem_order",
            Action::PreDistribute { .. } => "pre_distribute",
            Action::DisburseAll { .. } => "disburse_all",
            Action::ReleaseDistribution { .. } => "release_distribution",
            Action::InvestInPool { .. } => "invest_in_pool",
            Action::Snapshot { .. } => "snapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub at: Moment,
    pub at_utc: Option<DateTime<Utc>>,
    pub action: String,
    pub ok: bool,
    pub detail: Value,
    pub error: Option<StepError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub steps: Vec<StepOutcome>,
    pub failed_steps: usize,
    pub final_time: Moment,
    pub loans: BTreeMap<String, AssetId>,
    pub pools: Vec<PoolSummary>,
}

struct Runner {
    engine: SettlementEngine<RoleRegistry>,
    loans: BTreeMap<String, AssetId>,
}

impl Runner {
    fn loan(&self, label: &str) -> SettlementResult<AssetId> {
        self.loans
            .get(label)
            .copied()
            .ok_or_else(|| SettlementError::invalid("loan", format!("no loan labelled '{label}'")))
    }

    fn fill_debt_order(
        &mut self,
        pool: PoolId,
        terms_registry: &str,
        asset_purpose: u64,
        max_payout: Money,
        loans: &[ScenarioLoan],
        at: Moment,
    ) -> SettlementResult<Value> {
        let config = self.engine.config().clone();
        let p = self.engine.pool(pool)?;
        let registry = party(terms_registry);
        let mut addresses = vec![p.address, config.repayment_router, registry, p.currency];
        let mut values = vec![Decimal::from(asset_purpose), Decimal::from(at), max_payout];
        let mut packed_terms = Vec::with_capacity(loans.len());
        let mut mint_authorizations = Vec::with_capacity(loans.len());
        let mut batch_nonces: BTreeMap<Address, u64> = BTreeMap::new();

        for loan in loans {
            let debtor = party(&loan.debtor);
            let packed = loan.terms.encode()?;
            let id = asset_id(&config.repayment_router, &debtor, &registry, &packed, u128::from(loan.salt));

            let key = KeyPair::from_name(&loan.validator);
            let next = batch_nonces
                .entry(key.address())
                .or_insert_with(|| self.engine.next_mint_nonce(&key.address()));
            let nonce = *next;
            *next += 1;

            addresses.push(debtor);
            values.push(Decimal::from(loan.expiration));
            values.push(Decimal::from(loan.salt));
            packed_terms.push(packed);
            mint_authorizations.push(MintAuthorization::sign(&key, pool, &id, nonce, loan.risk_score, config.chain_id));
        }

        let ids = self.engine.fill_debt_order(
            DebtOrder {
                pool,
                addresses,
                values,
                packed_terms,
                mint_authorizations,
            },
            at,
        )?;
        for (loan, id) in loans.iter().zip(&ids) {
            self.loans.insert(loan.label.clone(), *id);
        }
        Ok(json!({ "assets": ids }))
    }

    fn execute(&mut self, action: &Action, at: Moment) -> SettlementResult<Value> {
        match action {
            Action::Fund { party: who, currency: code, amount } => {
                self.engine.fund(currency(code), party(who), *amount)?;
                Ok(Value::Null)
            }
            Action::CreatePool {
                caller,
                owner,
                currency: code,
                min_first_loss,
                debt_ceiling,
                validators,
                risk_scores,
            } => {
                let id = self.engine.create_pool(
                    party(caller),
                    PoolParams {
                        owner: party(owner),
                        currency: currency(code),
                        min_first_loss: *min_first_loss,
                        debt_ceiling: *debt_ceiling,
                        validators: validators.iter().map(|v| party(v)).collect(),
                        risk_scores: risk_scores.clone(),
                    },
                )?;
                Ok(json!({ "pool": id, "address": self.engine.pool(id)?.address }))
            }
            Action::SetupRiskScores { caller, pool, risk_scores } => {
                self.engine.setup_risk_scores(*pool, party(caller), risk_scores.clone())?;
                Ok(Value::Null)
            }
            Action::AddValidator { caller, pool, validator } => {
                self.engine.add_validator(*pool, party(caller), party(validator))?;
                Ok(Value::Null)
            }
            Action::SetRedeemDisabled { caller, pool, disabled } => {
                self.engine.set_redeem_disabled(*pool, party(caller), *disabled)?;
                Ok(Value::Null)
            }
            Action::ClosePool { caller, pool } => {
                self.engine.close_pool(*pool, party(caller))?;
                Ok(Value::Null)
            }
            Action::StartSale { caller, pool, tranche, round } => {
                self.engine
                    .start_new_round_sale(SaleId::new(*pool, *tranche), party(caller), round.clone())?;
                Ok(Value::Null)
            }
            Action::Buy { investor, pool, tranche, amount } => {
                let bought = self
                    .engine
                    .buy_tokens(SaleId::new(*pool, *tranche), party(investor), *amount, at)?;
                Ok(serde_json::to_value(bought)?)
            }
            Action::FinalizeSale { pool, tranche } => {
                let sale = self.engine.finalize_sale(SaleId::new(*pool, *tranche), at)?;
                Ok(serde_json::to_value(sale)?)
            }
            Action::FillDebtOrder {
                pool,
                terms_registry,
                asset_purpose,
                max_payout,
                loans,
            } => self.fill_debt_order(*pool, terms_registry, *asset_purpose, *max_payout, loans, at),
            Action::Repay { payer, loan, amount } => {
                let id = self.loan(loan)?;
                let receipts = self.engine.repay(party(payer), &[id], &[*amount], at)?;
                Ok(serde_json::to_value(receipts)?)
            }
            Action::ConcludeLoan { caller, loan } => {
                let id = self.loan(loan)?;
                let l = self.engine.loan(&id)?;
                let (creditor, registry) = (l.creditor, l.terms_registry);
                self.engine.conclude_loans(party(caller), &[creditor], &[id], registry)?;
                Ok(Value::Null)
            }
            Action::WriteOff { loan } => {
                let id = self.loan(loan)?;
                Ok(serde_json::to_value(self.engine.write_off(&id, at)?)?)
            }
            Action::RedeemOrder {
                investor,
                pool,
                tranche,
                amount,
                nonce,
            } => {
                let key = KeyPair::from_name(investor);
                let nonce = nonce.unwrap_or_else(|| {
                    self.engine
                        .last_redeem_nonce(&key.address())
                        .map(|n| n + 1)
                        .unwrap_or(0)
                });
                let order = RedeemOrder {
                    pool: *pool,
                    tranche: *tranche,
                    investor: key.address(),
                    amount: *amount,
                    nonce,
                    chain_id: self.engine.config().chain_id,
                };
                let record = self.engine.redeem_order(SignedRedeemOrder::sign(&key, order)?, at)?;
                Ok(serde_json::to_value(record)?)
            }
            Action::PreDistribute {
                caller,
                pool,
                amount,
                tranches,
            } => {
                let kinds: Vec<Tranche> = tranches.iter().map(|t| t.tranche).collect();
                let tokens: Vec<Money> = tranches.iter().map(|t| t.tokens).collect();
                let cycle = self
                    .engine
                    .pre_distribute(*pool, party(caller), *amount, &kinds, &tokens, at)?;
                Ok(serde_json::to_value(cycle)?)
            }
            Action::DisburseAll {
                caller,
                pool,
                tranche,
                payouts,
            } => {
                let investors: Vec<Address> = payouts.iter().map(|p| party(&p.investor)).collect();
                let paid: Vec<Money> = payouts.iter().map(|p| p.currency).collect();
                let tokens: Vec<Money> = payouts.iter().map(|p| p.tokens).collect();
                let out = self.engine.disburse_all(
                    *pool,
                    party(caller),
                    *tranche,
                    &investors,
                    &paid,
                    &tokens,
                    at,
                )?;
                Ok(serde_json::to_value(out)?)
            }
            Action::ReleaseDistribution { caller, pool } => {
                let released = self.engine.release_distribution(*pool, party(caller))?;
                Ok(json!({ "released": released }))
            }
            Action::InvestInPool {
                caller,
                holder,
                pool,
                tranche,
                amount,
            } => {
                let bought = self.engine.invest_in_pool(
                    *holder,
                    SaleId::new(*pool, *tranche),
                    *amount,
                    party(caller),
                    at,
                )?;
                Ok(serde_json::to_value(bought)?)
            }
            Action::Snapshot { pool } => Ok(serde_json::to_value(self.engine.pool_summary(*pool, at)?)?),
        }
    }
}

/// Replay a scenario and report every step plus the final pool states.
///
/// A failing step is recorded and the run continues; only an invalid
/// configuration or out-of-order timestamps abort the whole run.
pub fn run_scenario(scenario: &Scenario) -> SettlementResult<ComputationOutput<ScenarioReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if let Some(idx) = scenario
        .steps
        .windows(2)
        .position(|w| w[1].at < w[0].at)
    {
        return Err(SettlementError::invalid(
            format!("steps[{}].at", idx + 1),
            "timestamps must not decrease",
        ));
    }

    let mut roles = RoleRegistry::new();
    for grant in &scenario.grants {
        roles.grant(party(&grant.party), grant.role, grant.pool);
    }
    let mut runner = Runner {
        engine: SettlementEngine::new(scenario.config.clone(), roles)?,
        loans: BTreeMap::new(),
    };

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let name = step.action.name();
        let outcome = runner.execute(&step.action, step.at);
        let (ok, detail, error) = match outcome {
            Ok(detail) => {
                debug!(index, action = name, "step ok");
                (true, detail, None)
            }
            Err(e) => {
                debug!(index, action = name, error = %e, "step failed");
                (
                    false,
                    Value::Null,
                    Some(StepError {
                        kind: e.kind(),
                        message: e.to_string(),
                    }),
                )
            }
        };

        let actual = error.as_ref().map(|e| e.kind);
        if actual != step.expect_error {
            let msg = format!(
                "step {index} ({name}): expected {:?}, got {:?}",
                step.expect_error, actual
            );
            warn!("{msg}");
            warnings.push(msg);
        }

        steps.push(StepOutcome {
            index,
            at: step.at,
            at_utc: i64::try_from(step.at)
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            action: name.to_string(),
            ok,
            detail,
            error,
        });
    }

    let final_time = scenario.steps.last().map(|s| s.at).unwrap_or(0);
    let mut pools = Vec::new();
    for id in runner.engine.pool_ids() {
        pools.push(runner.engine.pool_summary(id, final_time)?);
    }

    let report = ScenarioReport {
        failed_steps: steps.iter().filter(|s| !s.ok).count(),
        steps,
        final_time,
        loans: runner.loans,
        pools,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Deterministic replay of settlement operations with lazy time evaluation",
        &json!({
            "chain_id": scenario.config.chain_id,
            "seconds_per_year": scenario.config.seconds_per_year,
            "steps": scenario.steps.len(),
        }),
        warnings,
        elapsed,
        report,
    ))
}
