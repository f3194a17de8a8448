//! Debt-order tokenization.
//!
//! A debt order finances a batch of loans out of one pool. Each loan needs a
//! mint authorization signed by one of the pool's validators; the whole batch
//! is tokenized or none of it is.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::auth::{message_digest, verify, AccessControl, KeyPair, PublicKey, Role, SignatureBytes};
use crate::engine::SettlementEngine;
use crate::error::SettlementError;
use crate::fixed::{add, ensure_amount};
use crate::loan::{AssetPurpose, Loan, LoanStatus};
use crate::terms::PackedTerms;
use crate::types::{Address, AssetId, Moment, Money, PoolId, TokenId};
use crate::SettlementResult;

const FIXED_ADDRESSES: usize = 4;
const FIXED_VALUES: usize = 3;

/// Validator approval to tokenize one loan under a given risk score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintAuthorization {
    pub validator: PublicKey,
    pub nonce: u64,
    pub risk_score: u8,
    pub signature: SignatureBytes,
}

impl MintAuthorization {
    pub fn digest(pool: PoolId, asset: &AssetId, nonce: u64, risk_score: u8, chain_id: u64) -> [u8; 32] {
        message_digest(
            b"MINT_AUTHORIZATION_V1",
            &[
                &pool.0.to_be_bytes(),
                asset.as_bytes(),
                &nonce.to_be_bytes(),
                &[risk_score],
                &chain_id.to_be_bytes(),
            ],
        )
    }

    pub fn sign(
        key: &KeyPair,
        pool: PoolId,
        asset: &AssetId,
        nonce: u64,
        risk_score: u8,
        chain_id: u64,
    ) -> Self {
        let digest = Self::digest(pool, asset, nonce, risk_score, chain_id);
        Self {
            validator: key.public_key(),
            nonce,
            risk_score,
            signature: key.sign(&digest),
        }
    }
}

/// `addresses = [creditor, repayment_router, terms_registry, currency, debtors..]`,
/// `values = [asset_purpose, order_timestamp, max_payout, (expiration, salt)..]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtOrder {
    pub pool: PoolId,
    pub addresses: Vec<Address>,
    pub values: Vec<Money>,
    pub packed_terms: Vec<PackedTerms>,
    pub mint_authorizations: Vec<MintAuthorization>,
}

/// Deterministic id over the parties, the terms and a salt.
pub fn asset_id(
    router: &Address,
    debtor: &Address,
    terms_registry: &Address,
    packed_terms: &PackedTerms,
    salt: u128,
) -> AssetId {
    let mut hasher = Sha256::new();
    hasher.update(router.as_bytes());
    hasher.update(debtor.as_bytes());
    hasher.update(terms_registry.as_bytes());
    hasher.update(packed_terms.as_bytes());
    hasher.update(salt.to_be_bytes());
    AssetId(hasher.finalize().into())
}

fn value_as_u64(field: &str, value: Money) -> SettlementResult<u64> {
    ensure_amount(field, value)?;
    value
        .to_u64()
        .ok_or_else(|| SettlementError::invalid(field, "does not fit in 64 bits"))
}

fn value_as_u128(field: &str, value: Money) -> SettlementResult<u128> {
    ensure_amount(field, value)?;
    value
        .to_u128()
        .ok_or_else(|| SettlementError::invalid(field, "does not fit in 128 bits"))
}

fn ensure_len(field: &str, expected: usize, actual: usize) -> SettlementResult<()> {
    if expected != actual {
        return Err(SettlementError::MalformedOrder {
            field: field.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl<A: AccessControl> SettlementEngine<A> {
    /// Tokenize every loan of `order` and pay out the advances.
    pub fn fill_debt_order(&mut self, order: DebtOrder, now: Moment) -> SettlementResult<Vec<AssetId>> {
        let pool_id = order.pool;
        self.transact(&[pool_id], |state, config, access| {
            let loans = order.packed_terms.len();
            if loans == 0 {
                return Err(SettlementError::MalformedOrder {
                    field: "packed_terms".into(),
                    expected: 1,
                    actual: 0,
                });
            }
            ensure_len("addresses", FIXED_ADDRESSES + loans, order.addresses.len())?;
            ensure_len("values", FIXED_VALUES + 2 * loans, order.values.len())?;
            ensure_len("mint_authorizations", loans, order.mint_authorizations.len())?;

            const ROLES: [&str; FIXED_ADDRESSES] = ["creditor", "repayment_router", "terms_registry", "currency"];
            for (idx, address) in order.addresses.iter().enumerate() {
                if address.is_zero() {
                    let field = ROLES
                        .get(idx)
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| format!("debtor[{}]", idx - FIXED_ADDRESSES));
                    return Err(SettlementError::ZeroAddress { field });
                }
            }
            let creditor = order.addresses[0];
            let router = order.addresses[1];
            let terms_registry = order.addresses[2];
            let currency = order.addresses[3];

            let pool = state.pool(pool_id)?.clone();
            pool.ensure_open_for_business()?;
            if creditor != pool.address {
                return Err(SettlementError::invalid("creditor", "must be the pool account"));
            }
            if router != config.repayment_router {
                return Err(SettlementError::invalid(
                    "repayment_router",
                    "does not match the configured router",
                ));
            }
            if currency != pool.currency {
                return Err(SettlementError::invalid("currency", "does not match the pool currency"));
            }

            let purpose_code = value_as_u64("asset_purpose", order.values[0])?;
            let asset_purpose = AssetPurpose::from_code(purpose_code)
                .ok_or_else(|| SettlementError::invalid("asset_purpose", "expected 0 (loan) or 1 (invoice)"))?;
            let order_timestamp = value_as_u64("order_timestamp", order.values[1])?;
            if order_timestamp > now {
                return Err(SettlementError::invalid("order_timestamp", "lies in the future"));
            }
            let max_payout = order.values[2];
            ensure_amount("max_payout", max_payout)?;

            let mut batch_ids = BTreeSet::new();
            let mut new_loans = Vec::with_capacity(loans);
            let mut total_principal = Decimal::ZERO;
            let mut total_payout = Decimal::ZERO;

            for i in 0..loans {
                let debtor = order.addresses[FIXED_ADDRESSES + i];
                let packed = order.packed_terms[i];
                let terms = packed.decode()?;
                let expiration = value_as_u64("expiration", order.values[FIXED_VALUES + 2 * i])?;
                let salt = value_as_u128("salt", order.values[FIXED_VALUES + 2 * i + 1])?;
                if expiration <= now {
                    return Err(SettlementError::OrderExpired { expiration, now });
                }

                let id = asset_id(&router, &debtor, &terms_registry, &packed, salt);
                if state.loans.contains_key(&id) || !batch_ids.insert(id) {
                    return Err(SettlementError::DuplicateAsset(id));
                }

                let auth = &order.mint_authorizations[i];
                let digest = MintAuthorization::digest(pool_id, &id, auth.nonce, auth.risk_score, config.chain_id);
                if !verify(&auth.validator, &digest, &auth.signature) {
                    return Err(SettlementError::InvalidSignature);
                }
                let signer = auth.validator.to_address();
                if !pool.validators.contains(&signer)
                    && !access.has_role(&signer, Role::WhitelistedValidator, Some(pool_id))
                {
                    return Err(SettlementError::InvalidValidator { signer });
                }
                state.mint_nonces.consume_exact(signer, auth.nonce)?;

                let bucket = pool.risk_scores.get(auth.risk_score)?;
                let payout = bucket.advance_rate.apply(terms.principal)?;
                total_principal = add(total_principal, terms.principal, "order principal")?;
                total_payout = add(total_payout, payout, "order payout")?;

                debug!(asset = %id, %debtor, principal = %terms.principal, %payout, risk = auth.risk_score, "loan validated");
                new_loans.push((
                    Loan {
                        id,
                        pool: pool_id,
                        creditor,
                        debtor,
                        terms_registry,
                        maturity: terms.maturity(now),
                        terms,
                        packed_terms: packed,
                        risk_score: auth.risk_score,
                        asset_purpose,
                        expiration,
                        issued_at: now,
                        repaid_principal: Decimal::ZERO,
                        repaid_interest: Decimal::ZERO,
                        status: LoanStatus::Issued,
                    },
                    payout,
                ));
            }

            let nav = state.loans_nav(pool_id, now, config.seconds_per_year)?;
            let requested = add(nav, total_principal, "debt ceiling")?;
            if requested > pool.debt_ceiling {
                return Err(SettlementError::CeilingExceeded {
                    ceiling: pool.debt_ceiling,
                    requested,
                });
            }
            if !max_payout.is_zero() && total_payout > max_payout {
                return Err(SettlementError::CeilingExceeded {
                    ceiling: max_payout,
                    requested: total_payout,
                });
            }
            let available = state.available_reserve(&pool);
            if total_payout > available {
                return Err(SettlementError::InsufficientReserve {
                    available,
                    requested: total_payout,
                });
            }

            let mut ids = Vec::with_capacity(loans);
            for (loan, payout) in new_loans {
                if !payout.is_zero() {
                    state
                        .ledger_mut(TokenId::Currency(currency))
                        .transfer(pool.address, loan.debtor, payout)?;
                }
                ids.push(loan.id);
                state.pool_mut(pool_id)?.assets.insert(loan.id);
                state.loans.insert(loan.id, loan);
            }

            info!(pool = %pool_id, loans = ids.len(), principal = %total_principal, payout = %total_payout, "debt order filled");
            Ok(ids)
        })
    }
}
