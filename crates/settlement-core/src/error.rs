use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, AssetId, Moment, PoolId};

/// Coarse failure category, stable across releases so an off-chain
/// orchestrator can decide between resubmitting, alerting and abandoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    State,
    Arithmetic,
    Serialization,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    // -- Validation ---------------------------------------------------------
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Zero address supplied for {field}")]
    ZeroAddress { field: String },

    #[error("Malformed order: {field} has {actual} entries, expected {expected}")]
    MalformedOrder {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed terms: {0}")]
    MalformedTerms(String),

    #[error("Risk scores must be sorted by ascending days past due (violated at index {index})")]
    UnsortedRiskScores { index: usize },

    #[error("Risk score {score} is not configured for this pool")]
    InvalidRiskScore { score: u8 },

    #[error("Order expired at {expiration} (now {now})")]
    OrderExpired { expiration: Moment, now: Moment },

    #[error("Unknown pool {0}")]
    UnknownPool(PoolId),

    #[error("Unknown asset {0}")]
    UnknownAsset(AssetId),

    #[error("No sale configured for {0}")]
    UnknownSale(String),

    // -- Authorization ------------------------------------------------------
    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: Address, action: String },

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Signer {signer} is not a registered validator")]
    InvalidValidator { signer: Address },

    #[error("Nonce mismatch for {signer}: expected {expected}, got {actual}")]
    NonceMismatch {
        signer: Address,
        expected: u64,
        actual: u64,
    },

    #[error("Nonce {nonce} already used by {signer}")]
    NonceReplay { signer: Address, nonce: u64 },

    #[error("Order signed for chain {actual}, engine runs chain {expected}")]
    WrongChain { expected: u64, actual: u64 },

    #[error("Redemption and purchases are disabled for pool {0}")]
    RedeemDisabled(PoolId),

    // -- State --------------------------------------------------------------
    #[error("Asset {0} already exists")]
    DuplicateAsset(AssetId),

    #[error("Asset {0} is already concluded")]
    AlreadyConcluded(AssetId),

    #[error("Cannot write off {asset}: maturity {maturity} is in the future (now {now})")]
    MaturityInFuture {
        asset: AssetId,
        maturity: Moment,
        now: Moment,
    },

    #[error("Cannot write off {asset}: grace period runs until {grace_end}")]
    GracePeriodActive { asset: AssetId, grace_end: Moment },

    #[error("Sale is not open")]
    SaleNotOpen,

    #[error("Sale has not reached its closing time or cap yet")]
    SaleStillOpen,

    #[error("Sale is already finalized")]
    AlreadyFinalized,

    #[error("Pool {0} is closed")]
    PoolClosed(PoolId),

    #[error("Reentrant call into pool {0}")]
    Reentrancy(PoolId),

    #[error("Senior redemptions of the current cycle must be disbursed before junior")]
    SeniorFirst,

    #[error("Pool {0} has no open distribution cycle")]
    NoActiveDistribution(PoolId),

    #[error("Pool {0} still has reserved funds from a previous distribution cycle")]
    DistributionPending(PoolId),

    #[error("Investing pool {holder} into pool {target} would create an investment cycle")]
    InvestmentCycle { holder: PoolId, target: PoolId },

    // -- Arithmetic / business rules ----------------------------------------
    #[error("Debt ceiling exceeded: limit {ceiling}, requested {requested}")]
    CeilingExceeded { ceiling: Decimal, requested: Decimal },

    #[error("Minimum first loss violated: senior {senior}, junior {junior}")]
    MinFirstLossViolated { senior: Decimal, junior: Decimal },

    #[error("Sale cap exceeded: cap {cap}, requested total {requested}")]
    CapExceeded { cap: Decimal, requested: Decimal },

    #[error("Insufficient reserve: available {available}, requested {requested}")]
    InsufficientReserve { available: Decimal, requested: Decimal },

    #[error("Insufficient balance for {holder}: available {available}, requested {requested}")]
    InsufficientBalance {
        holder: Address,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Payout {requested} exceeds entitlement {entitled}")]
    ExceedsEntitlement { entitled: Decimal, requested: Decimal },

    #[error("Arithmetic overflow in {0}")]
    Overflow(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    // -- Serialization ------------------------------------------------------
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        use SettlementError::*;
        match self {
            InvalidInput { .. }
            | ZeroAddress { .. }
            | MalformedOrder { .. }
            | MalformedTerms(_)
            | UnsortedRiskScores { .. }
            | InvalidRiskScore { .. }
            | OrderExpired { .. }
            | UnknownPool(_)
            | UnknownAsset(_)
            | UnknownSale(_) => ErrorKind::Validation,

            Unauthorized { .. }
            | InvalidSignature
            | InvalidValidator { .. }
            | NonceMismatch { .. }
            | NonceReplay { .. }
            | WrongChain { .. }
            | RedeemDisabled(_) => ErrorKind::Authorization,

            DuplicateAsset(_)
            | AlreadyConcluded(_)
            | MaturityInFuture { .. }
            | GracePeriodActive { .. }
            | SaleNotOpen
            | SaleStillOpen
            | AlreadyFinalized
            | PoolClosed(_)
            | Reentrancy(_)
            | SeniorFirst
            | NoActiveDistribution(_)
            | DistributionPending(_)
            | InvestmentCycle { .. } => ErrorKind::State,

            CeilingExceeded { .. }
            | MinFirstLossViolated { .. }
            | CapExceeded { .. }
            | InsufficientReserve { .. }
            | InsufficientBalance { .. }
            | ExceedsEntitlement { .. }
            | Overflow(_)
            | DivisionByZero { .. } => ErrorKind::Arithmetic,

            SerializationError(_) => ErrorKind::Serialization,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SettlementError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unauthorized(caller: Address, action: impl Into<String>) -> Self {
        SettlementError::Unauthorized {
            caller,
            action: action.into(),
        }
    }
}

impl From<serde_json::Error> for SettlementError {
    fn from(e: serde_json::Error) -> Self {
        SettlementError::SerializationError(e.to_string())
    }
}
