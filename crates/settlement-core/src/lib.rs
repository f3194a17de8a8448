pub mod auth;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod fixed;
pub mod kernel;
pub mod ledger;
pub mod loan;
pub mod nav;
pub mod pool;
pub mod repayment;
pub mod risk;
pub mod sale;
pub mod terms;
pub mod types;

#[cfg(feature = "scenario")]
pub mod scenario;

pub use engine::SettlementEngine;
pub use error::{ErrorKind, SettlementError};
pub use types::*;

/// Standard result type for all settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;
