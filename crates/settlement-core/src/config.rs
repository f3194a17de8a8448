use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::fixed::SECONDS_PER_YEAR;
use crate::types::Address;
use crate::SettlementResult;

/// Engine-wide settings shared by every pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chain id bound into every signed authorization and redeem order.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Day-count basis for per-second compounding.
    #[serde(default = "default_seconds_per_year")]
    pub seconds_per_year: u64,
    /// Address of the repayment router, part of every asset id.
    #[serde(default = "default_repayment_router")]
    pub repayment_router: Address,
}

fn default_chain_id() -> u64 {
    1
}

fn default_seconds_per_year() -> u64 {
    SECONDS_PER_YEAR
}

fn default_repayment_router() -> Address {
    Address::labeled("repayment-router")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            seconds_per_year: default_seconds_per_year(),
            repayment_router: default_repayment_router(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> SettlementResult<()> {
        if self.seconds_per_year == 0 {
            return Err(SettlementError::invalid(
                "seconds_per_year",
                "must be greater than zero",
            ));
        }
        if self.repayment_router.is_zero() {
            return Err(SettlementError::ZeroAddress {
                field: "repayment_router".into(),
            });
        }
        Ok(())
    }
}
