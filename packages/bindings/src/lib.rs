use napi::Result as NapiResult;
use napi_derive::napi;
use rust_decimal::Decimal;
use serde::Deserialize;

use settlement_core::fixed::{compound, discount, InterestRate, SECONDS_PER_YEAR};
use settlement_core::sale::InterestSchedule;
use settlement_core::scenario::{run_scenario as replay, Scenario};
use settlement_core::terms::{LoanTerms, PackedTerms};
use settlement_core::Moment;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

// ---------------------------------------------------------------------------
// Scenario replay
// ---------------------------------------------------------------------------

#[napi]
pub fn run_scenario(input_json: String) -> NapiResult<String> {
    let scenario: Scenario = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = replay(&scenario).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Loan terms
// ---------------------------------------------------------------------------

#[napi]
pub fn encode_terms(input_json: String) -> NapiResult<String> {
    let terms: LoanTerms = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let packed = terms.encode().map_err(to_napi_error)?;
    serde_json::to_string(&packed).map_err(to_napi_error)
}

#[napi]
pub fn decode_terms(packed_hex: String) -> NapiResult<String> {
    let packed: PackedTerms = packed_hex.parse().map_err(to_napi_error)?;
    let terms = packed.decode().map_err(to_napi_error)?;
    serde_json::to_string(&terms).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SeniorInterestInput {
    schedule: InterestSchedule,
    opening: Moment,
    at: Moment,
}

#[napi]
pub fn senior_interest(input_json: String) -> NapiResult<String> {
    let input: SeniorInterestInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let rate = input.schedule.interest_at(input.opening, input.at);
    serde_json::to_string(&rate).map_err(to_napi_error)
}

#[derive(Deserialize)]
struct AccrueInput {
    amount: Decimal,
    rate: InterestRate,
    seconds: Moment,
    #[serde(default = "default_seconds_per_year")]
    seconds_per_year: u64,
    #[serde(default)]
    discount: bool,
}

fn default_seconds_per_year() -> u64 {
    SECONDS_PER_YEAR
}

#[napi]
pub fn accrue_debt(input_json: String) -> NapiResult<String> {
    let input: AccrueInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let value = if input.discount {
        discount(input.amount, input.rate, input.seconds, input.seconds_per_year)
    } else {
        compound(input.amount, input.rate, input.seconds, input.seconds_per_year)
    }
    .map_err(to_napi_error)?;
    serde_json::to_string(&value).map_err(to_napi_error)
}
