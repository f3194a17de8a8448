#![cfg(feature = "scenario")]

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use settlement_core::error::ErrorKind;
use settlement_core::fixed::InterestRate;
use settlement_core::scenario::{run_scenario, Scenario};

const T0: u64 = 1_700_000_000;
const DAY: u64 = 86_400;

fn risk_bucket() -> Value {
    json!({
        "days_past_due": 0,
        "advance_rate": 900000,
        "penalty_rate": 0,
        "interest_rate": 80000,
        "probability_of_default": 100000,
        "loss_given_default": 500000,
        "discount_rate": 40000,
        "grace_period": 2 * DAY,
        "collection_period": 30 * DAY,
        "write_off_after_grace_period": 600000,
        "write_off_after_collection_period": 0
    })
}

fn lifecycle() -> Scenario {
    serde_json::from_value(json!({
        "grants": [
            { "party": "creator", "role": "pool_creator" },
            { "party": "alice", "role": "investor" },
            { "party": "bob", "role": "investor" },
            { "party": "backend", "role": "backend" }
        ],
        "steps": [
            { "at": T0, "action": "fund", "party": "alice", "currency": "USD", "amount": "1000" },
            { "at": T0, "action": "fund", "party": "bob", "currency": "USD", "amount": "3000" },
            {
                "at": T0, "action": "create_pool", "caller": "creator", "owner": "owner",
                "currency": "USD", "min_first_loss": 200000, "debt_ceiling": "1000000",
                "validators": ["validator"], "risk_scores": [risk_bucket()]
            },
            {
                "at": T0, "action": "start_sale", "caller": "owner", "pool": 1, "tranche": "junior",
                "round": { "opening_time": T0, "closing_time": T0 + DAY, "total_cap": "10000" }
            },
            {
                "at": T0, "action": "start_sale", "caller": "owner", "pool": 1, "tranche": "senior",
                "round": {
                    "opening_time": T0, "closing_time": T0 + DAY, "total_cap": "10000",
                    "interest": {
                        "initial_interest": 10000, "final_interest": 40000,
                        "time_interval": DAY, "amount_per_interval": 5000
                    }
                }
            },
            { "at": T0 + 10, "action": "buy", "investor": "alice", "pool": 1, "tranche": "junior", "amount": "1000" },
            { "at": T0 + 20, "action": "buy", "investor": "bob", "pool": 1, "tranche": "senior", "amount": "3000" },
            { "at": T0 + DAY, "action": "finalize_sale", "pool": 1, "tranche": "junior" },
            { "at": T0 + DAY, "action": "finalize_sale", "pool": 1, "tranche": "senior" },
            {
                "at": T0 + DAY, "action": "fill_debt_order", "pool": 1, "terms_registry": "terms",
                "loans": [{
                    "label": "invoice-1", "debtor": "acme", "validator": "validator", "salt": 7,
                    "expiration": T0 + 30 * DAY,
                    "terms": {
                        "principal": "2000", "interest_rate": 50000, "amortization_unit": "days",
                        "term_length": 10, "grace_period_days": 2
                    }
                }]
            },
            {
                "at": T0 + 2 * DAY, "action": "buy", "investor": "alice", "pool": 1,
                "tranche": "junior", "amount": "10", "expect_error": "state"
            },
            { "at": T0 + 11 * DAY, "action": "fund", "party": "acme", "currency": "USD", "amount": "500" },
            { "at": T0 + 11 * DAY, "action": "repay", "payer": "acme", "loan": "invoice-1", "amount": "2100" },
            { "at": T0 + 12 * DAY, "action": "redeem_order", "investor": "bob", "pool": 1, "tranche": "senior", "amount": "1000" },
            {
                "at": T0 + 12 * DAY, "action": "pre_distribute", "caller": "backend", "pool": 1,
                "amount": "1000", "tranches": [{ "tranche": "senior", "tokens": "1000" }]
            },
            {
                "at": T0 + 12 * DAY, "action": "disburse_all", "caller": "backend", "pool": 1,
                "tranche": "senior", "payouts": [{ "investor": "bob", "currency": "1000", "tokens": "1000" }]
            },
            { "at": T0 + 12 * DAY, "action": "snapshot", "pool": 1 }
        ]
    }))
    .unwrap()
}

#[test]
fn test_lifecycle_scenario_replays_cleanly() {
    let out = run_scenario(&lifecycle()).unwrap();
    let report = &out.result;

    assert!(out.warnings.is_empty(), "unexpected warnings: {:?}", out.warnings);
    assert_eq!(report.steps.len(), 17);
    assert_eq!(report.failed_steps, 1);
    assert_eq!(report.steps[10].error.as_ref().map(|e| e.kind), Some(ErrorKind::State));
    assert_eq!(report.final_time, T0 + 12 * DAY);
    assert!(report.loans.contains_key("invoice-1"));

    let repay = &report.steps[12].detail[0];
    assert_eq!(repay["concluded"], json!(true));

    let pool = &report.pools[0];
    assert_eq!(pool.live_loans, 0);
    assert_eq!(pool.loans_nav, dec!(0));
    assert_eq!(pool.senior_interest, InterestRate(15_000));
    assert_eq!(pool.senior_supply, dec!(2_000));
    assert_eq!(pool.junior_supply, dec!(1_000));
    assert_eq!(pool.earmarked, dec!(0));
    // 4000 raised, 1800 advanced, 2002 repaid, 1000 redeemed
    assert_eq!(pool.reserve, dec!(3_202));
    assert!(pool.senior_price > dec!(1));
}

#[test]
fn test_step_timestamps_are_reported_in_utc() {
    let out = run_scenario(&lifecycle()).unwrap();
    let first = &out.result.steps[0];
    assert_eq!(first.action, "fund");
    assert_eq!(first.at_utc.map(|t| t.timestamp()), Some(T0 as i64));
}

#[test]
fn test_scenario_reports_unexpected_success() {
    let mut scenario = lifecycle();
    scenario.steps.truncate(10);
    scenario.steps[9].expect_error = Some(ErrorKind::Arithmetic);
    let out = run_scenario(&scenario).unwrap();
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].contains("fill_debt_order"));
}
