mod common;

use common::*;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement_core::fixed::{compound, InterestRate, Ratio, SECONDS_PER_YEAR};
use settlement_core::loan::{DebtBand, LoanStatus};
use settlement_core::SettlementError;

// ===========================================================================
// Debt accrual and write-off lifecycle
// ===========================================================================

#[test]
fn test_loan_lifecycle_from_upload_to_write_off() {
    // 10e18 principal, 5% p.a., 10 day term, 2 day grace
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000_000_000_000_000_000));
    let principal = dec!(10_000_000_000_000_000_000);
    let id = f.upload_loan(terms(principal, 50_000, 10, 2), 1, T0);

    assert_eq!(f.engine.debt(&id, T0).unwrap(), principal);

    let maturity = T0 + 10 * DAY;
    let at_maturity = f.engine.debt(&id, maturity).unwrap();
    assert_eq!(
        at_maturity,
        compound(principal, InterestRate(50_000), 10 * DAY, SECONDS_PER_YEAR).unwrap()
    );
    // 0.05 * 10 / 365 = 0.00137, compounded per second
    assert!(at_maturity > principal * dec!(1.00136));
    assert!(at_maturity < principal * dec!(1.00138));

    assert!(matches!(
        f.engine.write_off(&id, maturity - 1),
        Err(SettlementError::MaturityInFuture { .. })
    ));
    let grace_end = maturity + 2 * DAY;
    assert_eq!(
        f.engine.write_off(&id, maturity + DAY),
        Err(SettlementError::GracePeriodActive { asset: id, grace_end })
    );

    let before_grace_end = f.engine.debt(&id, grace_end - 1).unwrap();
    let outcome = f.engine.write_off(&id, grace_end + DAY).unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.previous, LoanStatus::Issued);
    assert_eq!(outcome.band, DebtBand::WrittenOffPartial);

    // accrual stops at the end of grace; 60% of that balance remains
    let frozen = compound(at_maturity, InterestRate(50_000), 2 * DAY, SECONDS_PER_YEAR).unwrap();
    assert_eq!(outcome.debt, Ratio(600_000).apply(frozen).unwrap());
    assert!(outcome.debt < before_grace_end);
    assert_eq!(f.engine.loan(&id).unwrap().status, LoanStatus::WrittenOffPartial);

    let again = f.engine.write_off(&id, grace_end + 2 * DAY).unwrap();
    assert!(!again.changed);
    assert_eq!(again.debt, outcome.debt);
}

#[test]
fn test_debt_never_rises_after_grace() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000_000));
    let id = f.upload_loan(terms(dec!(1_000_000), 120_000, 10, 2), 1, T0);
    let grace_end = T0 + 12 * DAY;

    let mut last = f.engine.debt(&id, grace_end).unwrap();
    for day in 1..40 {
        let debt = f.engine.debt(&id, grace_end + day * DAY).unwrap();
        assert!(debt <= last, "debt rose on day {day}: {debt} > {last}");
        last = debt;
    }
    // collection period over: nothing recognised
    assert_eq!(last, Decimal::ZERO);

    let outcome = f.engine.write_off(&id, grace_end + 31 * DAY).unwrap();
    assert_eq!(outcome.band, DebtBand::WrittenOffFull);
    assert_eq!(f.engine.loan(&id).unwrap().status, LoanStatus::WrittenOffFull);
}

#[test]
fn test_write_off_of_concluded_loan_rejected() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    let id = f.upload_loan(terms(dec!(1_000), 50_000, 10, 2), 1, T0);
    let creditor = f.pool_address();
    f.engine
        .conclude_loans(f.router, &[creditor], &[id], f.registry)
        .unwrap();
    assert_eq!(
        f.engine.write_off(&id, T0 + 30 * DAY),
        Err(SettlementError::AlreadyConcluded(id))
    );
}

#[test]
fn test_bucket_rate_applies_when_terms_carry_none() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000_000));
    let id = f.upload_loan(terms(dec!(1_000_000), 0, 30, 0), 1, T0);
    assert_eq!(
        f.engine.debt(&id, T0 + 30 * DAY).unwrap(),
        compound(dec!(1_000_000), InterestRate(80_000), 30 * DAY, SECONDS_PER_YEAR).unwrap()
    );
}

// ===========================================================================
// Pool-level valuation
// ===========================================================================

#[test]
fn test_current_nav_sums_live_loans() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000_000));
    let a = f.upload_loan(terms(dec!(1_000), 50_000, 10, 2), 1, T0);
    let b = f.upload_loan(terms(dec!(2_000), 50_000, 20, 2), 2, T0);
    assert_eq!(f.engine.current_nav(f.pool, T0).unwrap(), dec!(3_000));

    let at = T0 + 5 * DAY;
    let expected = f.engine.debt(&a, at).unwrap() + f.engine.debt(&b, at).unwrap();
    assert_eq!(f.engine.current_nav(f.pool, at).unwrap(), expected);

    let creditor = f.pool_address();
    f.engine
        .conclude_loans(f.router, &[creditor], &[a], f.registry)
        .unwrap();
    assert_eq!(
        f.engine.current_nav(f.pool, at).unwrap(),
        f.engine.debt(&b, at).unwrap()
    );
}

#[test]
fn test_expected_value_discounts_for_risk() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000_000));
    f.upload_loan(terms(dec!(1_000_000), 50_000, 10, 2), 1, T0);
    let nav = f.engine.current_nav(f.pool, T0).unwrap();
    let expected = f.engine.expected_assets_value(f.pool, T0).unwrap();
    // 5% expected loss outweighs ten days of interest
    assert!(expected < nav);
    assert!(expected > dec!(940_000));

    // past maturity both measures coincide
    let late = T0 + 11 * DAY;
    assert_eq!(
        f.engine.expected_assets_value(f.pool, late).unwrap(),
        f.engine.current_nav(f.pool, late).unwrap()
    );
}

#[test]
fn test_aging_report_groups_by_days_past_due() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000_000));
    f.upload_loan(terms(dec!(1_000), 50_000, 10, 2), 1, T0);
    f.upload_loan(terms(dec!(2_000), 50_000, 60, 2), 2, T0);

    let report = f.engine.aging_report(f.pool, T0 + 45 * DAY).unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(report[0].risk_score, 1);
    assert_eq!(report[0].days_past_due, 0);
    assert_eq!(report[0].loans, 1);
    assert_eq!(report[1].risk_score, 2);
    assert_eq!(report[1].days_past_due, 30);
    assert_eq!(report[1].loans, 1);
    // 35 days past due is beyond collection
    assert_eq!(report[1].debt, Decimal::ZERO);
}

#[test]
fn test_risk_scores_must_be_sorted() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    assert_eq!(
        f.engine
            .setup_risk_scores(f.pool, f.owner, vec![bucket(30), bucket(0)]),
        Err(SettlementError::UnsortedRiskScores { index: 1 })
    );
    assert_eq!(
        f.engine
            .setup_risk_scores(f.pool, f.owner, vec![bucket(0), bucket(0)]),
        Err(SettlementError::UnsortedRiskScores { index: 1 })
    );
    f.engine
        .setup_risk_scores(f.pool, f.owner, vec![bucket(0), bucket(15), bucket(60)])
        .unwrap();
    assert_eq!(f.engine.pool(f.pool).unwrap().risk_scores.len(), 3);
}

#[test]
fn test_risk_table_cannot_orphan_live_loans() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    f.upload_loan(terms(dec!(1_000), 50_000, 10, 2), 1, T0);
    assert_eq!(
        f.engine.setup_risk_scores(f.pool, f.owner, vec![]),
        Err(SettlementError::InvalidRiskScore { score: 1 })
    );
}
