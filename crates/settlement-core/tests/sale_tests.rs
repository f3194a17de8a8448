mod common;

use common::*;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use settlement_core::fixed::{InterestRate, Ratio};
use settlement_core::pool::PoolState;
use settlement_core::sale::{SaleId, StopReason};
use settlement_core::{Address, SettlementError, TokenId, Tranche};

fn with_junior(f: &mut Fixture, amount: rust_decimal::Decimal) -> SaleId {
    let jot = SaleId::new(f.pool, Tranche::Junior);
    let alice = f.alice.address();
    f.engine.fund(f.usd, alice, amount).unwrap();
    f.engine
        .start_new_round_sale(jot, f.owner, round(T0, T0 + 10 * DAY, dec!(1_000_000), None))
        .unwrap();
    f.engine.buy_tokens(jot, alice, amount, T0).unwrap();
    jot
}

// ===========================================================================
// Stop conditions and senior interest
// ===========================================================================

#[test]
fn test_cap_stop_freezes_interest_at_current_step() {
    let mut f = fixture(Ratio(200_000), dec!(1_000_000));
    let jot = with_junior(&mut f, dec!(1_000));
    let sot = SaleId::new(f.pool, Tranche::Senior);
    let bob = f.bob.address();
    f.engine.fund(f.usd, bob, dec!(1_000)).unwrap();
    f.engine
        .start_new_round_sale(sot, f.owner, round(T0, T0 + 10 * DAY, dec!(1_000), Some(rising_schedule())))
        .unwrap();

    let first = f.engine.buy_tokens(sot, bob, dec!(600), T0 + DAY).unwrap();
    assert!(!first.finalized);
    assert_eq!(f.engine.current_interest(sot, T0 + DAY).unwrap(), InterestRate(15_000));

    // two full intervals elapsed when the cap fills
    let last = f.engine.buy_tokens(sot, bob, dec!(400), T0 + 2 * DAY + 100).unwrap();
    assert!(last.finalized);

    let sale = f.engine.sale(sot).unwrap();
    assert_eq!(sale.stop_reason, Some(StopReason::CapReached));
    assert_eq!(sale.picked_interest, Some(InterestRate(20_000)));
    assert_eq!(sale.finalized_at, Some(T0 + 2 * DAY + 100));
    assert_eq!(f.engine.pool(f.pool).unwrap().senior_interest, InterestRate(20_000));
    assert_eq!(f.engine.current_interest(sot, T0 + 9 * DAY).unwrap(), InterestRate(20_000));

    assert_eq!(f.engine.finalize_sale(sot, T0 + 3 * DAY), Err(SettlementError::AlreadyFinalized));
    assert_eq!(
        f.engine.buy_tokens(sot, bob, dec!(1), T0 + 3 * DAY),
        Err(SettlementError::SaleNotOpen)
    );

    // junior still selling
    assert_eq!(f.engine.pool(f.pool).unwrap().state, PoolState::IssuingTokens);
    f.engine.finalize_sale(jot, T0 + 10 * DAY).unwrap();
    assert_eq!(f.engine.pool(f.pool).unwrap().state, PoolState::Active);
}

#[test]
fn test_closing_time_stop_caps_interest_at_final() {
    let mut f = fixture(Ratio(200_000), dec!(1_000_000));
    with_junior(&mut f, dec!(1_000));
    let sot = SaleId::new(f.pool, Tranche::Senior);
    let bob = f.bob.address();
    f.engine.fund(f.usd, bob, dec!(500)).unwrap();
    f.engine
        .start_new_round_sale(sot, f.owner, round(T0, T0 + 7 * DAY, dec!(100_000), Some(rising_schedule())))
        .unwrap();
    f.engine.buy_tokens(sot, bob, dec!(500), T0 + DAY).unwrap();

    assert_eq!(f.engine.finalize_sale(sot, T0 + 7 * DAY - 1), Err(SettlementError::SaleStillOpen));

    // 10000 + 7 * 5000 = 45000, capped at 40000
    let sale = f.engine.finalize_sale(sot, T0 + 7 * DAY).unwrap();
    assert_eq!(sale.stop_reason, Some(StopReason::ClosingTime));
    assert_eq!(sale.picked_interest, Some(InterestRate(40_000)));
    assert_eq!(f.engine.pool(f.pool).unwrap().senior_interest, InterestRate(40_000));
}

#[test]
fn test_late_finalize_uses_closing_time() {
    let mut f = fixture(Ratio(200_000), dec!(1_000_000));
    with_junior(&mut f, dec!(1_000));
    let sot = SaleId::new(f.pool, Tranche::Senior);
    let bob = f.bob.address();
    f.engine.fund(f.usd, bob, dec!(500)).unwrap();
    f.engine
        .start_new_round_sale(sot, f.owner, round(T0, T0 + 3 * DAY, dec!(100_000), Some(rising_schedule())))
        .unwrap();
    f.engine.buy_tokens(sot, bob, dec!(500), T0).unwrap();

    let sale = f.engine.finalize_sale(sot, T0 + 10 * DAY).unwrap();
    assert_eq!(sale.finalized_at, Some(T0 + 3 * DAY));
    assert_eq!(sale.picked_interest, Some(InterestRate(25_000)));
}

#[test]
fn test_window_excludes_closing_instant() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    let jot = SaleId::new(f.pool, Tranche::Junior);
    let alice = f.alice.address();
    f.engine.fund(f.usd, alice, dec!(5_000)).unwrap();
    f.engine
        .start_new_round_sale(jot, f.owner, round(T0, T0 + DAY, dec!(1_000), None))
        .unwrap();

    assert_eq!(
        f.engine.buy_tokens(jot, alice, dec!(10), T0 - 1),
        Err(SettlementError::SaleNotOpen)
    );
    assert_eq!(
        f.engine.buy_tokens(jot, alice, dec!(10), T0 + DAY),
        Err(SettlementError::SaleNotOpen)
    );
    assert_eq!(
        f.engine.buy_tokens(jot, alice, dec!(1_001), T0 + 1),
        Err(SettlementError::CapExceeded {
            cap: dec!(1_000),
            requested: dec!(1_001),
        })
    );
    // exactly at the cap the sale stops itself
    let purchase = f.engine.buy_tokens(jot, alice, dec!(1_000), T0 + 1).unwrap();
    assert!(purchase.finalized);
    assert_eq!(
        f.engine.sale(jot).unwrap().stop_reason,
        Some(StopReason::CapReached)
    );
}

// ===========================================================================
// Purchase rules
// ===========================================================================

#[test]
fn test_senior_purchase_respects_min_first_loss() {
    let mut f = fixture(Ratio(200_000), dec!(1_000_000));
    let sot = SaleId::new(f.pool, Tranche::Senior);
    let bob = f.bob.address();
    f.engine.fund(f.usd, bob, dec!(10_000)).unwrap();
    f.engine
        .start_new_round_sale(sot, f.owner, round(T0, T0 + DAY, dec!(100_000), Some(rising_schedule())))
        .unwrap();

    assert!(matches!(
        f.engine.buy_tokens(sot, bob, dec!(100), T0),
        Err(SettlementError::MinFirstLossViolated { .. })
    ));

    with_junior(&mut f, dec!(1_000));
    // 20% first loss: 1000 junior supports at most 4000 senior
    f.engine.buy_tokens(sot, bob, dec!(4_000), T0 + 1).unwrap();
    assert_eq!(
        f.engine.buy_tokens(sot, bob, dec!(1), T0 + 2),
        Err(SettlementError::MinFirstLossViolated {
            senior: dec!(4_001),
            junior: dec!(1_000),
        })
    );
}

#[test]
fn test_purchase_mints_at_round_rate() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    let jot = SaleId::new(f.pool, Tranche::Junior);
    let alice = f.alice.address();
    f.engine.fund(f.usd, alice, dec!(300)).unwrap();
    let mut r = round(T0, T0 + DAY, dec!(1_000), None);
    r.rate = dec!(2.5);
    f.engine.start_new_round_sale(jot, f.owner, r).unwrap();

    let purchase = f.engine.buy_tokens(jot, alice, dec!(101), T0).unwrap();
    // floor(101 * 2.5)
    assert_eq!(purchase.tokens, dec!(252));
    assert_eq!(f.engine.balance_of(jot.token(), &alice), dec!(252));
    assert_eq!(f.usd_balance(&alice), dec!(199));
    assert_eq!(f.engine.reserve(f.pool).unwrap(), dec!(101));
    assert_eq!(f.engine.pool(f.pool).unwrap().junior_paid_in, dec!(101));
}

#[test]
fn test_purchase_requires_investor_and_enabled_pool() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    let jot = SaleId::new(f.pool, Tranche::Junior);
    let stranger = Address::labeled("stranger");
    f.engine.fund(f.usd, stranger, dec!(100)).unwrap();
    f.engine.fund(f.usd, f.alice.address(), dec!(100)).unwrap();
    f.engine
        .start_new_round_sale(jot, f.owner, round(T0, T0 + DAY, dec!(1_000), None))
        .unwrap();

    assert!(matches!(
        f.engine.buy_tokens(jot, stranger, dec!(10), T0),
        Err(SettlementError::Unauthorized { .. })
    ));

    f.engine.set_redeem_disabled(f.pool, f.redeem_admin, true).unwrap();
    assert_eq!(
        f.engine.buy_tokens(jot, f.alice.address(), dec!(10), T0),
        Err(SettlementError::RedeemDisabled(f.pool))
    );
    assert!(matches!(
        f.engine.set_redeem_disabled(f.pool, f.owner, false),
        Err(SettlementError::Unauthorized { .. })
    ));
    f.engine.set_redeem_disabled(f.pool, f.redeem_admin, false).unwrap();
    f.engine.buy_tokens(jot, f.alice.address(), dec!(10), T0).unwrap();
    assert_eq!(
        f.engine.total_supply(TokenId::tranche(f.pool, Tranche::Junior)),
        dec!(10)
    );
}

// ===========================================================================
// Round management
// ===========================================================================

#[test]
fn test_round_configuration_is_validated() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    let jot = SaleId::new(f.pool, Tranche::Junior);
    let sot = SaleId::new(f.pool, Tranche::Senior);

    assert!(matches!(
        f.engine.start_new_round_sale(sot, f.owner, round(T0, T0 + DAY, dec!(1_000), None)),
        Err(SettlementError::InvalidInput { .. })
    ));
    assert!(matches!(
        f.engine.start_new_round_sale(jot, f.owner, round(T0, T0 + DAY, dec!(1_000), Some(flat_schedule()))),
        Err(SettlementError::InvalidInput { .. })
    ));
    assert!(matches!(
        f.engine.start_new_round_sale(jot, f.owner, round(T0, T0, dec!(1_000), None)),
        Err(SettlementError::InvalidInput { .. })
    ));
    assert!(matches!(
        f.engine.start_new_round_sale(jot, f.owner, round(T0, T0 + DAY, dec!(0), None)),
        Err(SettlementError::InvalidInput { .. })
    ));
    assert!(matches!(
        f.engine.start_new_round_sale(jot, f.alice.address(), round(T0, T0 + DAY, dec!(1_000), None)),
        Err(SettlementError::Unauthorized { .. })
    ));
    assert_eq!(f.engine.pool(f.pool).unwrap().state, PoolState::Open);
}

#[test]
fn test_rounds_are_numbered() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    let jot = SaleId::new(f.pool, Tranche::Junior);
    f.engine
        .start_new_round_sale(jot, f.owner, round(T0, T0 + DAY, dec!(1_000), None))
        .unwrap();
    // replacing an unfinalized round keeps its number
    f.engine
        .start_new_round_sale(jot, f.owner, round(T0, T0 + 2 * DAY, dec!(2_000), None))
        .unwrap();
    assert_eq!(f.engine.sale(jot).unwrap().round_number, 1);
    assert_eq!(f.engine.sale(jot).unwrap().round.total_cap, dec!(2_000));

    f.engine.finalize_sale(jot, T0 + 2 * DAY).unwrap();
    f.engine
        .start_new_round_sale(jot, f.owner, round(T0 + 3 * DAY, T0 + 4 * DAY, dec!(1_000), None))
        .unwrap();
    let sale = f.engine.sale(jot).unwrap();
    assert_eq!(sale.round_number, 2);
    assert!(!sale.finalized);
    assert_eq!(f.engine.pool(f.pool).unwrap().state, PoolState::IssuingTokens);
}

#[test]
fn test_closed_pool_rejects_rounds() {
    let mut f = fixture(Ratio::ZERO, dec!(1_000_000));
    f.engine.close_pool(f.pool, f.owner).unwrap();
    let jot = SaleId::new(f.pool, Tranche::Junior);
    assert_eq!(
        f.engine.start_new_round_sale(jot, f.owner, round(T0, T0 + DAY, dec!(1_000), None)),
        Err(SettlementError::PoolClosed(f.pool))
    );
}
