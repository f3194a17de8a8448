#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement_core::auth::{KeyPair, Role, RoleRegistry};
use settlement_core::config::EngineConfig;
use settlement_core::fixed::{InterestRate, Ratio};
use settlement_core::kernel::{asset_id, DebtOrder, MintAuthorization};
use settlement_core::pool::PoolParams;
use settlement_core::risk::RiskScore;
use settlement_core::sale::{InterestSchedule, SaleId, SaleRound};
use settlement_core::terms::{AmortizationUnit, LoanTerms};
use settlement_core::{Address, AssetId, Moment, Money, PoolId, SettlementEngine, TokenId, Tranche};

pub const T0: Moment = 1_700_000_000;
pub const DAY: Moment = 86_400;

pub fn bucket(days_past_due: u32) -> RiskScore {
    RiskScore {
        days_past_due,
        advance_rate: Ratio(900_000),
        penalty_rate: InterestRate::ZERO,
        interest_rate: InterestRate(80_000),
        probability_of_default: Ratio(100_000),
        loss_given_default: Ratio(500_000),
        discount_rate: InterestRate(40_000),
        grace_period: 2 * DAY,
        collection_period: 30 * DAY,
        write_off_after_grace_period: Ratio(600_000),
        write_off_after_collection_period: Ratio::ZERO,
    }
}

pub fn terms(principal: Money, rate: u32, days: u16, grace_days: u8) -> LoanTerms {
    LoanTerms {
        principal,
        interest_rate: InterestRate(rate),
        amortization_unit: AmortizationUnit::Days,
        term_length: days,
        grace_period_days: grace_days,
    }
}

/// Flat senior schedule so token prices stay at par.
pub fn flat_schedule() -> InterestSchedule {
    InterestSchedule {
        initial_interest: InterestRate::ZERO,
        final_interest: InterestRate::ZERO,
        time_interval: DAY,
        amount_per_interval: InterestRate::ZERO,
    }
}

pub fn rising_schedule() -> InterestSchedule {
    InterestSchedule {
        initial_interest: InterestRate(10_000),
        final_interest: InterestRate(40_000),
        time_interval: DAY,
        amount_per_interval: InterestRate(5_000),
    }
}

pub fn round(opening: Moment, closing: Moment, cap: Money, interest: Option<InterestSchedule>) -> SaleRound {
    SaleRound {
        opening_time: opening,
        closing_time: closing,
        rate: Decimal::ONE,
        total_cap: cap,
        interest,
    }
}

pub struct Fixture {
    pub engine: SettlementEngine<RoleRegistry>,
    pub pool: PoolId,
    pub usd: Address,
    pub creator: Address,
    pub owner: Address,
    pub validator: KeyPair,
    pub backend: Address,
    pub router: Address,
    pub redeem_admin: Address,
    pub alice: KeyPair,
    pub bob: KeyPair,
    pub debtor: Address,
    pub registry: Address,
}

pub fn fixture(min_first_loss: Ratio, debt_ceiling: Money) -> Fixture {
    let creator = Address::labeled("creator");
    let owner = Address::labeled("owner");
    let backend = Address::labeled("backend");
    let router = Address::labeled("router-operator");
    let redeem_admin = Address::labeled("redeem-admin");
    let validator = KeyPair::from_name("validator");
    let alice = KeyPair::from_name("alice");
    let bob = KeyPair::from_name("bob");

    let mut roles = RoleRegistry::new();
    roles.grant(creator, Role::PoolCreator, None);
    roles.grant(backend, Role::Backend, None);
    roles.grant(router, Role::RepaymentRouter, None);
    roles.grant(redeem_admin, Role::RedeemAdmin, None);
    roles.grant(alice.address(), Role::Investor, None);
    roles.grant(bob.address(), Role::Investor, None);

    let mut engine = SettlementEngine::new(EngineConfig::default(), roles).unwrap();
    let usd = Address::labeled("USD");
    let pool = engine
        .create_pool(
            creator,
            PoolParams {
                owner,
                currency: usd,
                min_first_loss,
                debt_ceiling,
                validators: vec![validator.address()],
                risk_scores: vec![bucket(0), bucket(30)],
            },
        )
        .unwrap();

    Fixture {
        engine,
        pool,
        usd,
        creator,
        owner,
        validator,
        backend,
        router,
        redeem_admin,
        alice,
        bob,
        debtor: Address::labeled("debtor"),
        registry: Address::labeled("terms-registry"),
    }
}

impl Fixture {
    pub fn pool_address(&self) -> Address {
        self.engine.pool(self.pool).unwrap().address
    }

    pub fn usd_balance(&self, holder: &Address) -> Money {
        self.engine.balance_of(TokenId::Currency(self.usd), holder)
    }

    pub fn fund_pool(&mut self, amount: Money) {
        let address = self.pool_address();
        self.engine.fund(self.usd, address, amount).unwrap();
    }

    /// Debt order for `loans` (terms, salt) signed by the pool validator.
    pub fn debt_order(&self, loans: &[(LoanTerms, u64)], now: Moment) -> DebtOrder {
        let config = self.engine.config();
        let pool = self.engine.pool(self.pool).unwrap();
        let mut addresses = vec![pool.address, config.repayment_router, self.registry, self.usd];
        let mut values = vec![Decimal::ZERO, Decimal::from(now), Decimal::ZERO];
        let mut packed_terms = Vec::new();
        let mut mint_authorizations = Vec::new();
        let mut nonce = self.engine.next_mint_nonce(&self.validator.address());

        for (t, salt) in loans {
            let packed = t.encode().unwrap();
            let id = self.asset_id(t, *salt);
            addresses.push(self.debtor);
            values.push(Decimal::from(now + 30 * DAY));
            values.push(Decimal::from(*salt));
            packed_terms.push(packed);
            mint_authorizations.push(MintAuthorization::sign(
                &self.validator,
                self.pool,
                &id,
                nonce,
                1,
                config.chain_id,
            ));
            nonce += 1;
        }

        DebtOrder {
            pool: self.pool,
            addresses,
            values,
            packed_terms,
            mint_authorizations,
        }
    }

    pub fn asset_id(&self, t: &LoanTerms, salt: u64) -> AssetId {
        asset_id(
            &self.engine.config().repayment_router,
            &self.debtor,
            &self.registry,
            &t.encode().unwrap(),
            u128::from(salt),
        )
    }

    /// Tokenize one loan at `now`, funding the pool for its advance first.
    pub fn upload_loan(&mut self, t: LoanTerms, salt: u64, now: Moment) -> AssetId {
        self.fund_pool(t.principal);
        let order = self.debt_order(&[(t, salt)], now);
        self.engine.fill_debt_order(order, now).unwrap()[0]
    }

    /// Alice buys `junior` JOT and Bob `senior` SOT; both sales closed at `T0 + DAY`.
    pub fn raise(&mut self, junior: Money, senior: Money, schedule: InterestSchedule) {
        let usd = self.usd;
        let (alice, bob) = (self.alice.address(), self.bob.address());
        self.engine.fund(usd, alice, junior).unwrap();
        self.engine.fund(usd, bob, senior).unwrap();

        let jot = SaleId::new(self.pool, Tranche::Junior);
        let sot = SaleId::new(self.pool, Tranche::Senior);
        self.engine
            .start_new_round_sale(jot, self.owner, round(T0, T0 + DAY, dec!(1_000_000_000), None))
            .unwrap();
        self.engine
            .start_new_round_sale(sot, self.owner, round(T0, T0 + DAY, dec!(1_000_000_000), Some(schedule)))
            .unwrap();
        self.engine.buy_tokens(jot, alice, junior, T0 + 10).unwrap();
        self.engine.buy_tokens(sot, bob, senior, T0 + 20).unwrap();
        self.engine.finalize_sale(jot, T0 + DAY).unwrap();
        self.engine.finalize_sale(sot, T0 + DAY).unwrap();
    }
}
