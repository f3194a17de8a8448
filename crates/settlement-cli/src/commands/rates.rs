use clap::Args;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use settlement_core::fixed::{accrual_factor, compound, discount, InterestRate, SECONDS_PER_YEAR};
use settlement_core::sale::InterestSchedule;

/// Arguments for evaluating a senior interest schedule
#[derive(Args)]
pub struct InterestArgs {
    /// Starting rate, percent scaled by 10^4
    #[arg(long)]
    pub initial: u32,

    /// Ceiling rate, percent scaled by 10^4
    #[arg(long = "final")]
    pub final_rate: u32,

    /// Seconds per step
    #[arg(long)]
    pub interval: u64,

    /// Rate added per elapsed step
    #[arg(long)]
    pub step: u32,

    /// Sale opening time (unix seconds)
    #[arg(long, default_value_t = 0)]
    pub opening: u64,

    /// Evaluation time (unix seconds)
    #[arg(long)]
    pub at: u64,
}

/// Arguments for per-second compounding
#[derive(Args)]
pub struct AccrueArgs {
    /// Amount in base currency units
    #[arg(long)]
    pub amount: Decimal,

    /// Annual rate, percent scaled by 10^4
    #[arg(long)]
    pub rate: u32,

    /// Elapsed seconds
    #[arg(long)]
    pub seconds: u64,

    /// Day-count basis
    #[arg(long, default_value_t = SECONDS_PER_YEAR)]
    pub seconds_per_year: u64,

    /// Discount instead of compound
    #[arg(long)]
    pub discount: bool,
}

pub fn run_interest(args: InterestArgs) -> Result<Value, Box<dyn std::error::Error>> {
    if args.interval == 0 {
        return Err("--interval must be positive".into());
    }
    if args.final_rate < args.initial {
        return Err("--final must not be below --initial".into());
    }
    let schedule = InterestSchedule {
        initial_interest: InterestRate(args.initial),
        final_interest: InterestRate(args.final_rate),
        time_interval: args.interval,
        amount_per_interval: InterestRate(args.step),
    };
    let rate = schedule.interest_at(args.opening, args.at);
    Ok(json!({
        "interest": rate,
        "annual_fraction": rate.as_fraction(),
        "elapsed_intervals": args.at.saturating_sub(args.opening) / args.interval,
    }))
}

pub fn run_accrue(args: AccrueArgs) -> Result<Value, Box<dyn std::error::Error>> {
    if args.seconds_per_year == 0 {
        return Err("--seconds-per-year must be positive".into());
    }
    let rate = InterestRate(args.rate);
    let factor = accrual_factor(rate, args.seconds, args.seconds_per_year)?;
    let value = if args.discount {
        discount(args.amount, rate, args.seconds, args.seconds_per_year)?
    } else {
        compound(args.amount, rate, args.seconds, args.seconds_per_year)?
    };
    Ok(json!({
        "amount": args.amount,
        "value": value,
        "factor": factor,
        "mode": if args.discount { "discount" } else { "compound" },
    }))
}
