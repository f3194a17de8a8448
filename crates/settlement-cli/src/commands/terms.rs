use clap::Args;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use settlement_core::fixed::InterestRate;
use settlement_core::terms::{AmortizationUnit, LoanTerms, PackedTerms};

use crate::input;

/// Arguments for packing loan terms
#[derive(Args)]
pub struct EncodeArgs {
    /// Path to JSON/YAML terms file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Principal in base currency units
    #[arg(long)]
    pub principal: Option<Decimal>,

    /// Annual rate, percent scaled by 10^4 (50000 = 5%)
    #[arg(long)]
    pub interest_rate: Option<u32>,

    /// minutes, hours, days, weeks, months or years
    #[arg(long, default_value = "days")]
    pub unit: String,

    /// Number of amortization units until maturity
    #[arg(long)]
    pub term_length: Option<u16>,

    /// Grace period in days
    #[arg(long, default_value_t = 0)]
    pub grace_days: u8,
}

/// Arguments for unpacking loan terms
#[derive(Args)]
pub struct DecodeArgs {
    /// 32-byte terms as hex, with or without 0x
    #[arg(long)]
    pub packed: String,
}

pub fn run_encode(args: EncodeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let terms: LoanTerms = if let Some(ref path) = args.input {
        input::file::read_document(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        data
    } else {
        let amortization_unit: AmortizationUnit =
            serde_json::from_value(Value::String(args.unit.to_lowercase()))
                .map_err(|_| format!("unknown amortization unit '{}'", args.unit))?;
        LoanTerms {
            principal: args.principal
                .ok_or("--principal is required (or provide --input)")?,
            interest_rate: InterestRate(args.interest_rate
                .ok_or("--interest-rate is required (or provide --input)")?),
            amortization_unit,
            term_length: args.term_length
                .ok_or("--term-length is required (or provide --input)")?,
            grace_period_days: args.grace_days,
        }
    };

    let packed = terms.encode()?;
    Ok(json!({
        "packed": packed,
        "term_seconds": terms.term_seconds(),
        "grace_seconds": terms.grace_seconds(),
    }))
}

pub fn run_decode(args: DecodeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let packed: PackedTerms = args.packed.parse()?;
    let terms = packed.decode()?;
    Ok(serde_json::to_value(terms)?)
}
