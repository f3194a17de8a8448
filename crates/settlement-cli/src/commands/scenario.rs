use clap::Args;
use serde_json::Value;
use tracing::info;

use settlement_core::scenario::{run_scenario, Scenario};

use crate::input;

/// Arguments for scenario replay
#[derive(Args)]
pub struct RunArgs {
    /// Path to a JSON or YAML scenario (reads stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Exit with an error when any step failed unexpectedly
    #[arg(long)]
    pub strict: bool,
}

pub fn run(args: RunArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let scenario: Scenario = if let Some(ref path) = args.input {
        input::file::read_document(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        data
    } else {
        return Err("--input scenario file is required (or pipe one on stdin)".into());
    };

    info!(steps = scenario.steps.len(), grants = scenario.grants.len(), "replaying scenario");
    let report = run_scenario(&scenario)?;
    if args.strict && !report.warnings.is_empty() {
        return Err(format!(
            "{} step(s) did not match expectations: {}",
            report.warnings.len(),
            report.warnings.join("; ")
        )
        .into());
    }
    Ok(serde_json::to_value(report)?)
}
