mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::rates::{AccrueArgs, InterestArgs};
use commands::scenario::RunArgs;
use commands::terms::{DecodeArgs, EncodeArgs};

/// Tranche settlement engine
#[derive(Parser)]
#[command(
    name = "settle",
    version,
    about = "Tranche settlement engine",
    long_about = "Replays settlement scenarios (loan tokenization, tranche sales, \
                  write-offs and senior/junior redemptions) against an in-memory \
                  engine, and exposes the fixed-point calculators it uses."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON or YAML scenario file
    Run(RunArgs),
    /// Pack loan terms into their 32-byte encoding
    TermsEncode(EncodeArgs),
    /// Unpack a 32-byte terms encoding
    TermsDecode(DecodeArgs),
    /// Senior interest of a rising schedule at a given time
    Interest(InterestArgs),
    /// Compound an amount at a per-second rate
    Accrue(AccrueArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Run(args) => commands::scenario::run(args),
        Commands::TermsEncode(args) => commands::terms::run_encode(args),
        Commands::TermsDecode(args) => commands::terms::run_decode(args),
        Commands::Interest(args) => commands::rates::run_interest(args),
        Commands::Accrue(args) => commands::rates::run_accrue(args),
        Commands::Version => {
            println!("settle {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
