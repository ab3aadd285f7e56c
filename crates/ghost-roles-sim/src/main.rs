//! Ghost role session simulator
//!
//! Replays a scenario file against the allocation engine with a seeded
//! random source and prints a JSON summary of who ended up with which role.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod host;
mod runner;
mod scenario;

use runner::RunOptions;
use scenario::Scenario;

#[derive(Parser)]
#[command(name = "ghost-roles-sim")]
#[command(about = "Deterministic ghost role allocation simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print its summary
    Run {
        /// Scenario file
        scenario: PathBuf,

        /// Override the scenario seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Engine override, e.g. `raffle.max_secs=60` (repeatable)
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, String)>,

        /// Pretty-print the summary
        #[arg(long)]
        pretty: bool,
    },

    /// Print the effective engine configuration of a scenario
    Config {
        /// Scenario file
        scenario: PathBuf,

        /// Engine override, e.g. `lottery_period_secs=5` (repeatable)
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, String)>,
    },
}

fn parse_override(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got {raw:?}"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            seed,
            overrides,
            pretty,
        } => {
            let scenario = Scenario::load(&scenario)?;
            let summary = runner::run(&scenario, &RunOptions { seed, overrides })?;
            let json = if pretty {
                serde_json::to_string_pretty(&summary)
            } else {
                serde_json::to_string(&summary)
            }
            .context("failed to encode summary")?;
            println!("{json}");
        }

        Commands::Config {
            scenario,
            overrides,
        } => {
            let scenario = Scenario::load(&scenario)?;
            let config = runner::engine_config(
                &scenario,
                &RunOptions {
                    seed: None,
                    overrides,
                },
            )?;
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
