//! `ups-conform`: replay a conformance fixture against a device profile.
//!
//! # Usage
//!
//! ```bash
//! ups-conform profiles/mecer.yaml profiles/mecer.fixture.yaml
//! ups-conform profiles/mecer.yaml profiles/mecer.fixture.yaml --json
//! ```
//!
//! Exits with status 1 when any value or command outcome diverges.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use ups_qproto::config::{Settings, DEFAULT_CONFIG_PATH};
use ups_qproto::conformance::{ConformanceHarness, Fixture};
use ups_qproto::logging;
use ups_qproto::protocol::DescriptorTable;

#[derive(Parser)]
#[command(name = "ups-conform")]
#[command(about = "Check a UPS protocol profile against recorded exchanges", long_about = None)]
struct Cli {
    /// Device profile (YAML)
    profile: PathBuf,

    /// Conformance fixture (YAML)
    fixture: PathBuf,

    /// Settings file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the profile passed.
async fn run(cli: Cli) -> Result<bool> {
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load settings: {}", cli.config.display()))?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    let table = DescriptorTable::load(&cli.profile)?;
    let fixture = Fixture::load(&cli.fixture)?;
    info!(
        profile = %cli.profile.display(),
        fixture = %cli.fixture.display(),
        "running conformance check"
    );

    let report = ConformanceHarness::new(&table, settings.exchange_timeout())
        .run(&fixture)
        .await
        .context("Conformance run aborted")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(report.is_pass())
}
