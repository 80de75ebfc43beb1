use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod error;
mod plant;
mod scenario;

use error::SimResult;
use plant::Plant;
use scenario::Scenario;

#[derive(Parser)]
#[command(name = "hcc-sim")]
#[command(about = "Home climate control simulator - plays sensor readings against zones and HVAC units", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate scenario file syntax and cross references
    Validate {
        /// Path to the scenario YAML file
        scenario_path: PathBuf,
    },
    /// Run a scenario and print the final system status
    Run {
        /// Path to the scenario YAML file
        scenario_path: PathBuf,
        /// Single line JSON output
        #[arg(long)]
        compact: bool,
    },
}

#[tokio::main]
async fn main() -> SimResult<()> {
    // RUST_LOG overrides, info otherwise
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { scenario_path } => cmd_validate(&scenario_path),
        Commands::Run {
            scenario_path,
            compact,
        } => cmd_run(&scenario_path, compact).await,
    }
}

fn cmd_validate(scenario_path: &Path) -> SimResult<()> {
    println!("Validating scenario: {}", scenario_path.display());
    let scenario = Scenario::load(scenario_path)?;
    println!(
        "✓ Scenario is valid: {} zones, {} readings",
        scenario.zones.len(),
        scenario.readings.len()
    );
    Ok(())
}

async fn cmd_run(scenario_path: &Path, compact: bool) -> SimResult<()> {
    let scenario = Scenario::load(scenario_path)?;
    let plant = Plant::assemble(&scenario).await?;

    plant.play(&scenario.readings).await;
    tokio::time::sleep(Duration::from_millis(scenario.settle_ms)).await;

    let status = plant.snapshot();
    for zone in plant.zones() {
        if let Some(economizer) = zone.economizer() {
            println!("{}: economizer {:?}", zone.name(), economizer.state());
        }
    }
    let json = if compact {
        serde_json::to_string(&status)?
    } else {
        serde_json::to_string_pretty(&status)?
    };
    println!("{json}");

    plant.shutdown().await;
    Ok(())
}
