#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the county lights pipeline.
//!
//! Uses `indicatif-log-bridge` (via [`county_lights_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and the county progress bar never fight for the terminal.

mod setup;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use county_lights_cli_utils::IndicatifProgress;
use county_lights_models::{CountyCode, CountyOutcome};
use county_lights_pipeline::{Config, Isolation, RunDriver, load_worklist, serve_tile_task};

use crate::setup::Overrides;

#[derive(Parser)]
#[command(
    name = "county_lights",
    about = "Per-county nighttime light tables from satellite tiles"
)]
struct Cli {
    /// Config file (defaults to `$COUNTY_LIGHTS_CONFIG`, then
    /// `county_lights.toml` in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Maximum tiles processed at once within a county
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Tile isolation: "process" or "thread"
    #[arg(long, global = true)]
    isolation: Option<Isolation>,
    /// Keep per-date zonal tables after pivoting
    #[arg(long, global = true)]
    keep_intermediate: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every pending county of the worklist
    Run,
    /// Process a single county
    County {
        /// County code (e.g., "06081" or "6081")
        code: String,
        /// Process it even if it is already recorded as done
        #[arg(long)]
        force: bool,
    },
    /// List the tiles a county overlaps
    Tiles {
        /// County code
        code: String,
    },
    /// Show how much of the worklist is done
    Status,
    /// Process one tile task read as JSON from stdin (internal)
    #[command(hide = true)]
    TileWorker,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = Config::locate(cli.config)?;
    let mut config = Config::load(&config_path)?;
    Overrides {
        concurrency: cli.concurrency,
        isolation: cli.isolation,
        keep_intermediate: cli.keep_intermediate,
    }
    .apply(&mut config)?;

    let log_file = config.paths.output_root.join("process.log");
    let multi = county_lights_cli_utils::init_logger(Some(&log_file));

    match cli.command {
        Commands::TileWorker => {
            let processor = setup::tile_processor(&config);
            let outcome =
                serve_tile_task(&processor, std::io::stdin().lock(), std::io::stdout().lock())?;
            log::debug!("Tile worker finished: {outcome:?}");
        }
        Commands::Run => {
            let orchestrator = setup::orchestrator(&config, &config_path)?;
            let worklist =
                load_worklist(&config.paths.worklist, &config.fields.worklist_code)?;

            let progress = IndicatifProgress::steps_bar(&multi, "Counties", 0);
            let driver = RunDriver::new(orchestrator, progress);
            let summary = driver.run(&worklist).await?;
            println!("{summary}");
        }
        Commands::County { code, force } => {
            let code = CountyCode::parse(&code)?;
            let orchestrator = setup::orchestrator(&config, &config_path)?;
            if !orchestrator.counties().contains(&code) {
                return Err(format!(
                    "County {code} is not in {}",
                    config.paths.county_layer.display()
                )
                .into());
            }
            if !force && orchestrator.store().load_done_set()?.contains(&code) {
                log::info!("[{code}] Already done; pass --force to process it again");
                return Ok(());
            }

            match orchestrator.process_county(&code).await {
                CountyOutcome::Completed {
                    zone_layer,
                    wide_table,
                    ..
                } => {
                    println!("{}", zone_layer.display());
                    println!("{}", wide_table.display());
                }
                CountyOutcome::Skipped { reason } => println!("skipped: {reason}"),
                CountyOutcome::Failed { reason } => println!("failed: {reason}"),
            }
        }
        Commands::Tiles { code } => {
            let code = CountyCode::parse(&code)?;
            let orchestrator = setup::orchestrator(&config, &config_path)?;
            for tile in orchestrator.tiles_for(&code)? {
                println!("{tile}");
            }
        }
        Commands::Status => {
            let orchestrator = setup::orchestrator(&config, &config_path)?;
            let worklist =
                load_worklist(&config.paths.worklist, &config.fields.worklist_code)?;
            let driver = RunDriver::new(
                orchestrator,
                county_lights_pipeline::progress::null_progress(),
            );
            let plan = driver.plan(&worklist)?;

            println!("{:<12} {}", "requested", plan.requested);
            println!("{:<12} {}", "unmatched", plan.unmatched.len());
            println!("{:<12} {}", "done", plan.already_done.len());
            println!("{:<12} {}", "pending", plan.pending.len());
            print_codes("unmatched", &plan.unmatched);
            print_codes("pending", &plan.pending);
        }
    }

    Ok(())
}

fn print_codes(label: &str, codes: &[CountyCode]) {
    if codes.is_empty() {
        return;
    }
    println!();
    println!("{label}:");
    println!("{}", "-".repeat(50));
    for code in codes {
        println!("  {code}");
    }
}
