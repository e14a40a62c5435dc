//! EquiSolo pool - Main Entry Point
//!
//! Parses command-line arguments, loads the pool's JSON configuration, and
//! drives the orchestrator for as long as the process runs.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info};

use equisolo_pool::config::PoolConfig;
use equisolo_pool::orchestrator::Orchestrator;

/// Command line arguments for the EquiSolo pool.
#[derive(Parser)]
#[clap(name = "equisolo-pool")]
#[clap(about = "Solo mining pool for Equihash-family coins (Komodo/Zcash lineage)")]
struct Cli {
    /// Path to the pool's JSON configuration file
    #[clap(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Verbosity level (0-5)
    #[clap(short, long, default_value = "2")]
    verbosity: u8,
}

/// Initialize logging based on verbosity level.
fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();
}

fn load_config(path: &PathBuf) -> Result<PoolConfig, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    let config: PoolConfig = serde_json::from_slice(&bytes).map_err(|e| format!("parsing {}: {e}", path.display()))?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    info!("starting equisolo-pool");

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            process::exit(1);
        }
    };

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("failed to build orchestrator: {e}");
            process::exit(1);
        }
    };

    let run_handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };

    tokio::select! {
        result = run_handle => {
            match result {
                Ok(Ok(())) => info!("pool startup sequence completed"),
                Ok(Err(e)) => {
                    error!("pool failed to start: {e}");
                    process::exit(1);
                }
                Err(e) => {
                    error!("pool startup task panicked: {e}");
                    process::exit(1);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C during startup, shutting down");
            orchestrator.stop();
            return;
        }
    }

    // The startup sequence has returned (the Stratum listeners and
    // background refresh tasks keep running); block here until the
    // operator asks the process to stop.
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {e}");
    }
    info!("received Ctrl-C, shutting down");
    orchestrator.stop();
}
