//! Telemetry CDC replicator service.
//!
//! Loads configuration, initializes logging and metrics, then runs one pipeline from the
//! configured source to the configured sinks until a termination signal arrives.

use std::path::PathBuf;

use cdc_config::shared::ReplicatorConfig;
use cdc_telemetry::metrics::{init_metrics, init_metrics_handle};
use cdc_telemetry::tracing::init_tracing;
use clap::Parser;
use tracing::error;

use crate::config::load_replicator_config;
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

mod config;
mod core;
mod error;
mod health;
mod signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Change data capture for vehicle telemetry", long_about = None)]
struct Args {
    /// Configuration file to load instead of the `configuration/` directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ReplicatorResult<()> {
    let args = Args::parse();

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    let replicator_config = load_replicator_config(args.config.as_deref())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(replicator_config))?;

    Ok(())
}

async fn async_main(replicator_config: ReplicatorConfig) -> ReplicatorResult<()> {
    // A dedicated exporter port takes precedence over serving metrics on the health server.
    let metrics_handle = match replicator_config.metrics.port {
        Some(port) => {
            init_metrics(env!("CARGO_BIN_NAME"), port).map_err(ReplicatorError::config)?;
            None
        }
        None => Some(init_metrics_handle().map_err(ReplicatorError::config)?),
    };

    if let Err(err) = start_replicator_with_config(replicator_config, metrics_handle).await {
        error!(error = %err, "replicator failed");
        return Err(err);
    }

    Ok(())
}
