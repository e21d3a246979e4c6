mod checks;
mod config;
mod loader;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use logger::LogFormat;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use vigil::{
    ChannelBroadcaster, CheckResult, InMemoryDescriptorStore, InMemoryResultStore, Scheduler,
};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "vigil", version, about = "Runs scheduled health checks")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/vigil/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate the configured checks and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;

    let format: LogFormat = config.logging.format.parse().map_err(anyhow::Error::msg)?;
    logger::init_tracing(LevelFilter::INFO, Some(format));

    if cli.print_config {
        println!("{config}");
        return Ok(());
    }

    let settings = config.scheduler.settings();
    let loaded = loader::parse_entries(&config.checks, settings.min_interval);

    if cli.check_config {
        for warning in &loaded.warnings {
            println!("warning: {warning}");
        }
        for rejected in &loaded.rejected {
            println!("error: {rejected}");
        }
        println!("{} checks ok, {} rejected", loaded.descriptors.len(), loaded.rejected.len());
        if !loaded.rejected.is_empty() {
            bail!("configuration has rejected checks");
        }
        return Ok(());
    }

    let descriptors = Arc::new(InMemoryDescriptorStore::new());
    loader::apply(descriptors.as_ref(), loaded).await;

    let results = Arc::new(InMemoryResultStore::new(config.results.capacity_per_check));
    let registry = Arc::new(checks::builtin_registry(&config.http)?);
    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let result_log = tokio::spawn(log_results(broadcaster.subscribe()));

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    let scheduler = Scheduler::new(descriptors, results, registry, broadcaster)
        .with_settings(settings);
    let stats = scheduler.run(shutdown).await;

    result_log.abort();
    info!(
        dispatched = stats.dispatched,
        skipped_overlap = stats.skipped_overlap,
        skipped_unresolved = stats.skipped_unresolved,
        "Shutdown complete"
    );
    Ok(())
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping"),
        Err(e) => error!("Failed to listen for Ctrl+C, stopping: {e}"),
    }
    shutdown.cancel();
}

async fn log_results(mut receiver: broadcast::Receiver<CheckResult>) {
    loop {
        match receiver.recv().await {
            Ok(result) => info!(
                check_id = %result.check_id,
                status = %result.status,
                message = result.message.as_deref().unwrap_or_default(),
                latency_ms = result.metrics.get("latency_ms").copied(),
                "Check result"
            ),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Result log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
