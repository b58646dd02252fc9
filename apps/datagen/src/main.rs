mod cli;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use datagen_bus::{Dispatcher, LoggingDispatcher, NatsDispatcher};
use datagen_core::{Generator, RunSummary, StopHandle};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::DatagenConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    datagen_telemetry::install("datagen")?;
    info!(
        otlp_export = datagen_telemetry::telemetry_enabled(),
        "telemetry initialised"
    );

    let config = DatagenConfig::from_cli(cli)?;
    let generator_config = config.generator_config()?;
    let dispatcher = connect(&config).await?;
    let generator = Generator::new(generator_config, dispatcher)?;

    spawn_interrupt_handler(generator.stop_handle());

    let summary = generator.run(config.run_mode()).await?;
    print_summary(&summary, config.json)
}

#[derive(Serialize)]
struct SummaryReport {
    attempted: u64,
    dispatched: u64,
    failed: u64,
    skipped: u64,
    batches: u64,
    peak_in_flight: usize,
    elapsed_ms: u64,
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    let report = SummaryReport {
        attempted: summary.attempted,
        dispatched: summary.dispatched,
        failed: summary.failed,
        skipped: summary.skipped,
        batches: summary.batches,
        peak_in_flight: summary.peak_in_flight,
        elapsed_ms: summary.elapsed.as_millis() as u64,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "attempted={} dispatched={} failed={} skipped={} batches={} peak_in_flight={} elapsed_ms={}",
            report.attempted,
            report.dispatched,
            report.failed,
            report.skipped,
            report.batches,
            report.peak_in_flight,
            report.elapsed_ms
        );
    }
    Ok(())
}

async fn connect(config: &DatagenConfig) -> Result<Arc<dyn Dispatcher>> {
    if config.dry_run {
        info!("dry run, messages are logged only");
        return Ok(Arc::new(LoggingDispatcher::default()));
    }
    let client = async_nats::connect(config.nats_url.as_str())
        .await
        .with_context(|| format!("connecting to NATS at {}", config.nats_url))?;
    info!(url = %config.nats_url, prefix = %config.subject_prefix, "connected to NATS");
    Ok(Arc::new(NatsDispatcher::new(
        client,
        config.subject_prefix.clone(),
    )))
}

fn spawn_interrupt_handler(stop: StopHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping after in-flight messages");
                stop.stop();
            }
            Err(err) => warn!(error = %err, "could not listen for ctrl-c"),
        }
    });
}
