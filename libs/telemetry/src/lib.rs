//! Telemetry plumbing shared by the generator binaries and libraries.
//! Installs the tracing subscriber (optionally exporting spans over OTLP)
//! and records labelled counters and histograms through the `metrics` facade.

use anyhow::Result;

mod config;
mod context;
mod metrics;
mod tracing_init;

pub use config::{TelemetryConfig, TelemetryProtocol};
pub use context::TelemetryLabels;
pub use metrics::{record_counter, record_histogram};
pub use tracing_init::{init_telemetry, telemetry_enabled};

/// Installs the subscriber configured from `RUST_LOG`, `LOG_FORMAT` and the
/// `OTEL_*` variables.
pub fn install(service_name: &str) -> Result<()> {
    init_telemetry(TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}
