//! Resolves CLI flags over environment defaults into a validated run plan.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use datagen_core::{
    DEFAULT_PAYLOAD_PADDING, ExceptionCatalog, GeneratorConfig, Payload, RunMode,
};

use crate::cli::{Cli, Command};

const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_SUBJECT_PREFIX: &str = "datagen";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    Error {
        count: u64,
        kinds: Vec<String>,
        failed_queue: Option<String>,
    },
    Audit {
        batch_size: usize,
        interval: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagenConfig {
    pub nats_url: String,
    pub subject_prefix: String,
    pub capacity: usize,
    pub payload_padding: usize,
    pub progress_every: Option<u64>,
    pub dry_run: bool,
    pub json: bool,
    pub workload: Workload,
}

impl DatagenConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    /// Flags win over `NATS_URL`, `DATAGEN_SUBJECT_PREFIX` and
    /// `DATAGEN_CAPACITY`.
    pub fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let capacity = match cli.capacity {
            Some(capacity) => capacity,
            None => match env("DATAGEN_CAPACITY") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("DATAGEN_CAPACITY is not a number: {raw}"))?,
                None => datagen_backpressure::DEFAULT_CAPACITY,
            },
        };
        if capacity == 0 {
            bail!("capacity must be at least 1");
        }
        if cli.progress_every == Some(0) {
            bail!("progress cadence must be at least 1");
        }

        let workload = match cli.command {
            Command::Error {
                count,
                kinds,
                failed_queue,
            } => {
                if kinds.iter().all(|kind| kind.trim().is_empty()) {
                    bail!("at least one exception kind is required");
                }
                Workload::Error {
                    count,
                    kinds,
                    failed_queue,
                }
            }
            Command::Audit {
                batch_size,
                interval_ms,
            } => {
                if batch_size == 0 {
                    bail!("batch size must be at least 1");
                }
                if interval_ms == 0 {
                    bail!("interval must be at least 1ms");
                }
                Workload::Audit {
                    batch_size,
                    interval: Duration::from_millis(interval_ms),
                }
            }
        };

        Ok(Self {
            nats_url: cli
                .nats_url
                .or_else(|| env("NATS_URL"))
                .unwrap_or_else(|| DEFAULT_NATS_URL.into()),
            subject_prefix: cli
                .subject_prefix
                .or_else(|| env("DATAGEN_SUBJECT_PREFIX"))
                .unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.into()),
            capacity,
            payload_padding: cli.payload_padding.unwrap_or(DEFAULT_PAYLOAD_PADDING),
            progress_every: cli.progress_every,
            dry_run: cli.dry_run,
            json: cli.json,
            workload,
        })
    }

    pub fn generator_config(&self) -> Result<GeneratorConfig> {
        let mut config = match &self.workload {
            Workload::Error {
                kinds,
                failed_queue,
                ..
            } => {
                let names: Vec<&str> = kinds
                    .iter()
                    .map(|kind| kind.trim())
                    .filter(|kind| !kind.is_empty())
                    .collect();
                let catalog = ExceptionCatalog::from_names(&names)
                    .context("building exception catalog")?;
                let mut config = GeneratorConfig::error(catalog);
                if let Some(queue) = failed_queue {
                    config.template = config.template.with_failed_queue(queue.clone());
                }
                config
            }
            Workload::Audit { .. } => GeneratorConfig::audit(),
        };
        config.capacity = self.capacity;
        config.payload = Payload::xml(self.payload_padding);
        config.progress_every = self.progress_every;
        Ok(config)
    }

    pub fn run_mode(&self) -> RunMode {
        match &self.workload {
            Workload::Error { count, .. } => RunMode::Finite { count: *count },
            Workload::Audit {
                batch_size,
                interval,
            } => RunMode::Continuous {
                batch_size: *batch_size,
                interval: *interval,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use clap::Parser;
    use datagen_core::ExceptionKind;

    use super::*;

    fn resolve(args: &[&str], vars: &[(&str, &str)]) -> Result<DatagenConfig> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cli = Cli::try_parse_from(args.iter().copied())?;
        DatagenConfig::resolve(cli, |key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let config = resolve(&["datagen", "error"], &[]).unwrap();
        assert_eq!(config.nats_url, DEFAULT_NATS_URL);
        assert_eq!(config.subject_prefix, "datagen");
        assert_eq!(config.capacity, 1_000);
        assert_eq!(config.payload_padding, DEFAULT_PAYLOAD_PADDING);
        assert_eq!(config.run_mode(), RunMode::Finite { count: 300_000 });
    }

    #[test]
    fn flags_override_env() {
        let vars = [
            ("NATS_URL", "nats://bus:4222"),
            ("DATAGEN_CAPACITY", "64"),
            ("DATAGEN_SUBJECT_PREFIX", "load"),
        ];
        let config = resolve(&["datagen", "error"], &vars).unwrap();
        assert_eq!(config.nats_url, "nats://bus:4222");
        assert_eq!(config.capacity, 64);
        assert_eq!(config.subject_prefix, "load");

        let config = resolve(&["datagen", "--capacity", "3", "error"], &vars).unwrap();
        assert_eq!(config.capacity, 3);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(resolve(&["datagen", "--capacity", "0", "error"], &[]).is_err());
        assert!(resolve(&["datagen", "error"], &[("DATAGEN_CAPACITY", "lots")]).is_err());
        assert!(resolve(&["datagen", "audit", "--batch-size", "0"], &[]).is_err());
        assert!(resolve(&["datagen", "audit", "--interval-ms", "0"], &[]).is_err());
        assert!(resolve(&["datagen", "--progress-every", "0", "error"], &[]).is_err());
    }

    #[test]
    fn unknown_kind_fails_when_building_the_generator() {
        let config = resolve(&["datagen", "error", "--kinds", "timeout,segfault"], &[]).unwrap();
        let err = config.generator_config().unwrap_err();
        assert!(format!("{err:#}").contains("segfault"));
    }

    #[test]
    fn error_workload_maps_to_generator_config() {
        let config = resolve(
            &[
                "datagen",
                "--payload-padding",
                "16",
                "error",
                "--kinds",
                "timeout",
                "--failed-queue",
                "billing",
            ],
            &[],
        )
        .unwrap();
        let generator = config.generator_config().unwrap();
        assert_eq!(generator.capacity, 1_000);
        assert_eq!(generator.template.failed_queue.as_deref(), Some("billing"));
        match generator.flavor {
            datagen_core::MessageFlavor::Failed(catalog) => {
                assert_eq!(catalog.kinds(), vec![ExceptionKind::Timeout]);
            }
            other => panic!("unexpected flavor {other:?}"),
        }
        assert!(generator.payload.len() > 16);
    }

    #[test]
    fn audit_workload_is_continuous() {
        let config = resolve(&["datagen", "audit", "--interval-ms", "250"], &[]).unwrap();
        assert_eq!(
            config.run_mode(),
            RunMode::Continuous {
                batch_size: 200,
                interval: Duration::from_millis(250),
            }
        );
    }
}
