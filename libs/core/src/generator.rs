//! The production loop: fans message attempts out under the admission limiter
//! and drives finite or continuous runs through `Idle → Running → Stopping →
//! Stopped`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use datagen_backpressure::{AdmissionError, AdmissionLimiter, AdmissionPermit};
use datagen_bus::{Dispatcher, OutgoingMessage};
use datagen_telemetry::{TelemetryLabels, record_counter, record_histogram};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::envelope::{self, EnvelopeOverrides, EnvelopeStyle, EnvelopeTemplate};
use crate::error::GeneratorError;
use crate::exceptions::ExceptionCatalog;
use crate::payload::Payload;
use crate::progress::{
    DEFAULT_BATCH_CADENCE, DEFAULT_MESSAGE_CADENCE, ProgressReporter, ProgressUnit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exactly `count` attempts, then stop.
    Finite { count: u64 },
    /// `batch_size` messages every `interval` until stopped.
    Continuous { batch_size: usize, interval: Duration },
}

impl RunMode {
    fn validate(&self) -> Result<(), GeneratorError> {
        match *self {
            RunMode::Finite { .. } => Ok(()),
            RunMode::Continuous { batch_size: 0, .. } => Err(GeneratorError::InvalidConfig(
                "batch size must be at least 1".into(),
            )),
            RunMode::Continuous { interval, .. } if interval.is_zero() => Err(
                GeneratorError::InvalidConfig("tick interval must be non-zero".into()),
            ),
            RunMode::Continuous { .. } => Ok(()),
        }
    }

    fn progress_unit(&self) -> ProgressUnit {
        match self {
            RunMode::Finite { .. } => ProgressUnit::Message,
            RunMode::Continuous { .. } => ProgressUnit::Batch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Which records the generator simulates.
#[derive(Debug, Clone)]
pub enum MessageFlavor {
    /// Processed messages with back-dated processing timestamps.
    Audit,
    /// Failed messages, exception context picked round-robin by ordinal.
    Failed(Arc<ExceptionCatalog>),
}

impl MessageFlavor {
    fn label(&self) -> &'static str {
        match self {
            MessageFlavor::Audit => "processed",
            MessageFlavor::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Short name used in logs and metric labels.
    pub name: String,
    pub capacity: usize,
    pub template: EnvelopeTemplate,
    pub flavor: MessageFlavor,
    pub payload: Payload,
    /// Progress cadence; defaults to 1,000 messages (finite) or 10 batches
    /// (continuous).
    pub progress_every: Option<u64>,
}

impl GeneratorConfig {
    pub fn error(catalog: ExceptionCatalog) -> Self {
        Self {
            name: "error".into(),
            capacity: datagen_backpressure::DEFAULT_CAPACITY,
            template: EnvelopeTemplate::error_generator(),
            flavor: MessageFlavor::Failed(Arc::new(catalog)),
            payload: Payload::default(),
            progress_every: None,
        }
    }

    pub fn audit() -> Self {
        Self {
            name: "audit".into(),
            capacity: datagen_backpressure::DEFAULT_CAPACITY,
            template: EnvelopeTemplate::audit_generator(),
            flavor: MessageFlavor::Audit,
            payload: Payload::default(),
            progress_every: None,
        }
    }
}

/// Counts reported once the run is `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub mode: RunMode,
    pub attempted: u64,
    pub dispatched: u64,
    pub failed: u64,
    /// Finite-mode ordinals never attempted because a stop arrived first.
    pub skipped: u64,
    pub batches: u64,
    pub progress_notices: u64,
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct RunCounters {
    attempted: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Everything a spawned attempt needs, shared by reference count.
struct AttemptContext {
    dispatcher: Arc<dyn Dispatcher>,
    counters: RunCounters,
    progress: ProgressReporter,
    labels: TelemetryLabels,
}

impl AttemptContext {
    #[instrument(
        name = "datagen.dispatch",
        skip(self, message),
        fields(message_id = %message.message_id, destination = %message.destination)
    )]
    async fn send(&self, ordinal: u64, message: OutgoingMessage) {
        self.counters.attempted.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(message).await;
        record_histogram(
            "datagen_dispatch_seconds",
            started.elapsed().as_secs_f64(),
            &self.labels,
        );
        match outcome {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                record_counter("datagen_messages_dispatched", 1, &self.labels);
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                record_counter("datagen_dispatch_failures", 1, &self.labels);
                warn!(generator = %self.labels.generator, ordinal, error = %err, "dispatch failed");
            }
        }
    }

    fn reap(&self, outcome: Result<(), JoinError>) {
        if let Err(err) = outcome {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(generator = %self.labels.generator, error = %err, "dispatch task aborted");
        }
    }
}

/// Requests a cooperative stop. Cloneable; usable from signal handlers.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<watch::Sender<bool>>,
    phase: Arc<watch::Sender<RunPhase>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.send_replace(true);
        self.phase.send_if_modified(|phase| {
            if *phase == RunPhase::Running {
                *phase = RunPhase::Stopping;
                true
            } else {
                false
            }
        });
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

pub struct Generator {
    limiter: AdmissionLimiter,
    template: EnvelopeTemplate,
    flavor: MessageFlavor,
    payload: Payload,
    progress_every: Option<u64>,
    clock: Arc<dyn Clock>,
    name: String,
    dispatcher: Arc<dyn Dispatcher>,
    stop: Arc<watch::Sender<bool>>,
    phase: Arc<watch::Sender<RunPhase>>,
}

impl Generator {
    pub fn new(
        config: GeneratorConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, GeneratorError> {
        if config.progress_every == Some(0) {
            return Err(GeneratorError::InvalidConfig(
                "progress cadence must be at least 1".into(),
            ));
        }
        let limiter = AdmissionLimiter::new(config.capacity)?;
        let (stop, _) = watch::channel(false);
        let (phase, _) = watch::channel(RunPhase::Idle);
        Ok(Self {
            limiter,
            template: config.template,
            flavor: config.flavor,
            payload: config.payload,
            progress_every: config.progress_every,
            clock: Arc::new(SystemClock),
            name: config.name,
            dispatcher,
            stop: Arc::new(stop),
            phase: Arc::new(phase),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
            phase: self.phase.clone(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    /// Runs to completion. A generator runs once; afterwards it stays
    /// `Stopped` and its limiter is closed.
    #[instrument(name = "datagen.run", skip(self), fields(generator = %self.name))]
    pub async fn run(&self, mode: RunMode) -> Result<RunSummary, GeneratorError> {
        mode.validate()?;
        let started = self.phase.send_if_modified(|phase| {
            if *phase == RunPhase::Idle {
                *phase = RunPhase::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(GeneratorError::InvalidConfig(
                "generator has already been started".into(),
            ));
        }

        let unit = mode.progress_unit();
        let every = self.progress_every.unwrap_or(match unit {
            ProgressUnit::Message => DEFAULT_MESSAGE_CADENCE,
            ProgressUnit::Batch => DEFAULT_BATCH_CADENCE,
        });
        let ctx = Arc::new(AttemptContext {
            dispatcher: self.dispatcher.clone(),
            counters: RunCounters::default(),
            progress: ProgressReporter::new(self.name.clone(), unit, every),
            labels: TelemetryLabels::new(self.name.clone())
                .with_destination(self.template.destination.clone())
                .with_kind(self.flavor.label()),
        });

        info!(
            generator = %self.name,
            ?mode,
            capacity = self.limiter.capacity(),
            destination = %self.template.destination,
            payload_bytes = self.payload.len(),
            "starting message generation"
        );
        let clock_start = Instant::now();
        let mut stop = self.stop.subscribe();

        let outcome = match mode {
            RunMode::Finite { count } => self.run_finite(count, &ctx, &mut stop).await,
            RunMode::Continuous {
                batch_size,
                interval,
            } => {
                self.run_continuous(batch_size, interval, &ctx, &mut stop)
                    .await
            }
        };

        self.phase.send_if_modified(|phase| {
            if *phase == RunPhase::Running {
                *phase = RunPhase::Stopping;
                true
            } else {
                false
            }
        });
        if let Err(err) = self.dispatcher.flush().await {
            warn!(generator = %self.name, error = %err, "flushing dispatcher failed");
        }
        self.limiter.close();
        self.phase.send_replace(RunPhase::Stopped);

        let (skipped, batches) = outcome?;
        let summary = RunSummary {
            mode,
            attempted: ctx.counters.attempted.load(Ordering::Relaxed),
            dispatched: ctx.counters.dispatched.load(Ordering::Relaxed),
            failed: ctx.counters.failed.load(Ordering::Relaxed),
            skipped,
            batches,
            progress_notices: ctx.progress.notices(),
            peak_in_flight: self.limiter.peak(),
            elapsed: clock_start.elapsed(),
        };
        info!(
            generator = %self.name,
            attempted = summary.attempted,
            dispatched = summary.dispatched,
            failed = summary.failed,
            skipped = summary.skipped,
            batches = summary.batches,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "stopped message generation"
        );
        Ok(summary)
    }

    /// Returns `(skipped, batches)`.
    async fn run_finite(
        &self,
        count: u64,
        ctx: &Arc<AttemptContext>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(u64, u64), GeneratorError> {
        let mut tasks = JoinSet::new();
        let mut skipped = 0;
        let mut fatal = None;

        for ordinal in 0..count {
            let message = self.prepare(ordinal);
            let permit = tokio::select! {
                biased;
                _ = stop_requested(stop) => None,
                permit = self.limiter.acquire() => Some(permit),
            };
            let permit = match permit {
                Some(Ok(permit)) => permit,
                Some(Err(err)) => {
                    fatal = Some(err);
                    skipped = count - ordinal;
                    break;
                }
                None => {
                    skipped = count - ordinal;
                    info!(generator = %self.name, skipped, "stop requested, draining in-flight attempts");
                    break;
                }
            };
            spawn_attempt(&mut tasks, ctx, ordinal, message, permit, true);
            while let Some(outcome) = tasks.try_join_next() {
                ctx.reap(outcome);
            }
        }

        while let Some(outcome) = tasks.join_next().await {
            ctx.reap(outcome);
        }
        match fatal {
            Some(err) => Err(err.into()),
            None => Ok((skipped, 0)),
        }
    }

    async fn run_continuous(
        &self,
        batch_size: usize,
        interval: Duration,
        ctx: &Arc<AttemptContext>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(u64, u64), GeneratorError> {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ordinal = 0u64;
        let mut batches = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(stop) => break,
                _ = ticker.tick() => {}
            }

            batches += 1;
            self.run_batch(batches, batch_size, &mut ordinal, ctx).await?;
            ctx.progress.on_progress(
                batches,
                ctx.counters.attempted.load(Ordering::Relaxed),
            );
        }
        Ok((0, batches))
    }

    /// Admits and sends one batch, then waits for all of it.
    #[instrument(name = "datagen.batch", skip(self, ordinal, ctx))]
    async fn run_batch(
        &self,
        batch: u64,
        batch_size: usize,
        ordinal: &mut u64,
        ctx: &Arc<AttemptContext>,
    ) -> Result<(), AdmissionError> {
        let mut tasks = JoinSet::new();
        let mut fatal = None;
        for _ in 0..batch_size {
            let message = self.prepare(*ordinal);
            match self.limiter.acquire().await {
                Ok(permit) => spawn_attempt(&mut tasks, ctx, *ordinal, message, permit, false),
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            }
            *ordinal += 1;
        }
        while let Some(outcome) = tasks.join_next().await {
            ctx.reap(outcome);
        }
        fatal.map_or(Ok(()), Err)
    }

    /// Steps one and two of an attempt: pick the failure context and build
    /// the envelope.
    fn prepare(&self, ordinal: u64) -> OutgoingMessage {
        let style = match &self.flavor {
            MessageFlavor::Audit => EnvelopeStyle::Audit,
            MessageFlavor::Failed(catalog) => EnvelopeStyle::Failed(catalog.select(ordinal).clone()),
        };
        let overrides = EnvelopeOverrides::fresh(self.clock.now(), style);
        envelope::build(&self.template, &overrides).into_outgoing(self.payload.bytes())
    }
}

fn spawn_attempt(
    tasks: &mut JoinSet<()>,
    ctx: &Arc<AttemptContext>,
    ordinal: u64,
    message: OutgoingMessage,
    permit: AdmissionPermit,
    report: bool,
) {
    let ctx = ctx.clone();
    tasks.spawn(
        async move {
            ctx.send(ordinal, message).await;
            drop(permit);
            if report {
                ctx.progress
                    .on_progress(ordinal, ctx.counters.attempted.load(Ordering::Relaxed));
            }
        }
        .in_current_span(),
    );
}

/// Resolves once a stop has been requested; never resolves if the sender is
/// gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}
