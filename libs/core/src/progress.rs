use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Default notice cadence for finite runs, in messages.
pub const DEFAULT_MESSAGE_CADENCE: u64 = 1_000;
/// Default notice cadence for continuous runs, in batches.
pub const DEFAULT_BATCH_CADENCE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    Message,
    Batch,
}

impl ProgressUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressUnit::Message => "message",
            ProgressUnit::Batch => "batch",
        }
    }
}

/// Emits a notice whenever the ordinal lands on the cadence. Only touches an
/// atomic and the subscriber, so it is safe to call from every dispatch task.
#[derive(Debug)]
pub struct ProgressReporter {
    generator: String,
    unit: ProgressUnit,
    every: u64,
    notices: AtomicU64,
}

impl ProgressReporter {
    pub fn new(generator: impl Into<String>, unit: ProgressUnit, every: u64) -> Self {
        Self {
            generator: generator.into(),
            unit,
            every,
            notices: AtomicU64::new(0),
        }
    }

    pub fn on_progress(&self, ordinal: u64, total_so_far: u64) -> bool {
        if self.every == 0 || ordinal % self.every != 0 {
            return false;
        }
        self.notices.fetch_add(1, Ordering::Relaxed);
        info!(
            generator = %self.generator,
            unit = self.unit.as_str(),
            ordinal,
            total = total_so_far,
            "sent {total_so_far} messages"
        );
        true
    }

    pub fn notices(&self) -> u64 {
        self.notices.load(Ordering::Relaxed)
    }

    pub fn every(&self) -> u64 {
        self.every
    }

    pub fn unit(&self) -> ProgressUnit {
        self.unit
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn fires_on_cadence_only() {
        let reporter = ProgressReporter::new("error", ProgressUnit::Message, 1000);
        let fired: Vec<u64> = (0..2500)
            .filter(|ordinal| reporter.on_progress(*ordinal, ordinal + 1))
            .collect();
        assert_eq!(fired, vec![0, 1000, 2000]);
        assert_eq!(reporter.notices(), 3);
    }

    #[test]
    fn zero_cadence_is_silent() {
        let reporter = ProgressReporter::new("audit", ProgressUnit::Batch, 0);
        assert!(!reporter.on_progress(0, 0));
        assert!(!reporter.on_progress(10, 2000));
        assert_eq!(reporter.notices(), 0);
    }

    #[traced_test]
    #[test]
    fn notice_carries_totals() {
        let reporter = ProgressReporter::new("audit", ProgressUnit::Batch, 10);
        assert!(!reporter.on_progress(9, 1800));
        assert!(reporter.on_progress(10, 2000));
        assert!(logs_contain("sent 2000 messages"));
        assert!(logs_contain("batch"));
    }
}
