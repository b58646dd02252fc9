//! Admission control for in-flight dispatches.
//!
//! An [`AdmissionLimiter`] is a counting semaphore with observable counters.
//! Every granted [`AdmissionPermit`] holds one slot until it is dropped, so the
//! release happens exactly once whether the guarded work succeeds, fails or
//! panics.
//!
//! ```
//! use datagen_backpressure::AdmissionLimiter;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), datagen_backpressure::AdmissionError> {
//! let limiter = AdmissionLimiter::new(2)?;
//! let first = limiter.acquire().await?;
//! let _second = limiter.acquire().await?;
//! assert_eq!(limiter.outstanding(), 2);
//! assert!(limiter.try_acquire().is_none());
//! drop(first);
//! assert_eq!(limiter.outstanding(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::error;

/// Default number of concurrently in-flight dispatches.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission capacity must be at least 1")]
    ZeroCapacity,
    #[error("admission capacity {0} exceeds the supported maximum")]
    CapacityTooLarge(usize),
    #[error("admission limiter is closed")]
    Closed,
    #[error("admission limiter overcommitted: {outstanding} outstanding for capacity {capacity}")]
    Overcommitted { outstanding: usize, capacity: usize },
}

#[derive(Debug, Default)]
struct Counters {
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct AdmissionLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl AdmissionLimiter {
    pub fn new(capacity: usize) -> Result<Self, AdmissionError> {
        if capacity == 0 {
            return Err(AdmissionError::ZeroCapacity);
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(AdmissionError::CapacityTooLarge(capacity));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Waits for a free slot. Dropping the returned future before it resolves
    /// leaves the counters untouched.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        self.admit(permit)
    }

    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => self.admit(permit).ok(),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> Result<AdmissionPermit, AdmissionError> {
        let outstanding = self.counters.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        let guard = AdmissionPermit {
            counters: self.counters.clone(),
            _permit: permit,
        };
        if outstanding > self.capacity {
            error!(
                outstanding,
                capacity = self.capacity,
                "admission limiter overcommitted"
            );
            return Err(AdmissionError::Overcommitted {
                outstanding,
                capacity: self.capacity,
            });
        }
        self.counters.peak.fetch_max(outstanding, Ordering::AcqRel);
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("datagen_admission_outstanding").set(outstanding as f64);
        Ok(guard)
    }

    /// Refuses all pending and future acquisitions. Permits already granted
    /// stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously outstanding permits seen so far.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    /// Total permits granted over the limiter's lifetime.
    pub fn admitted(&self) -> u64 {
        self.counters.admitted.load(Ordering::Relaxed)
    }
}

/// One admitted slot. Released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    counters: Arc<Counters>,
    // Dropped after `Drop::drop` runs, so the counter is decremented before
    // the slot becomes visible to the next waiter.
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.counters.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            AdmissionLimiter::new(0).unwrap_err(),
            AdmissionError::ZeroCapacity
        );
    }

    #[tokio::test]
    async fn permits_release_on_drop() {
        let limiter = AdmissionLimiter::new(3).unwrap();
        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.outstanding(), 2);
        drop(a);
        assert_eq!(limiter.outstanding(), 1);
        drop(b);
        assert_eq!(limiter.outstanding(), 0);
        assert_eq!(limiter.peak(), 2);
        assert_eq!(limiter.admitted(), 2);
    }

    #[tokio::test]
    async fn waiter_is_admitted_after_release() {
        let limiter = AdmissionLimiter::new(1).unwrap();
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.outstanding(), 0);
        assert_eq!(limiter.admitted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_leaves_no_phantom_slot() {
        let limiter = AdmissionLimiter::new(1).unwrap();
        let held = limiter.acquire().await.unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(timed_out.is_err());
        assert_eq!(limiter.outstanding(), 1);

        drop(held);
        assert_eq!(limiter.outstanding(), 0);
        let again = limiter.try_acquire().expect("slot free after cancelled wait");
        assert_eq!(limiter.outstanding(), 1);
        drop(again);
    }

    #[tokio::test]
    async fn close_refuses_new_permits_but_keeps_granted_ones() {
        let limiter = AdmissionLimiter::new(2).unwrap();
        let held = limiter.acquire().await.unwrap();
        limiter.close();
        assert!(limiter.is_closed());
        assert_eq!(limiter.acquire().await.unwrap_err(), AdmissionError::Closed);
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.outstanding(), 1);
        drop(held);
        assert_eq!(limiter.outstanding(), 0);
    }
}
