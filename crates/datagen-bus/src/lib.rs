//! Transport seam for the generators: one-way dispatch of a wire message.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error(transparent)]
    Publish(#[from] anyhow::Error),
    #[error("dispatch of message {message_id} to {destination} failed: {reason}")]
    Rejected {
        message_id: String,
        destination: String,
        reason: String,
    },
}

/// A fully rendered message: routing tag, header map and shared body.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub destination: String,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, message: OutgoingMessage) -> Result<(), BusError>;

    /// Pushes buffered messages to the transport. Called once when a run stops.
    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Publishes to `{subject_prefix}.{destination}` with the envelope carried as
/// NATS headers.
pub struct NatsDispatcher {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsDispatcher {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn subject_for(&self, destination: &str) -> String {
        let prefix = self.subject_prefix.trim_end_matches('.');
        if prefix.is_empty() {
            destination.to_string()
        } else {
            format!("{prefix}.{destination}")
        }
    }
}

/// NATS header values are line oriented; multi-line values (stack traces)
/// travel with escaped line breaks.
pub fn escape_header_value(value: &str) -> String {
    value.replace('\r', "\\r").replace('\n', "\\n")
}

#[async_trait]
impl Dispatcher for NatsDispatcher {
    async fn dispatch(&self, message: OutgoingMessage) -> Result<(), BusError> {
        let subject = self.subject_for(&message.destination);
        let mut headers = async_nats::HeaderMap::new();
        for (name, value) in &message.headers {
            headers.insert(name.as_str(), escape_header_value(value).as_str());
        }
        self.client
            .publish_with_headers(subject, headers, message.body)
            .await
            .map_err(|err| BusError::Publish(anyhow::Error::new(err)))
    }

    async fn flush(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|err| BusError::Publish(anyhow::Error::new(err)))
    }
}

/// Records dispatched messages in memory. Can inject failures and latency.
#[derive(Clone, Default)]
pub struct InMemoryDispatcher {
    published: Arc<Mutex<Vec<OutgoingMessage>>>,
    attempts: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    fail_every: Option<u64>,
    latency: Option<Duration>,
}

impl InMemoryDispatcher {
    /// Fails every `k`-th attempt (1-based), i.e. attempts `k`, `2k`, ...
    pub fn failing_every(mut self, k: u64) -> Self {
        self.fail_every = (k > 0).then_some(k);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn take_published(&self) -> Vec<OutgoingMessage> {
        let mut guard = self.published.lock().await;
        std::mem::take(&mut *guard)
    }

    pub async fn published_len(&self) -> usize {
        self.published.lock().await.len()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of `dispatch` calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dispatcher for InMemoryDispatcher {
    async fn dispatch(&self, message: OutgoingMessage) -> Result<(), BusError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_every.is_some_and(|k| attempt % k == 0) {
            return Err(BusError::Rejected {
                message_id: message.message_id,
                destination: message.destination,
                reason: format!("injected failure on attempt {attempt}"),
            });
        }
        self.published.lock().await.push(message);
        Ok(())
    }
}

/// Dry-run sink: traces and counts instead of sending anywhere.
#[derive(Clone, Default)]
pub struct LoggingDispatcher {
    dispatched: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl LoggingDispatcher {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dispatcher for LoggingDispatcher {
    async fn dispatch(&self, message: OutgoingMessage) -> Result<(), BusError> {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(message.body.len() as u64, Ordering::Relaxed);
        debug!(
            message_id = %message.message_id,
            destination = %message.destination,
            headers = message.headers.len(),
            body_len = message.body.len(),
            "dry-run dispatch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_line_breaks() {
        assert_eq!(
            escape_header_value("System.TimeoutException: x\r\n   at a\n   at b"),
            "System.TimeoutException: x\\r\\n   at a\\n   at b"
        );
        assert_eq!(escape_header_value("plain"), "plain");
    }

    #[tokio::test]
    async fn logging_dispatcher_counts() {
        let sink = LoggingDispatcher::default();
        sink.dispatch(OutgoingMessage {
            message_id: "m1".into(),
            destination: "audit".into(),
            headers: BTreeMap::new(),
            body: Bytes::from_static(b"<x/>"),
        })
        .await
        .unwrap();
        assert_eq!(sink.dispatched(), 1);
        assert_eq!(sink.bytes(), 4);
    }
}
