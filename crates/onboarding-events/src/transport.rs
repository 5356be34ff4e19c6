//! Broker transport abstraction.
//!
//! The producer talks to the broker only through [`EventTransport`]. The
//! Kafka implementation lives in [`crate::kafka`] behind the `kafka`
//! feature; [`InMemoryTransport`] keeps sent records in memory and can
//! inject failures for tests.

use crate::error::EventError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Header carrying the topic a dead-lettered record was meant for.
pub const HEADER_ORIGINAL_TOPIC: &str = "x-original-topic";

/// Header carrying the reason a record was dead-lettered.
pub const HEADER_FAILURE_CAUSE: &str = "x-failure-cause";

/// A serialized record ready to be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Broker acknowledgement of a delivered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// Sends records to the broker.
///
/// Implementations report broker-side failures as
/// [`EventError::PublishFailed`]. Bounding the wait is the producer's job.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryReceipt, EventError>;
}

/// In-process transport.
///
/// Every accepted record is kept and, when built with [`with_tap`], also
/// forwarded on a channel.
///
/// [`with_tap`]: InMemoryTransport::with_tap
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    sent: Mutex<Vec<OutboundRecord>>,
    failures_remaining: AtomicU32,
    stalled: AtomicBool,
    next_offset: AtomicI64,
    tap: Option<mpsc::UnboundedSender<OutboundRecord>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose accepted records are also pushed to the returned receiver.
    #[must_use]
    pub fn with_tap() -> (Self, mpsc::UnboundedReceiver<OutboundRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tap: Some(tx),
            ..Self::default()
        };
        (transport, rx)
    }

    /// Reject the next `n` sends with a broker error.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// While stalled, sends never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// All records accepted so far, in send order.
    pub async fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.lock().await.clone()
    }

    /// Records accepted for one topic.
    pub async fn sent_to(&self, topic: &str) -> Vec<OutboundRecord> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryReceipt, EventError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.take_failure() {
            return Err(EventError::PublishFailed {
                topic: record.topic,
                cause: "broker unavailable".to_string(),
            });
        }

        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        debug!(topic = %record.topic, key = %record.key, offset, "Record accepted");

        if let Some(tap) = &self.tap {
            // A closed tap only means nobody is listening anymore.
            let _ = tap.send(record.clone());
        }
        self.sent.lock().await.push(record);

        Ok(DeliveryReceipt {
            partition: 0,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(topic: &str) -> OutboundRecord {
        OutboundRecord::new(topic, "jane@x.com", b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_records_are_kept_in_order() {
        let transport = InMemoryTransport::new();
        let first = transport.send(record("a")).await.unwrap();
        let second = transport.send(record("b")).await.unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(transport.sent().await.len(), 2);
        assert_eq!(transport.sent_to("b").await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_rejects_exactly_n_sends() {
        let transport = InMemoryTransport::new();
        transport.fail_next(2);

        assert!(matches!(
            transport.send(record("a")).await,
            Err(EventError::PublishFailed { .. })
        ));
        assert!(transport.send(record("a")).await.is_err());
        assert!(transport.send(record("a")).await.is_ok());
        assert_eq!(transport.sent().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_never_completes() {
        let transport = InMemoryTransport::new();
        transport.set_stalled(true);

        let result = tokio::time::timeout(Duration::from_secs(5), transport.send(record("a"))).await;
        assert!(result.is_err());
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_tap_receives_accepted_records() {
        let (transport, mut rx) = InMemoryTransport::with_tap();
        transport
            .send(record("a").with_header(HEADER_FAILURE_CAUSE, "boom"))
            .await
            .unwrap();

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.topic, "a");
        assert_eq!(forwarded.header(HEADER_FAILURE_CAUSE), Some("boom"));
        assert_eq!(forwarded.header(HEADER_ORIGINAL_TOPIC), None);
    }
}
