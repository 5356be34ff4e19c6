//! Event producer with bounded delivery waits and dead-letter routing.

use crate::config::ProducerSettings;
use crate::error::{EventError, SyncError};
use crate::event::Event;
use crate::health::SyncHealthMonitor;
use crate::retry::RetryPolicy;
use crate::transport::{
    DeliveryReceipt, EventTransport, OutboundRecord, HEADER_FAILURE_CAUSE, HEADER_ORIGINAL_TOPIC,
};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Publishes events through an [`EventTransport`].
///
/// Every send is a single attempt wrapped in a bounded wait. A send that is
/// not confirmed in time counts as failed; delivery is never assumed.
pub struct EventProducer {
    transport: Arc<dyn EventTransport>,
    health: Arc<SyncHealthMonitor>,
    delivery_timeout: Duration,
}

impl EventProducer {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        health: Arc<SyncHealthMonitor>,
        settings: ProducerSettings,
    ) -> Self {
        Self {
            transport,
            health,
            delivery_timeout: settings.delivery_timeout,
        }
    }

    /// The monitor this producer records failures into.
    pub fn health(&self) -> &Arc<SyncHealthMonitor> {
        &self.health
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Publish `event` to its topic once.
    ///
    /// On failure a publish error is recorded and
    /// [`EventError::PublishFailed`] or [`EventError::PublishTimeout`] is
    /// returned.
    #[instrument(skip(self, event), fields(event_type = %E::EVENT_TYPE, topic = %E::TOPIC))]
    pub async fn publish<E: Event>(&self, event: &E) -> Result<DeliveryReceipt, EventError> {
        let payload = serde_json::to_vec(event).map_err(|e| EventError::SerializationFailed {
            event_type: E::EVENT_TYPE.to_string(),
            cause: e.to_string(),
        })?;

        let record = OutboundRecord::new(E::TOPIC, event.partition_key(), payload);
        let receipt = self.send_bounded(record).await?;

        debug!(
            partition = receipt.partition,
            offset = receipt.offset,
            "Event published"
        );
        Ok(receipt)
    }

    /// Publish with retries, for callers that own their retry budget.
    ///
    /// Every failed attempt is recorded as a publish error.
    pub async fn publish_with_retry<E: Event>(
        &self,
        event: &E,
        policy: &RetryPolicy,
    ) -> Result<DeliveryReceipt, EventError> {
        policy
            .execute(move |_| self.publish(event), EventError::is_transient)
            .await
    }

    /// Route `event` to its dead-letter topic.
    ///
    /// Best effort: one attempt, never retried. Whatever the send outcome,
    /// exactly one divergence error is recorded; the returned error is the
    /// critical trip from that record.
    #[instrument(skip(self, event), fields(event_type = %E::EVENT_TYPE))]
    pub async fn publish_to_dead_letter<E: Event>(
        &self,
        event: &E,
        cause: &str,
    ) -> Result<(), SyncError> {
        let payload = serde_json::to_vec(event).unwrap_or_else(|e| {
            error!(error = %e, "Dead-letter payload could not be serialized, sending empty body");
            Vec::new()
        });

        self.dead_letter_raw(
            E::TOPIC,
            E::DEAD_LETTER_TOPIC,
            &event.partition_key(),
            payload,
            cause,
        )
        .await
    }

    /// Route an already-serialized payload to `dead_letter_topic`.
    ///
    /// Used for messages that could not be decoded into an event. Same
    /// delivery and divergence accounting as
    /// [`publish_to_dead_letter`](Self::publish_to_dead_letter).
    pub async fn dead_letter_raw(
        &self,
        original_topic: &str,
        dead_letter_topic: &str,
        key: &str,
        payload: Vec<u8>,
        cause: &str,
    ) -> Result<(), SyncError> {
        let record = OutboundRecord::new(dead_letter_topic, key, payload)
            .with_header(HEADER_ORIGINAL_TOPIC, original_topic)
            .with_header(HEADER_FAILURE_CAUSE, cause);

        match self.send_bounded(record).await {
            Ok(receipt) => warn!(
                topic = dead_letter_topic,
                key,
                cause,
                offset = receipt.offset,
                "Record routed to dead-letter topic"
            ),
            Err(e) => error!(
                topic = dead_letter_topic,
                key,
                cause,
                error = %e,
                "Dead-letter delivery failed, record dropped"
            ),
        }

        self.health.record_divergence_error(
            &format!("Record for key {key} dead-lettered from {original_topic}"),
            Some(cause),
        )
    }

    async fn send_bounded(&self, record: OutboundRecord) -> Result<DeliveryReceipt, EventError> {
        let topic = record.topic.clone();

        match tokio::time::timeout(self.delivery_timeout, self.transport.send(record)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => {
                self.health.record_publish_error();
                Err(e)
            }
            Err(_) => {
                self.health.record_publish_error();
                Err(EventError::PublishTimeout {
                    topic,
                    timeout_ms: self.delivery_timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthThresholds;
    use crate::events::{ApprovalEvent, DEFAULT_ASSIGNED_ROLE};
    use crate::transport::InMemoryTransport;

    fn event() -> ApprovalEvent {
        ApprovalEvent {
            correlation_id: "c-1".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: "jane@x.com".to_string(),
            assigned_role: DEFAULT_ASSIGNED_ROLE.to_string(),
        }
    }

    fn producer() -> (EventProducer, Arc<InMemoryTransport>, Arc<SyncHealthMonitor>) {
        let transport = Arc::new(InMemoryTransport::new());
        let health = Arc::new(SyncHealthMonitor::with_defaults());
        let producer = EventProducer::new(
            transport.clone(),
            health.clone(),
            ProducerSettings::default(),
        );
        (producer, transport, health)
    }

    #[tokio::test]
    async fn test_publish_sends_json_keyed_by_email() {
        let (producer, transport, health) = producer();

        producer.publish(&event()).await.unwrap();

        let sent = transport.sent_to(ApprovalEvent::TOPIC).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, "jane@x.com");
        let body: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(body["correlationId"], "c-1");
        assert_eq!(health.health().publish_errors.count, 0);
    }

    #[tokio::test]
    async fn test_publish_failure_records_publish_error() {
        let (producer, transport, health) = producer();
        transport.fail_next(1);

        let err = producer.publish(&event()).await.unwrap_err();

        assert!(matches!(err, EventError::PublishFailed { .. }));
        assert_eq!(health.health().publish_errors.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_delivery_times_out() {
        let (producer, transport, health) = producer();
        transport.set_stalled(true);

        let err = producer.publish(&event()).await.unwrap_err();

        match err {
            EventError::PublishTimeout { topic, timeout_ms } => {
                assert_eq!(topic, "registration.approved");
                assert_eq!(timeout_ms, 5000);
            }
            other => panic!("Expected PublishTimeout, got {other:?}"),
        }
        assert_eq!(health.health().publish_errors.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_with_retry_recovers() {
        let (producer, transport, health) = producer();
        transport.fail_next(2);

        producer
            .publish_with_retry(&event(), &RetryPolicy::standard())
            .await
            .unwrap();

        assert_eq!(transport.sent().await.len(), 1);
        assert_eq!(health.health().publish_errors.count, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_carries_headers_and_counts_one_divergence() {
        let (producer, transport, health) = producer();

        producer
            .publish_to_dead_letter(&event(), "no matching record")
            .await
            .unwrap();

        let sent = transport.sent_to(ApprovalEvent::DEAD_LETTER_TOPIC).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].header(HEADER_ORIGINAL_TOPIC),
            Some("registration.approved")
        );
        assert_eq!(sent[0].header(HEADER_FAILURE_CAUSE), Some("no matching record"));

        let report = health.health();
        assert_eq!(report.divergence_errors.count, 1);
        assert_eq!(report.publish_errors.count, 0);
    }

    #[tokio::test]
    async fn test_failed_dead_letter_is_not_retried() {
        let (producer, transport, health) = producer();
        transport.fail_next(1);

        producer
            .publish_to_dead_letter(&event(), "boom")
            .await
            .unwrap();

        assert!(transport.sent().await.is_empty());
        let report = health.health();
        assert_eq!(report.publish_errors.count, 1);
        assert_eq!(report.divergence_errors.count, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_propagates_critical_trip() {
        let transport = Arc::new(InMemoryTransport::new());
        let health = Arc::new(SyncHealthMonitor::new(HealthThresholds {
            critical: 2,
            ..HealthThresholds::default()
        }));
        let producer = EventProducer::new(transport, health, ProducerSettings::default());

        assert!(producer.publish_to_dead_letter(&event(), "a").await.is_ok());
        let err = producer
            .publish_to_dead_letter(&event(), "b")
            .await
            .unwrap_err();
        assert!(err.is_critical());
    }

    #[tokio::test]
    async fn test_dead_letter_raw_keeps_payload() {
        let (producer, transport, _) = producer();

        producer
            .dead_letter_raw(
                ApprovalEvent::TOPIC,
                ApprovalEvent::DEAD_LETTER_TOPIC,
                "k",
                b"not json".to_vec(),
                "undecodable",
            )
            .await
            .unwrap();

        let sent = transport.sent_to(ApprovalEvent::DEAD_LETTER_TOPIC).await;
        assert_eq!(sent[0].payload, b"not json");
    }
}
