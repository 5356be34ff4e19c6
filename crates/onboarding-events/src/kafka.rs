//! Kafka transport and consumer runner.

use crate::config::{KafkaConfig, ProducerSettings};
use crate::consumer::{EventConsumer, EventHandler};
use crate::error::EventError;
use crate::event::Event;
use crate::health::BrokerStatus;
use crate::transport::{DeliveryReceipt, EventTransport, OutboundRecord};

use async_trait::async_trait;
use futures_util::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Message, OwnedHeaders, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// [`EventTransport`] backed by an idempotent `acks=all` Kafka producer.
pub struct KafkaTransport {
    producer: FutureProducer,
    bootstrap_servers: String,
    delivery_timeout: Duration,
}

impl KafkaTransport {
    pub fn new(config: &KafkaConfig, settings: &ProducerSettings) -> Result<Self, EventError> {
        let producer: FutureProducer = config
            .client_config()
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set(
                "message.timeout.ms",
                settings.delivery_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| EventError::ConnectionFailed {
                broker: config.bootstrap_servers.clone(),
                cause: e.to_string(),
            })?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            bootstrap_servers: config.bootstrap_servers.clone(),
            delivery_timeout: settings.delivery_timeout,
        })
    }

    /// Broker connectivity, from a metadata request.
    pub async fn broker_status(&self) -> Result<BrokerStatus, EventError> {
        let producer = self.producer.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|m| (m.brokers().len(), m.topics().len()))
        })
        .await
        .map_err(|e| EventError::ConnectionFailed {
            broker: self.bootstrap_servers.clone(),
            cause: e.to_string(),
        })?;

        let (brokers, topics) = metadata.map_err(|e| EventError::ConnectionFailed {
            broker: self.bootstrap_servers.clone(),
            cause: e.to_string(),
        })?;

        Ok(BrokerStatus {
            connected: true,
            brokers,
            topics,
        })
    }
}

#[async_trait]
impl EventTransport for KafkaTransport {
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryReceipt, EventError> {
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key,
                    value: Some(value),
                })
            });

        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload)
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(future_record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| EventError::PublishFailed {
                topic: record.topic.clone(),
                cause: err.to_string(),
            })?;

        Ok(DeliveryReceipt { partition, offset })
    }
}

/// Feeds one Kafka consumer-group member into an [`EventConsumer`].
///
/// Offsets are committed manually and only after the event is
/// acknowledged. A critical sync failure stops the runner without
/// committing.
pub struct KafkaConsumerRunner<E: Event, H: EventHandler<E>> {
    consumer: StreamConsumer,
    events: Arc<EventConsumer<E, H>>,
    instance: usize,
}

impl<E: Event, H: EventHandler<E>> KafkaConsumerRunner<E, H> {
    pub fn new(
        config: &KafkaConfig,
        events: Arc<EventConsumer<E, H>>,
        instance: usize,
    ) -> Result<Self, EventError> {
        let consumer: StreamConsumer = config
            .client_config()
            .set("client.id", format!("{}-{instance}", config.client_id))
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .create()
            .map_err(|e| EventError::ConnectionFailed {
                broker: config.bootstrap_servers.clone(),
                cause: e.to_string(),
            })?;

        consumer
            .subscribe(&[E::TOPIC])
            .map_err(|e| EventError::ConsumeFailed {
                topic: E::TOPIC.to_string(),
                cause: e.to_string(),
            })?;

        info!(
            topic = %E::TOPIC,
            consumer_group = %config.consumer_group,
            instance,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            events,
            instance,
        })
    }

    /// Consume until `cancel` fires or a critical sync failure occurs.
    #[instrument(skip_all, fields(topic = %E::TOPIC, instance = self.instance))]
    pub async fn run(self, cancel: CancellationToken) -> Result<(), EventError> {
        info!("Starting consumer loop");
        let mut stream = self.consumer.stream();

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message.detach(),
                Some(Err(e)) => {
                    error!(error = %e, "Error receiving message");
                    continue;
                }
                None => break,
            };

            let key = message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default();
            let payload = message.payload().unwrap_or(&[]);

            match self.events.deliver_payload(&key, payload).await {
                Ok(outcome) => {
                    debug!(?outcome, offset = message.offset(), "Message acknowledged");
                    if let Err(e) = self.commit(&message) {
                        warn!(error = %e, "Offset commit failed, message may be redelivered");
                    }
                }
                Err(e) if e.is_critical() => {
                    error!(error = %e, "Critical sync failure, stopping consumer");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Message not acknowledged");
                }
            }
        }

        info!("Consumer loop ended");
        Ok(())
    }

    fn commit(&self, message: &OwnedMessage) -> Result<(), EventError> {
        let consume_failed = |e: rdkafka::error::KafkaError| EventError::ConsumeFailed {
            topic: message.topic().to_string(),
            cause: e.to_string(),
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset() + 1),
        )
        .map_err(consume_failed)?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(consume_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> KafkaConfig {
        KafkaConfig::builder()
            .bootstrap_servers("localhost:9092")
            .client_id("test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_transport_creation_is_lazy() {
        // Creating the client does not contact the broker.
        let transport = KafkaTransport::new(&local_config(), &ProducerSettings::default());
        assert!(transport.is_ok());
    }
}
