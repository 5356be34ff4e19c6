//! # onboarding-events
//!
//! Approval event plumbing for the onboarding sync service.
//!
//! The record store and the message broker fail independently and share no
//! transaction. This crate holds the pieces that keep them consistent
//! enough to operate:
//!
//! - **Event Publishing**: bounded-wait producer with dead-letter routing
//! - **Idempotent Consuming**: in-process dedupe ledger with periodic eviction
//! - **Sync Health**: publish, store and divergence counters with thresholds
//! - **Explicit Retries**: [`RetryPolicy`] objects, never implicit retry loops
//!
//! ## Cargo Features
//!
//! - `kafka`: Enable the Kafka transport and consumer runner (requires librdkafka)
//! - `kafka-static`: Build librdkafka from source (requires cmake)
//!
//! ## Example
//!
//! ```rust,ignore
//! use onboarding_events::{
//!     ApprovalEvent, EventProducer, InMemoryTransport, ProducerSettings, SyncHealthMonitor,
//! };
//! use std::sync::Arc;
//!
//! let health = Arc::new(SyncHealthMonitor::with_defaults());
//! let producer = EventProducer::new(
//!     Arc::new(InMemoryTransport::new()),
//!     health.clone(),
//!     ProducerSettings::default(),
//! );
//!
//! producer.publish(&approval_event).await?;
//! println!("{}", health.health().status);
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod events;
pub mod health;
pub mod idempotence;
pub mod producer;
pub mod retry;
pub mod scheduler;
pub mod transport;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use config::{
    ConsumerSettings, HealthThresholds, KafkaConfig, KafkaConfigBuilder, LedgerSettings,
    ProducerSettings, SyncConfig,
};
pub use consumer::{ConsumeOutcome, Disposition, EventConsumer, EventHandler, HandleOutcome};
pub use error::{EventError, HandlerError, SyncError};
pub use event::{DedupeKey, Event};
pub use events::{ApprovalEvent, DEFAULT_ASSIGNED_ROLE};
pub use health::{BrokerStatus, CounterSnapshot, HealthReport, SyncHealth, SyncHealthMonitor};
pub use idempotence::IdempotencyLedger;
pub use producer::EventProducer;
pub use retry::RetryPolicy;
pub use scheduler::LedgerSweeper;
pub use transport::{DeliveryReceipt, EventTransport, InMemoryTransport, OutboundRecord};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumerRunner, KafkaTransport};
