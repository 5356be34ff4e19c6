//! Error types for the onboarding-events crate.

use thiserror::Error;

/// Errors raised when the broker and the record store disagree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The two stores disagree about an event or record.
    #[error("Sync divergence: {message}")]
    Divergence { message: String },

    /// The divergence counter reached the critical threshold.
    ///
    /// Never retried: automated recovery must stop here.
    #[error("Critical synchronization failure after {count} divergence errors: {message}")]
    CriticalSyncFailure {
        count: u32,
        message: String,
        cause: Option<String>,
    },
}

impl SyncError {
    /// Returns true if this is the hard-stop variant.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(self, SyncError::CriticalSyncFailure { .. })
    }
}

/// Errors that can occur during event operations.
#[derive(Debug, Error)]
pub enum EventError {
    // Configuration errors (permanent, no retry)
    /// Required configuration variable is missing.
    #[error("Configuration missing: {var}")]
    ConfigMissing { var: String },

    /// Configuration value is invalid.
    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    // Connection errors (transient, retry with backoff)
    /// Failed to connect to the broker.
    #[error("Connection to broker {broker} failed: {cause}")]
    ConnectionFailed { broker: String, cause: String },

    // Publishing errors
    /// The broker rejected or failed the send.
    #[error("Failed to publish to topic {topic}: {cause}")]
    PublishFailed { topic: String, cause: String },

    /// Delivery was not confirmed within the bounded wait.
    ///
    /// Treated as a failure: delivery must not be assumed.
    #[error("Delivery to topic {topic} not confirmed within {timeout_ms}ms")]
    PublishTimeout { topic: String, timeout_ms: u64 },

    /// Failed to serialize event.
    #[error("Failed to serialize event type {event_type}: {cause}")]
    SerializationFailed { event_type: String, cause: String },

    // Consuming errors
    /// Failed to consume from topic.
    #[error("Failed to consume from topic {topic}: {cause}")]
    ConsumeFailed { topic: String, cause: String },

    /// Failed to deserialize event.
    #[error("Failed to deserialize event type {event_type}: {raw}")]
    DeserializationFailed { event_type: String, raw: String },

    // Sync errors
    /// Divergence between the record store and the broker.
    #[error(transparent)]
    Sync(#[from] SyncError),

    // Internal Kafka errors
    /// Internal Kafka client error.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl EventError {
    /// Returns true if this error is transient and can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventError::ConnectionFailed { .. }
                | EventError::PublishFailed { .. }
                | EventError::PublishTimeout { .. }
                | EventError::ConsumeFailed { .. }
        )
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EventError::ConfigMissing { .. } | EventError::ConfigInvalid { .. }
        )
    }

    /// Returns true if this error must halt automated recovery.
    pub fn is_critical(&self) -> bool {
        matches!(self, EventError::Sync(sync) if sync.is_critical())
    }
}

/// Failure reported by an [`EventHandler`](crate::consumer::EventHandler).
///
/// The handler's storage adapter decides whether the failure is worth
/// redelivering; the consumer never inspects the message text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    retryable: bool,
    from_store: bool,
    message: String,
}

impl HandlerError {
    /// A failure that may succeed on redelivery (timeouts, lost connections).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            from_store: false,
            message: message.into(),
        }
    }

    /// A failure that redelivery cannot fix (constraint or validation failures).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            from_store: false,
            message: message.into(),
        }
    }

    /// Mark the failure as raised by the record store.
    ///
    /// Only these count towards the store error counter.
    #[must_use]
    pub fn from_store(mut self) -> Self {
        self.from_store = true;
        self
    }

    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        self.from_store
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
