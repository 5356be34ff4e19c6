//! Idempotent event consumer with bounded redelivery and dead-letter routing.

use crate::config::ConsumerSettings;
use crate::error::{EventError, HandlerError};
use crate::event::Event;
use crate::health::SyncHealthMonitor;
use crate::idempotence::IdempotencyLedger;
use crate::producer::EventProducer;

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The side effect was applied.
    Applied,
    /// The target was already in the desired state.
    AlreadyApplied,
    /// The event refers to a record the store does not have.
    TargetMissing,
}

/// Side effect applied for each event of type `E`.
///
/// Mutations must be idempotent: the same event may reach the handler more
/// than once when concurrent deliveries race past the ledger.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(&self, event: &E) -> Result<HandleOutcome, HandlerError>;
}

/// How an acknowledged event was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Applied,
    /// Suppressed by the idempotency ledger.
    Duplicate,
    AlreadyApplied,
    DeadLettered,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with this event; the offset may be committed.
    Acknowledged(ConsumeOutcome),
    /// Not acknowledged; deliver again after `delay`.
    Redeliver { delay: Duration },
}

/// Consumes events of type `E` and applies them through `H`.
///
/// Share one instance between runner tasks with `Arc`; the ledger and
/// health monitor are then shared too.
pub struct EventConsumer<E: Event, H: EventHandler<E>> {
    handler: H,
    producer: Arc<EventProducer>,
    ledger: Arc<IdempotencyLedger>,
    settings: ConsumerSettings,
    _event: PhantomData<E>,
}

impl<E: Event, H: EventHandler<E>> EventConsumer<E, H> {
    pub fn new(
        handler: H,
        producer: Arc<EventProducer>,
        ledger: Arc<IdempotencyLedger>,
        settings: ConsumerSettings,
    ) -> Self {
        info!(
            topic = %E::TOPIC,
            max_attempts = settings.max_attempts,
            "Event consumer created"
        );

        Self {
            handler,
            producer,
            ledger,
            settings,
            _event: PhantomData,
        }
    }

    pub fn ledger(&self) -> &Arc<IdempotencyLedger> {
        &self.ledger
    }

    pub fn health(&self) -> &Arc<SyncHealthMonitor> {
        self.producer.health()
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Handle one delivery attempt (1-indexed) of `event`.
    ///
    /// Only [`EventError::Sync`] with a critical trip is returned as an
    /// error; such an event must not be acknowledged.
    #[instrument(skip(self, event), fields(topic = %E::TOPIC))]
    pub async fn process(&self, event: &E, attempt: u32) -> Result<Disposition, EventError> {
        let key = event.dedupe_key();

        if self.ledger.contains(&key) {
            debug!(dedupe_key = %key, "Event already processed, skipping");
            return Ok(Disposition::Acknowledged(ConsumeOutcome::Duplicate));
        }

        match self.handler.handle(event).await {
            Ok(HandleOutcome::Applied) => {
                if !self.ledger.insert_if_absent(key.clone()) {
                    debug!(dedupe_key = %key, "Concurrent delivery recorded the key first");
                }
                debug!(dedupe_key = %key, "Event applied");
                Ok(Disposition::Acknowledged(ConsumeOutcome::Applied))
            }
            Ok(HandleOutcome::AlreadyApplied) => {
                debug!(dedupe_key = %key, "Target already up to date");
                Ok(Disposition::Acknowledged(ConsumeOutcome::AlreadyApplied))
            }
            Ok(HandleOutcome::TargetMissing) => {
                warn!(dedupe_key = %key, "No record matches event");
                self.producer
                    .publish_to_dead_letter(event, "no matching record in store")
                    .await?;
                Ok(Disposition::Acknowledged(ConsumeOutcome::DeadLettered))
            }
            Err(e) => {
                if e.is_store_failure() {
                    self.health().record_store_error();
                }

                if e.is_retryable() && attempt < self.settings.max_attempts {
                    warn!(
                        dedupe_key = %key,
                        error = %e,
                        max_attempts = self.settings.max_attempts,
                        "Handler failed, requesting redelivery"
                    );
                    return Ok(Disposition::Redeliver {
                        delay: self.settings.redelivery_backoff,
                    });
                }

                error!(
                    dedupe_key = %key,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Handler failed permanently"
                );
                self.producer
                    .publish_to_dead_letter(event, e.message())
                    .await?;
                Ok(Disposition::Acknowledged(ConsumeOutcome::DeadLettered))
            }
        }
    }

    /// Deliver `event` until it is acknowledged, sleeping between attempts.
    pub async fn deliver(&self, event: &E) -> Result<ConsumeOutcome, EventError> {
        let mut attempt = 1;
        loop {
            match self.process(event, attempt).await? {
                Disposition::Acknowledged(outcome) => return Ok(outcome),
                Disposition::Redeliver { delay } => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Decode a raw payload and [`deliver`](Self::deliver) it.
    ///
    /// Payloads that do not decode are dead-lettered as-is.
    pub async fn deliver_payload(
        &self,
        key: &str,
        payload: &[u8],
    ) -> Result<ConsumeOutcome, EventError> {
        match serde_json::from_slice::<E>(payload) {
            Ok(event) => self.deliver(&event).await,
            Err(e) => {
                warn!(topic = %E::TOPIC, key, error = %e, "Undecodable payload");
                self.producer
                    .dead_letter_raw(
                        E::TOPIC,
                        E::DEAD_LETTER_TOPIC,
                        key,
                        payload.to_vec(),
                        &format!("undecodable {} payload: {e}", E::EVENT_TYPE),
                    )
                    .await?;
                Ok(ConsumeOutcome::DeadLettered)
            }
        }
    }
}
