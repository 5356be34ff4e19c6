//! Integration test for the publish / consume loop over the in-memory transport.
//!
//! A custom event type is published, picked up from the transport tap and
//! fed through the consumer, including redelivery and dead-letter paths.

use async_trait::async_trait;
use onboarding_events::{
    ConsumeOutcome, ConsumerSettings, DedupeKey, Event, EventConsumer, EventHandler,
    EventProducer, HandleOutcome, HandlerError, IdempotencyLedger, InMemoryTransport,
    ProducerSettings, SyncHealth, SyncHealthMonitor,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SeatAssigned {
    seat_id: String,
    holder: String,
}

impl Event for SeatAssigned {
    const TOPIC: &'static str = "seat.assigned";
    const DEAD_LETTER_TOPIC: &'static str = "seat.assigned.dlt";
    const EVENT_TYPE: &'static str = "seat.assigned";

    fn partition_key(&self) -> String {
        self.seat_id.clone()
    }

    fn dedupe_key(&self) -> DedupeKey {
        DedupeKey::new(format!("{}-{}", self.seat_id, self.holder))
    }
}

/// Seat table: `None` means free, `Some(holder)` means taken.
#[derive(Default)]
struct Seats {
    seats: Mutex<HashMap<String, Option<String>>>,
    writes: Mutex<u32>,
}

#[async_trait]
impl EventHandler<SeatAssigned> for Arc<Seats> {
    async fn handle(&self, event: &SeatAssigned) -> Result<HandleOutcome, HandlerError> {
        let mut seats = self.seats.lock().unwrap();
        match seats.get_mut(&event.seat_id) {
            None => Ok(HandleOutcome::TargetMissing),
            Some(Some(holder)) if *holder == event.holder => Ok(HandleOutcome::AlreadyApplied),
            Some(Some(_)) => Err(HandlerError::permanent("seat held by someone else")),
            Some(slot) => {
                *slot = Some(event.holder.clone());
                *self.writes.lock().unwrap() += 1;
                Ok(HandleOutcome::Applied)
            }
        }
    }
}

fn seat(seat_id: &str, holder: &str) -> SeatAssigned {
    SeatAssigned {
        seat_id: seat_id.to_string(),
        holder: holder.to_string(),
    }
}

#[tokio::test]
async fn test_published_events_flow_through_consumer() {
    let (transport, mut tap) = InMemoryTransport::with_tap();
    let transport = Arc::new(transport);
    let health = Arc::new(SyncHealthMonitor::with_defaults());
    let producer = Arc::new(EventProducer::new(
        transport.clone(),
        health.clone(),
        ProducerSettings::default(),
    ));

    let seats = Arc::new(Seats::default());
    {
        let mut table = seats.seats.lock().unwrap();
        table.insert("1A".to_string(), None);
        table.insert("1B".to_string(), Some("bob".to_string()));
    }

    let consumer = EventConsumer::new(
        seats.clone(),
        producer.clone(),
        Arc::new(IdempotencyLedger::new()),
        ConsumerSettings::default(),
    );

    producer.publish(&seat("1A", "alice")).await.unwrap();
    producer.publish(&seat("1A", "alice")).await.unwrap();
    producer.publish(&seat("9Z", "carol")).await.unwrap();
    producer.publish(&seat("1B", "dave")).await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let record = tap.recv().await.unwrap();
        assert_eq!(record.topic, SeatAssigned::TOPIC);
        outcomes.push(
            consumer
                .deliver_payload(&record.key, &record.payload)
                .await
                .unwrap(),
        );
    }

    assert_eq!(
        outcomes,
        vec![
            ConsumeOutcome::Applied,
            ConsumeOutcome::Duplicate,
            ConsumeOutcome::DeadLettered,
            ConsumeOutcome::DeadLettered,
        ]
    );
    assert_eq!(*seats.writes.lock().unwrap(), 1);
    assert_eq!(
        seats.seats.lock().unwrap().get("1A").cloned().flatten().as_deref(),
        Some("alice")
    );

    // Dead-letter records are published through the same transport.
    let dlt = transport.sent_to(SeatAssigned::DEAD_LETTER_TOPIC).await;
    assert_eq!(dlt.len(), 2);
    assert_eq!(dlt[0].key, "9Z");

    let report = health.health();
    assert_eq!(report.status, SyncHealth::Up);
    assert_eq!(report.divergence_errors.count, 2);
    assert_eq!(report.store_errors.count, 0);
}

#[tokio::test]
async fn test_divergence_storm_turns_health_down() {
    let transport = Arc::new(InMemoryTransport::new());
    let health = Arc::new(SyncHealthMonitor::with_defaults());
    let producer = Arc::new(EventProducer::new(
        transport,
        health.clone(),
        ProducerSettings::default(),
    ));
    let consumer = EventConsumer::new(
        Arc::new(Seats::default()),
        producer,
        Arc::new(IdempotencyLedger::new()),
        ConsumerSettings::default(),
    );

    for i in 0..10 {
        let outcome = consumer
            .deliver(&seat(&format!("{i}C"), "eve"))
            .await
            .unwrap();
        assert_eq!(outcome, ConsumeOutcome::DeadLettered);
    }

    assert_eq!(health.health().status, SyncHealth::Down);
    assert!(!health.is_critical());
}
