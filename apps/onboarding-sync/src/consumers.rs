//! Approval consumer and background task wiring.
//!
//! The approval consumer runs as N members of one Kafka consumer group,
//! next to the ledger sweeper and the health reporter.

use std::sync::Arc;
use std::time::Duration;

use onboarding_events::{
    ApprovalEvent, ConsumerSettings, EventConsumer, EventError, EventProducer, HealthReport,
    IdempotencyLedger, LedgerSettings, LedgerSweeper, SyncError, SyncHealth, SyncHealthMonitor,
};
use onboarding_registration::{ApprovalSyncHandler, RegistrationStore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(feature = "kafka")]
use onboarding_events::{KafkaConfig, KafkaConsumerRunner};

pub type ApprovalConsumer = EventConsumer<ApprovalEvent, ApprovalSyncHandler>;

/// Background tasks; each ends with `Err` only on a failure that must stop
/// the service.
pub type Tasks = JoinSet<Result<(), EventError>>;

pub fn approval_consumer(
    store: Arc<dyn RegistrationStore>,
    producer: Arc<EventProducer>,
    ledger: Arc<IdempotencyLedger>,
    settings: ConsumerSettings,
) -> Arc<ApprovalConsumer> {
    Arc::new(EventConsumer::new(
        ApprovalSyncHandler::new(store),
        producer,
        ledger,
        settings,
    ))
}

/// Start `instances` consumer-group members sharing `consumer`.
#[cfg(feature = "kafka")]
pub fn spawn_kafka_consumers(
    tasks: &mut Tasks,
    kafka: &KafkaConfig,
    consumer: &Arc<ApprovalConsumer>,
    instances: usize,
    cancel: &CancellationToken,
) -> Result<(), EventError> {
    for instance in 0..instances {
        let runner = KafkaConsumerRunner::new(kafka, consumer.clone(), instance)?;
        tasks.spawn(runner.run(cancel.clone()));
    }

    info!(
        instances,
        consumer_group = %kafka.consumer_group,
        "Approval consumers started"
    );
    Ok(())
}

pub fn spawn_ledger_sweeper(
    tasks: &mut Tasks,
    ledger: Arc<IdempotencyLedger>,
    settings: LedgerSettings,
    cancel: CancellationToken,
) {
    let sweeper = LedgerSweeper::new(ledger, settings);
    tasks.spawn(async move {
        sweeper.run(cancel).await;
        Ok(())
    });
}

/// Log the sync health report every `every`.
///
/// Stops the service when the divergence count has reached the critical
/// threshold and `fail_on_critical` is set. Publish and store errors at that
/// level are only reported.
pub fn spawn_health_reporter(
    tasks: &mut Tasks,
    health: Arc<SyncHealthMonitor>,
    every: Duration,
    cancel: CancellationToken,
) {
    tasks.spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let report = health.health();
            log_report(&report);

            let thresholds = health.thresholds();
            let divergences = report.divergence_errors.count;
            if thresholds.fail_on_critical && divergences >= thresholds.critical {
                error!(
                    count = divergences,
                    critical = thresholds.critical,
                    "Divergence at critical threshold, stopping service"
                );
                return Err(SyncError::CriticalSyncFailure {
                    count: divergences,
                    message: "divergence count at the critical threshold".to_string(),
                    cause: None,
                }
                .into());
            }

            if health.is_critical() {
                error!("Sync error counters at critical threshold");
            }
        }
    });
}

fn log_report(report: &HealthReport) {
    let json = serde_json::to_string(report).unwrap_or_default();
    match report.status {
        SyncHealth::Up => info!(report = %json, "Sync health"),
        SyncHealth::Warning | SyncHealth::Down => warn!(report = %json, "Sync health degraded"),
    }
}
