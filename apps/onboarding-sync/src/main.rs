//! Onboarding sync service.
//!
//! Runs the consumer side of registration approval: approval events are
//! applied to the record store exactly once per dedupe key, poison events go
//! to the dead-letter topic, and the idempotency ledger is swept on a
//! schedule.

use std::sync::Arc;

use onboarding_events::{
    EventError, EventProducer, EventTransport, IdempotencyLedger, KafkaTransport,
    SyncHealthMonitor,
};
use onboarding_registration::{PgRegistrationStore, RegistrationStore};
use onboarding_sync::config::AppConfig;
use onboarding_sync::consumers::{self, Tasks};
use onboarding_sync::logging;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_logging(&config.log_filter, config.log_format) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        consumer_instances = config.consumer_instances,
        "Starting onboarding sync service"
    );

    let store = match PgRegistrationStore::connect(
        &config.database_url,
        config.database_max_connections,
    )
    .await
    {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    if let Err(e) = store.migrate().await {
        error!(error = %e, "Failed to run database migrations");
        std::process::exit(1);
    }
    info!("Database migrations applied");

    let store: Arc<dyn RegistrationStore> = Arc::new(store);
    let health = Arc::new(SyncHealthMonitor::new(config.sync.health.clone()));
    let ledger = Arc::new(IdempotencyLedger::new());
    let cancel = CancellationToken::new();
    let mut tasks = Tasks::new();

    let transport = match KafkaTransport::new(&config.kafka, &config.sync.producer) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "Failed to create Kafka producer");
            std::process::exit(1);
        }
    };
    match transport.broker_status().await {
        Ok(status) if status.is_healthy() => info!(
            brokers = status.brokers,
            topics = status.topics,
            "Kafka broker reachable"
        ),
        Ok(_) => warn!("Kafka reports no brokers, continuing"),
        Err(e) => warn!(error = %e, "Kafka broker unreachable, continuing"),
    }
    let transport: Arc<dyn EventTransport> = Arc::new(transport);

    let producer = Arc::new(EventProducer::new(
        transport,
        health.clone(),
        config.sync.producer.clone(),
    ));
    let consumer = consumers::approval_consumer(
        store,
        producer,
        ledger.clone(),
        config.sync.consumer.clone(),
    );

    if let Err(e) = consumers::spawn_kafka_consumers(
        &mut tasks,
        &config.kafka,
        &consumer,
        config.consumer_instances,
        &cancel,
    ) {
        error!(error = %e, "Failed to start approval consumers");
        std::process::exit(1);
    }

    consumers::spawn_ledger_sweeper(
        &mut tasks,
        ledger,
        config.sync.ledger.clone(),
        cancel.clone(),
    );
    consumers::spawn_health_reporter(
        &mut tasks,
        health,
        config.health_report_interval,
        cancel.clone(),
    );

    let mut failure: Option<EventError> = None;
    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, stopping tasks");
        }
        Some(joined) = tasks.join_next() => {
            match joined {
                Ok(Ok(())) => warn!("Background task exited early, shutting down"),
                Ok(Err(e)) => {
                    error!(error = %e, "Background task failed, shutting down");
                    failure = Some(e);
                }
                Err(e) => error!(error = %e, "Background task panicked, shutting down"),
            }
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Background task failed during shutdown");
                failure.get_or_insert(e);
            }
            Err(e) => error!(error = %e, "Background task panicked during shutdown"),
        }
    }

    if let Some(e) = failure {
        if e.is_critical() {
            error!(
                error = %e,
                "Stopped on critical sync failure, manual reconciliation required"
            );
        }
        std::process::exit(1);
    }

    info!("Onboarding sync service stopped");
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
