//! Health tracking for the record store / broker synchronization.
//!
//! [`SyncHealthMonitor`] counts three failure classes (broker publish
//! errors, store errors and cross-store divergence) and turns them into an
//! UP / WARNING / DOWN status. Counters that have been quiet for longer than
//! the quiescence window are reset before each evaluation, so the status
//! reflects the recent error rate rather than process history.

use crate::config::HealthThresholds;
use crate::error::SyncError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tracing::{error, warn};

const NO_ERROR: i64 = i64::MIN;

/// Overall synchronization health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncHealth {
    Up,
    Warning,
    Down,
}

impl SyncHealth {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Warning => "WARNING",
            Self::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for SyncHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time value of one error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub count: u32,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Result of [`SyncHealthMonitor::health`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: SyncHealth,
    pub publish_errors: CounterSnapshot,
    pub store_errors: CounterSnapshot,
    pub divergence_errors: CounterSnapshot,
}

impl HealthReport {
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.status == SyncHealth::Up
    }
}

/// Broker connectivity as seen by the Kafka client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerStatus {
    /// Whether the connection is established.
    pub connected: bool,
    /// Number of brokers discovered.
    pub brokers: usize,
    /// Number of topics discovered.
    pub topics: usize,
}

impl BrokerStatus {
    /// Check if the connection is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.connected && self.brokers > 0
    }
}

#[derive(Debug)]
struct ErrorCounter {
    count: AtomicU32,
    last_error_ms: AtomicI64,
}

impl ErrorCounter {
    fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            last_error_ms: AtomicI64::new(NO_ERROR),
        }
    }

    fn record(&self, at: DateTime<Utc>) -> u32 {
        self.last_error_ms
            .store(at.timestamp_millis(), Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Zero the counter if its last error is older than `cutoff`.
    ///
    /// Only the increments observed before the reset are removed, so an
    /// error recorded concurrently with the sweep is never lost.
    fn reset_if_quiet(&self, cutoff: DateTime<Utc>) {
        let last = self.last_error_ms.load(Ordering::SeqCst);
        if last == NO_ERROR || last >= cutoff.timestamp_millis() {
            return;
        }

        let observed = self.count.load(Ordering::SeqCst);
        if self
            .last_error_ms
            .compare_exchange(last, NO_ERROR, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.count.fetch_sub(observed, Ordering::SeqCst);
        }
    }

    fn snapshot(&self) -> CounterSnapshot {
        let last = self.last_error_ms.load(Ordering::SeqCst);
        CounterSnapshot {
            count: self.count.load(Ordering::SeqCst),
            last_error_at: if last == NO_ERROR {
                None
            } else {
                Utc.timestamp_millis_opt(last).single()
            },
        }
    }
}

/// Process-wide synchronization health monitor.
///
/// Construct one per process and share it by `Arc`; every producer, consumer
/// and registration service records into the same instance.
#[derive(Debug)]
pub struct SyncHealthMonitor {
    thresholds: HealthThresholds,
    publish: ErrorCounter,
    store: ErrorCounter,
    divergence: ErrorCounter,
}

impl SyncHealthMonitor {
    #[must_use]
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            publish: ErrorCounter::new(),
            store: ErrorCounter::new(),
            divergence: ErrorCounter::new(),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HealthThresholds::default())
    }

    #[must_use]
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Record a broker publish error.
    pub fn record_publish_error(&self) {
        let count = self.publish.record(Utc::now());
        warn!(count, "Broker publish error recorded");
    }

    /// Record a record-store error.
    pub fn record_store_error(&self) {
        let count = self.store.record(Utc::now());
        warn!(count, "Store error recorded");
    }

    /// Record a divergence between the record store and the broker.
    ///
    /// Returns [`SyncError::CriticalSyncFailure`] once the divergence count
    /// reaches the critical threshold (unless `fail_on_critical` is off).
    /// Callers must propagate it instead of retrying.
    pub fn record_divergence_error(
        &self,
        message: &str,
        cause: Option<&str>,
    ) -> Result<(), SyncError> {
        let count = self.divergence.record(Utc::now());
        warn!(count, detail = message, cause, "Sync divergence error recorded");

        if self.thresholds.fail_on_critical && count >= self.thresholds.critical {
            error!(
                count,
                critical = self.thresholds.critical,
                detail = message,
                "Divergence reached critical threshold"
            );
            return Err(SyncError::CriticalSyncFailure {
                count,
                message: message.to_string(),
                cause: cause.map(str::to_string),
            });
        }

        Ok(())
    }

    /// Current health, evaluated at the current time.
    pub fn health(&self) -> HealthReport {
        self.health_at(Utc::now())
    }

    /// Health evaluated as if the current time were `now`.
    pub fn health_at(&self, now: DateTime<Utc>) -> HealthReport {
        let cutoff = now - self.thresholds.quiescence;
        self.publish.reset_if_quiet(cutoff);
        self.store.reset_if_quiet(cutoff);
        self.divergence.reset_if_quiet(cutoff);

        let publish_errors = self.publish.snapshot();
        let store_errors = self.store.snapshot();
        let divergence_errors = self.divergence.snapshot();

        let worst = publish_errors
            .count
            .max(store_errors.count)
            .max(divergence_errors.count);

        let status = if worst >= self.thresholds.down {
            SyncHealth::Down
        } else if worst >= self.thresholds.warning {
            SyncHealth::Warning
        } else {
            SyncHealth::Up
        };

        HealthReport {
            status,
            publish_errors,
            store_errors,
            divergence_errors,
        }
    }

    /// True if any counter is at or above the critical threshold.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        let critical = self.thresholds.critical;
        self.publish.count.load(Ordering::SeqCst) >= critical
            || self.store.count.load(Ordering::SeqCst) >= critical
            || self.divergence.count.load(Ordering::SeqCst) >= critical
    }
}

impl Default for SyncHealthMonitor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fresh_monitor_is_up() {
        let monitor = SyncHealthMonitor::with_defaults();
        let report = monitor.health();

        assert_eq!(report.status, SyncHealth::Up);
        assert_eq!(report.store_errors.count, 0);
        assert!(report.store_errors.last_error_at.is_none());
    }

    #[test]
    fn test_store_errors_cross_warning_then_down() {
        let monitor = SyncHealthMonitor::with_defaults();

        for _ in 0..4 {
            monitor.record_store_error();
        }
        assert_eq!(monitor.health().status, SyncHealth::Up);

        monitor.record_store_error();
        assert_eq!(monitor.health().status, SyncHealth::Warning);

        for _ in 0..5 {
            monitor.record_store_error();
        }
        let report = monitor.health();
        assert_eq!(report.status, SyncHealth::Down);
        assert_eq!(report.store_errors.count, 10);
        assert!(report.store_errors.last_error_at.is_some());
    }

    #[test]
    fn test_fifteenth_divergence_is_critical() {
        let monitor = SyncHealthMonitor::with_defaults();

        for _ in 0..14 {
            monitor
                .record_divergence_error("no record", None)
                .expect("below critical threshold");
        }

        let err = monitor
            .record_divergence_error("no record", Some("lookup returned nothing"))
            .unwrap_err();
        match err {
            SyncError::CriticalSyncFailure {
                count,
                message,
                cause,
            } => {
                assert_eq!(count, 15);
                assert_eq!(message, "no record");
                assert_eq!(cause.as_deref(), Some("lookup returned nothing"));
            }
            other => panic!("Expected CriticalSyncFailure, got {other:?}"),
        }
        assert!(monitor.is_critical());
    }

    #[test]
    fn test_critical_can_be_disabled() {
        let monitor = SyncHealthMonitor::new(HealthThresholds {
            fail_on_critical: false,
            ..HealthThresholds::default()
        });

        for _ in 0..20 {
            assert!(monitor.record_divergence_error("drift", None).is_ok());
        }
        assert_eq!(monitor.health().status, SyncHealth::Down);
    }

    #[test]
    fn test_quiet_counters_reset_after_quiescence_window() {
        let monitor = SyncHealthMonitor::with_defaults();
        for _ in 0..10 {
            monitor.record_publish_error();
        }
        monitor.record_store_error();

        let later = Utc::now() + Duration::minutes(30);
        assert_eq!(monitor.health_at(later).status, SyncHealth::Down);

        let much_later = Utc::now() + Duration::minutes(61);
        let report = monitor.health_at(much_later);
        assert_eq!(report.status, SyncHealth::Up);
        assert_eq!(report.publish_errors.count, 0);
        assert_eq!(report.store_errors.count, 0);
        assert!(report.publish_errors.last_error_at.is_none());
    }

    #[test]
    fn test_counters_are_independent() {
        let monitor = SyncHealthMonitor::with_defaults();
        monitor.record_publish_error();
        monitor.record_store_error();
        monitor.record_store_error();
        monitor.record_divergence_error("x", None).unwrap();

        let report = monitor.health();
        assert_eq!(report.publish_errors.count, 1);
        assert_eq!(report.store_errors.count, 2);
        assert_eq!(report.divergence_errors.count, 1);
    }

    #[test]
    fn test_report_serializes_status_in_upper_case() {
        let monitor = SyncHealthMonitor::with_defaults();
        let json = serde_json::to_value(monitor.health()).unwrap();
        assert_eq!(json["status"], "UP");
    }

    #[test]
    fn test_broker_status_healthy() {
        let status = BrokerStatus {
            connected: true,
            brokers: 3,
            topics: 10,
        };
        assert!(status.is_healthy());

        let no_brokers = BrokerStatus {
            connected: true,
            brokers: 0,
            topics: 0,
        };
        assert!(!no_brokers.is_healthy());
    }
}
