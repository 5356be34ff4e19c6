//! Periodic eviction of stale idempotency ledger entries.

use crate::config::LedgerSettings;
use crate::idempotence::IdempotencyLedger;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Background task that keeps the ledger bounded.
///
/// Each tick evicts entries older than the retention window. The first tick
/// fires immediately.
pub struct LedgerSweeper {
    ledger: Arc<IdempotencyLedger>,
    settings: LedgerSettings,
}

impl LedgerSweeper {
    pub fn new(ledger: Arc<IdempotencyLedger>, settings: LedgerSettings) -> Self {
        Self { ledger, settings }
    }

    /// Evict everything older than the retention window, measured from `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        self.ledger.evict_older_than(now - self.settings.retention)
    }

    /// Run until `cancel` fires.
    #[instrument(skip_all)]
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            sweep_interval_secs = self.settings.sweep_interval.as_secs(),
            retention_secs = self.settings.retention.num_seconds(),
            "Starting ledger sweeper"
        );

        let mut ticker = interval(self.settings.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Ledger sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = self.sweep_at(Utc::now());
                    if evicted > 0 {
                        info!(evicted, remaining = self.ledger.len(), "Evicted stale ledger entries");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DedupeKey;
    use chrono::Duration;

    #[test]
    fn test_sweep_respects_retention() {
        let ledger = Arc::new(IdempotencyLedger::new());
        let now = Utc::now();
        ledger.insert_if_absent_at(DedupeKey::new("old"), now - Duration::hours(25));
        ledger.insert_if_absent_at(DedupeKey::new("new"), now - Duration::hours(23));

        let sweeper = LedgerSweeper::new(ledger.clone(), LedgerSettings::default());

        assert_eq!(sweeper.sweep_at(now), 1);
        assert!(ledger.contains(&DedupeKey::new("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_sweeps_and_cancel_stops() {
        let ledger = Arc::new(IdempotencyLedger::new());
        ledger.insert_if_absent_at(DedupeKey::new("old"), Utc::now() - Duration::days(2));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            LedgerSweeper::new(ledger.clone(), LedgerSettings::default()).run(cancel.clone()),
        );

        // Let the immediate first tick run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert!(ledger.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
