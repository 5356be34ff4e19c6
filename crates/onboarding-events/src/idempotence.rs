//! Idempotency ledger for suppressing redelivered events.

use crate::event::DedupeKey;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};

/// Process-local record of recently processed dedupe keys.
///
/// Shared by every consumer instance in the process. The check-then-insert
/// done by consumers is not locked across the handler call; handlers apply
/// idempotent mutations, so the ledger only suppresses duplicate work.
#[derive(Debug, Default)]
pub struct IdempotencyLedger {
    entries: DashMap<DedupeKey, DateTime<Utc>>,
}

impl IdempotencyLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as processed now.
    ///
    /// Returns true if the key was newly inserted, false if it was already
    /// present (the existing timestamp is kept).
    pub fn insert_if_absent(&self, key: DedupeKey) -> bool {
        self.insert_if_absent_at(key, Utc::now())
    }

    /// Record `key` as processed at `processed_at`.
    pub fn insert_if_absent_at(&self, key: DedupeKey, processed_at: DateTime<Utc>) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(processed_at);
                true
            }
        }
    }

    /// Check if an event with this key has already been processed.
    #[must_use]
    pub fn contains(&self, key: &DedupeKey) -> bool {
        self.entries.contains_key(key)
    }

    /// When `key` was recorded, if it is present.
    #[must_use]
    pub fn processed_at(&self, key: &DedupeKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    /// Remove every entry processed strictly before `cutoff`.
    ///
    /// Returns the number of evicted entries.
    #[instrument(skip(self))]
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, processed_at| *processed_at >= cutoff);
        let evicted = before.saturating_sub(self.entries.len());

        debug!(
            evicted,
            remaining = self.entries.len(),
            "Idempotency ledger eviction"
        );

        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn key(s: &str) -> DedupeKey {
        DedupeKey::new(s)
    }

    #[test]
    fn test_insert_if_absent_detects_duplicates() {
        let ledger = IdempotencyLedger::new();

        assert!(ledger.insert_if_absent(key("a-jane@x.com")));
        assert!(!ledger.insert_if_absent(key("a-jane@x.com")));
        assert!(ledger.contains(&key("a-jane@x.com")));
        assert!(!ledger.contains(&key("b-jane@x.com")));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_keeps_original_timestamp() {
        let ledger = IdempotencyLedger::new();
        let t = Utc::now() - Duration::hours(3);

        ledger.insert_if_absent_at(key("k"), t);
        ledger.insert_if_absent(key("k"));

        assert_eq!(ledger.processed_at(&key("k")), Some(t));
    }

    #[test]
    fn test_entry_survives_23h_and_is_gone_after_25h() {
        let ledger = IdempotencyLedger::new();
        let retention = Duration::hours(24);
        let t = Utc::now();
        ledger.insert_if_absent_at(key("k"), t);

        // Sweep running at T+23h
        let evicted = ledger.evict_older_than(t + Duration::hours(23) - retention);
        assert_eq!(evicted, 0);
        assert!(ledger.contains(&key("k")));

        // Sweep running at T+25h
        let evicted = ledger.evict_older_than(t + Duration::hours(25) - retention);
        assert_eq!(evicted, 1);
        assert!(!ledger.contains(&key("k")));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_eviction_only_touches_stale_entries() {
        let ledger = IdempotencyLedger::new();
        let now = Utc::now();
        ledger.insert_if_absent_at(key("old"), now - Duration::hours(30));
        ledger.insert_if_absent_at(key("fresh"), now - Duration::hours(1));

        assert_eq!(ledger.evict_older_than(now - Duration::hours(24)), 1);
        assert!(ledger.contains(&key("fresh")));
        assert!(!ledger.contains(&key("old")));
    }

    #[test]
    fn test_concurrent_inserts_admit_exactly_one_winner() {
        let ledger = Arc::new(IdempotencyLedger::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.insert_if_absent(key("same")))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(ledger.len(), 1);
    }
}
