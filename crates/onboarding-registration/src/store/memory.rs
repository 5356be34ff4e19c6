//! In-process record store.

use super::{RegistrationStore, StoreError, EMAIL_UNIQUE_CONSTRAINT};
use crate::model::{ApprovalRecord, ApprovalStatus, NewApprovalRecord, Page, PageRequest};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// [`RegistrationStore`] kept in memory.
///
/// Failures can be queued with [`fail_next`](Self::fail_next); each store
/// call pops one before touching the data.
#[derive(Debug, Default)]
pub struct InMemoryRegistrationStore {
    records: RwLock<HashMap<Uuid, ApprovalRecord>>,
    failures: Mutex<VecDeque<StoreError>>,
}

impl InMemoryRegistrationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        match self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn page_where(
        &self,
        page: PageRequest,
        filter: impl Fn(&ApprovalRecord) -> bool,
    ) -> Page<ApprovalRecord> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records.values().filter(|r| filter(r)).cloned().collect();
        matching.sort_by(|a, b| {
            a.status_changed_at
                .cmp(&b.status_changed_at)
                .then(a.id.cmp(&b.id))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Page::new(items, page, total)
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn insert(&self, record: NewApprovalRecord) -> Result<ApprovalRecord, StoreError> {
        self.injected_failure()?;
        let mut records = self.records.write().await;

        if records.values().any(|r| r.email == record.email) {
            return Err(StoreError::Conflict {
                constraint: EMAIL_UNIQUE_CONSTRAINT.to_string(),
                message: format!("email {} already registered", record.email),
            });
        }

        let stored = ApprovalRecord {
            id: Uuid::new_v4(),
            correlation_id: record.correlation_id,
            first_name: record.first_name,
            last_name: record.last_name,
            email: record.email,
            status: ApprovalStatus::Pending,
            status_changed_at: Utc::now(),
        };
        records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ApprovalRecord>, StoreError> {
        self.injected_failure()?;
        let records = self.records.read().await;
        Ok(records.values().find(|r| r.email == email).cloned())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        self.injected_failure()?;
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.correlation_id == correlation_id)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        target: ApprovalStatus,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        self.injected_failure()?;
        let mut records = self.records.write().await;

        match records.get_mut(&id) {
            Some(record) if record.status == expected => {
                record.status = target;
                record.status_changed_at = Utc::now();
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_by_email(&self, email: &str) -> Result<bool, StoreError> {
        self.injected_failure()?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.email != email);
        Ok(records.len() < before)
    }

    async fn list_by_status(
        &self,
        status: ApprovalStatus,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self.page_where(page, |r| r.status == status).await)
    }

    async fn list_all(&self, page: PageRequest) -> Result<Page<ApprovalRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self.page_where(page, |_| true).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(email: &str) -> NewApprovalRecord {
        NewApprovalRecord::new("Jane", "Doe", email).unwrap()
    }

    #[tokio::test]
    async fn test_insert_rejects_taken_email() {
        let store = InMemoryRegistrationStore::new();
        store.insert(new_record("jane@x.com")).await.unwrap();

        let err = store.insert(new_record("jane@x.com")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_status_is_conditional() {
        let store = InMemoryRegistrationStore::new();
        let record = store.insert(new_record("jane@x.com")).await.unwrap();

        let approved = store
            .update_status(record.id, ApprovalStatus::Pending, ApprovalStatus::Approved)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);

        let second = store
            .update_status(record.id, ApprovalStatus::Pending, ApprovalStatus::Declined)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let store = InMemoryRegistrationStore::new();
        store.fail_next(StoreError::Transient("connection reset".to_string()));

        assert!(store.find_by_email("jane@x.com").await.is_err());
        assert!(store.find_by_email("jane@x.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_listing_pages_by_status() {
        let store = InMemoryRegistrationStore::new();
        for i in 0..5 {
            store
                .insert(new_record(&format!("user{i}@x.com")))
                .await
                .unwrap();
        }
        let first = store.find_by_email("user0@x.com").await.unwrap().unwrap();
        store
            .update_status(first.id, ApprovalStatus::Pending, ApprovalStatus::Approved)
            .await
            .unwrap();

        let pending = store
            .list_by_status(ApprovalStatus::Pending, PageRequest::new(1, 3))
            .await
            .unwrap();
        assert_eq!(pending.total, 4);
        assert_eq!(pending.items.len(), 1);

        let all = store.list_all(PageRequest::default()).await.unwrap();
        assert_eq!(all.total, 5);
    }

    #[tokio::test]
    async fn test_delete_reports_whether_removed() {
        let store = InMemoryRegistrationStore::new();
        store.insert(new_record("jane@x.com")).await.unwrap();

        assert!(store.delete_by_email("jane@x.com").await.unwrap());
        assert!(!store.delete_by_email("jane@x.com").await.unwrap());
    }
}
