//! Registration approval state machine.
//!
//! Store writes always commit before the approval event is published. A
//! publish failure after the commit never rolls the record back: the record
//! stays APPROVED, a divergence error is recorded and the caller is told.
//! Operators repair the gap with [`RegistrationService::republish_approval`].

use crate::error::RegistrationError;
use crate::model::{
    normalize_email, ApprovalRecord, ApprovalStatus, NewApprovalRecord, Page, PageRequest,
};
use crate::store::{RegistrationStore, StoreError};

use onboarding_events::{EventProducer, RetryPolicy, SyncHealthMonitor};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Retry budgets used by [`RegistrationService`].
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Applied to every store call; only transient failures are retried.
    pub store_retry: RetryPolicy,

    /// Publish policy for `approve`. One attempt by default so approvals
    /// fail fast and the caller owns any further retry.
    pub approval_publish: RetryPolicy,

    /// Publish policy for `republish_approval`.
    pub republish: RetryPolicy,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            store_retry: RetryPolicy::exponential(3, Duration::from_millis(200)),
            approval_publish: RetryPolicy::single(),
            republish: RetryPolicy::standard(),
        }
    }
}

/// Registers people and moves their records through the approval lifecycle.
pub struct RegistrationService {
    store: Arc<dyn RegistrationStore>,
    producer: Arc<EventProducer>,
    config: RegistrationConfig,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        producer: Arc<EventProducer>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            producer,
            config,
        }
    }

    pub fn health(&self) -> &Arc<SyncHealthMonitor> {
        self.producer.health()
    }

    /// Create a PENDING record with a fresh correlation id.
    #[instrument(skip(self, first_name, last_name))]
    pub async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<ApprovalRecord, RegistrationError> {
        let new_record = NewApprovalRecord::new(first_name, last_name, email)?;
        let email = new_record.email.clone();

        if self.find(&email).await?.is_some() {
            return Err(RegistrationError::DuplicateEmail { email });
        }

        let record = match self
            .with_store(move || self.store.insert(new_record.clone()))
            .await
        {
            Ok(record) => record,
            Err(StoreError::Conflict { .. }) => {
                return Err(RegistrationError::DuplicateEmail { email });
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            email = %record.email,
            correlation_id = %record.correlation_id,
            "Registration created"
        );
        Ok(record)
    }

    /// Approve a PENDING record, then publish its approval event.
    #[instrument(skip(self))]
    pub async fn approve(&self, email: &str) -> Result<ApprovalRecord, RegistrationError> {
        let approved = self.transition(email, ApprovalStatus::Approved).await?;
        let event = approved.approval_event();

        if let Err(e) = self
            .producer
            .publish_with_retry(&event, &self.config.approval_publish)
            .await
        {
            error!(
                email = %approved.email,
                correlation_id = %approved.correlation_id,
                error = %e,
                "Registration approved but approval event not published"
            );
            self.health()
                .record_divergence_error(
                    &format!(
                        "Registration {} approved without a published event",
                        approved.correlation_id
                    ),
                    Some(&e.to_string()),
                )
                .map_err(RegistrationError::CriticalSyncFailure)?;
            return Err(RegistrationError::Publish(e));
        }

        info!(
            email = %approved.email,
            correlation_id = %approved.correlation_id,
            "Registration approved"
        );
        Ok(approved)
    }

    /// Decline a PENDING record. No event is published.
    #[instrument(skip(self))]
    pub async fn decline(&self, email: &str) -> Result<ApprovalRecord, RegistrationError> {
        let declined = self.transition(email, ApprovalStatus::Declined).await?;

        info!(
            email = %declined.email,
            correlation_id = %declined.correlation_id,
            "Registration declined"
        );
        Ok(declined)
    }

    /// Remove a record regardless of its status.
    #[instrument(skip(self))]
    pub async fn delete(&self, email: &str) -> Result<(), RegistrationError> {
        let email = normalize_email(email);
        let removed = self
            .with_store(|| self.store.delete_by_email(&email))
            .await?;

        if !removed {
            return Err(RegistrationError::NotFound { email });
        }

        info!(email = %email, "Registration deleted");
        Ok(())
    }

    pub async fn get_by_email(&self, email: &str) -> Result<ApprovalRecord, RegistrationError> {
        self.find_existing(&normalize_email(email)).await
    }

    pub async fn list_by_status(
        &self,
        status: ApprovalStatus,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, RegistrationError> {
        Ok(self
            .with_store(|| self.store.list_by_status(status, page))
            .await?)
    }

    pub async fn list_all(
        &self,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, RegistrationError> {
        Ok(self.with_store(|| self.store.list_all(page)).await?)
    }

    /// Re-send the approval event for an APPROVED record.
    ///
    /// Operator-triggered repair for approvals whose event never reached
    /// the broker. Never called automatically.
    #[instrument(skip(self))]
    pub async fn republish_approval(
        &self,
        email: &str,
    ) -> Result<ApprovalRecord, RegistrationError> {
        let record = self.find_existing(&normalize_email(email)).await?;

        if record.status != ApprovalStatus::Approved {
            return Err(RegistrationError::InvalidTransition {
                from: record.status,
                to: ApprovalStatus::Approved,
            });
        }

        self.producer
            .publish_with_retry(&record.approval_event(), &self.config.republish)
            .await
            .map_err(RegistrationError::Publish)?;

        warn!(
            email = %record.email,
            correlation_id = %record.correlation_id,
            "Approval event republished"
        );
        Ok(record)
    }

    async fn transition(
        &self,
        email: &str,
        target: ApprovalStatus,
    ) -> Result<ApprovalRecord, RegistrationError> {
        let email = normalize_email(email);
        let record = self.find_existing(&email).await?;

        if !record.status.can_transition_to(target) {
            return Err(RegistrationError::InvalidTransition {
                from: record.status,
                to: target,
            });
        }

        let (id, from) = (record.id, record.status);
        // Set once an attempt fails retryably: that write may have committed.
        let uncertain = AtomicBool::new(false);
        let updated = self
            .with_store(|| {
                let call = self.store.update_status(id, from, target);
                let uncertain = &uncertain;
                async move {
                    let result = call.await;
                    if matches!(&result, Err(e) if e.is_retryable()) {
                        uncertain.store(true, Ordering::SeqCst);
                    }
                    result
                }
            })
            .await?;

        if let Some(updated) = updated {
            return Ok(updated);
        }

        let current = self.find_existing(&email).await?;
        if uncertain.load(Ordering::SeqCst) && current.id == id && current.status == target {
            warn!(
                email = %email,
                correlation_id = %current.correlation_id,
                status = %target,
                "Status write committed before its failure was reported"
            );
            return Ok(current);
        }

        // Changed or removed since it was read.
        Err(RegistrationError::InvalidTransition {
            from: current.status,
            to: target,
        })
    }

    async fn find(&self, email: &str) -> Result<Option<ApprovalRecord>, StoreError> {
        self.with_store(|| self.store.find_by_email(email)).await
    }

    async fn find_existing(&self, email: &str) -> Result<ApprovalRecord, RegistrationError> {
        self.find(email)
            .await?
            .ok_or_else(|| RegistrationError::NotFound {
                email: email.to_string(),
            })
    }

    /// Run a store call under the store retry policy, recording every
    /// failed attempt except uniqueness conflicts.
    async fn with_store<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let health = self.health();

        self.config
            .store_retry
            .execute(
                move |_| {
                    let call = op();
                    async move {
                        let result = call.await;
                        if let Err(e) = &result {
                            if !e.is_conflict() {
                                health.record_store_error();
                            }
                        }
                        result
                    }
                },
                StoreError::is_retryable,
            )
            .await
    }
}
