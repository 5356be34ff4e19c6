//! Consumer-side application of approval events to the record store.

use crate::model::ApprovalStatus;
use crate::store::{RegistrationStore, StoreError};

use async_trait::async_trait;
use onboarding_events::{ApprovalEvent, EventHandler, HandleOutcome, HandlerError};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Marks the record named by an [`ApprovalEvent`] as APPROVED.
pub struct ApprovalSyncHandler {
    store: Arc<dyn RegistrationStore>,
}

impl ApprovalSyncHandler {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }
}

fn handler_error(err: StoreError) -> HandlerError {
    let handler_err = if err.is_retryable() {
        HandlerError::transient(err.to_string())
    } else {
        HandlerError::permanent(err.to_string())
    };
    handler_err.from_store()
}

#[async_trait]
impl EventHandler<ApprovalEvent> for ApprovalSyncHandler {
    async fn handle(&self, event: &ApprovalEvent) -> Result<HandleOutcome, HandlerError> {
        let correlation_id = Uuid::parse_str(&event.correlation_id).map_err(|e| {
            HandlerError::permanent(format!(
                "malformed correlation id {}: {e}",
                event.correlation_id
            ))
        })?;

        let Some(record) = self
            .store
            .find_by_correlation_id(correlation_id)
            .await
            .map_err(handler_error)?
        else {
            return Ok(HandleOutcome::TargetMissing);
        };

        if record.email != event.email {
            warn!(
                %correlation_id,
                record_email = %record.email,
                event_email = %event.email,
                "Event email differs from stored record"
            );
        }

        match record.status {
            ApprovalStatus::Approved => Ok(HandleOutcome::AlreadyApplied),
            ApprovalStatus::Declined => Err(HandlerError::permanent(format!(
                "registration {correlation_id} is DECLINED and cannot be approved"
            ))),
            ApprovalStatus::Pending => {
                let updated = self
                    .store
                    .update_status(record.id, ApprovalStatus::Pending, ApprovalStatus::Approved)
                    .await
                    .map_err(handler_error)?;

                if updated.is_some() {
                    debug!(%correlation_id, "Registration marked approved from event");
                    return Ok(HandleOutcome::Applied);
                }

                // Lost a race with another writer: settle on what is stored now.
                match self
                    .store
                    .find_by_correlation_id(correlation_id)
                    .await
                    .map_err(handler_error)?
                {
                    None => Ok(HandleOutcome::TargetMissing),
                    Some(current) if current.status == ApprovalStatus::Approved => {
                        Ok(HandleOutcome::AlreadyApplied)
                    }
                    Some(current) => Err(HandlerError::permanent(format!(
                        "registration {correlation_id} moved to {} concurrently",
                        current.status
                    ))),
                }
            }
        }
    }
}
