//! Error types for the onboarding-registration crate.

use crate::model::ApprovalStatus;
use crate::store::StoreError;
use onboarding_events::{EventError, SyncError};
use thiserror::Error;

/// Errors returned by [`RegistrationService`](crate::service::RegistrationService).
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Input failed validation.
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A registration with this email already exists.
    #[error("A registration for {email} already exists")]
    DuplicateEmail { email: String },

    /// No registration with this email.
    #[error("No registration found for {email}")]
    NotFound { email: String },

    /// The requested status change is not allowed.
    #[error("Cannot move registration from {from} to {to}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    /// The store write succeeded but the approval event was not published.
    ///
    /// The record stays APPROVED; see
    /// [`republish_approval`](crate::service::RegistrationService::republish_approval).
    #[error("Approval event not published: {0}")]
    Publish(#[source] EventError),

    /// The record store failed.
    #[error("Record store failure: {0}")]
    Store(#[from] StoreError),

    /// Divergence reached the critical threshold. Never retry.
    #[error(transparent)]
    CriticalSyncFailure(SyncError),
}

impl RegistrationError {
    /// Errors caused by the request itself rather than by infrastructure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::DuplicateEmail { .. }
                | Self::NotFound { .. }
                | Self::InvalidTransition { .. }
        )
    }

    /// Whether the caller may try the same operation again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Publish(e) => e.is_transient(),
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
