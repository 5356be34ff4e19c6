//! Record store abstraction.
//!
//! Adapters classify their own failures into [`StoreError`] so callers can
//! decide between retrying, reporting a conflict and giving up without
//! looking at driver-specific errors.

mod memory;
mod postgres;

pub use memory::InMemoryRegistrationStore;
pub use postgres::PgRegistrationStore;

use crate::model::{ApprovalRecord, ApprovalStatus, NewApprovalRecord, Page, PageRequest};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Constraint guarding email uniqueness.
pub const EMAIL_UNIQUE_CONSTRAINT: &str = "approval_records_email_key";

/// Classified record store failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store is unreachable, overloaded or aborted the transaction.
    /// Retrying may succeed.
    #[error("Store temporarily unavailable: {0}")]
    Transient(String),

    /// A uniqueness constraint rejected the write.
    #[error("Constraint {constraint} violated: {message}")]
    Conflict { constraint: String, message: String },

    /// The store refused the operation; retrying will not help.
    #[error("Store rejected the operation: {0}")]
    Rejected(String),
}

impl StoreError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Classify a database error from its SQLSTATE code.
    ///
    /// Integrity (23) and data (22) violations are permanent, with unique
    /// violations (23505) reported as conflicts. Serialization failures,
    /// deadlocks, connection (08), resource (53) and admin shutdown errors
    /// are transient. Anything else is permanent.
    #[must_use]
    pub fn from_sqlstate(code: &str, constraint: Option<&str>, message: &str) -> Self {
        match code {
            "23505" => Self::Conflict {
                constraint: constraint.unwrap_or("unknown").to_string(),
                message: message.to_string(),
            },
            "40001" | "40P01" | "57P01" => Self::Transient(format!("{code}: {message}")),
            c if c.starts_with("08") || c.starts_with("53") => {
                Self::Transient(format!("{code}: {message}"))
            }
            _ => Self::Rejected(format!("{code}: {message}")),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) => Self::from_sqlstate(&code, db_err.constraint(), db_err.message()),
                None => Self::Rejected(db_err.message().to_string()),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::Transient(err.to_string()),
            _ => Self::Rejected(err.to_string()),
        }
    }
}

/// Persistence for approval records.
///
/// Emails passed in are already normalized.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert a PENDING record. A taken email is a
    /// [`StoreError::Conflict`] on [`EMAIL_UNIQUE_CONSTRAINT`].
    async fn insert(&self, record: NewApprovalRecord) -> Result<ApprovalRecord, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<ApprovalRecord>, StoreError>;

    async fn find_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Move record `id` from `expected` to `target`.
    ///
    /// Returns `None` without writing when the record is gone or no longer
    /// in `expected`.
    async fn update_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        target: ApprovalStatus,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Returns whether a record was removed.
    async fn delete_by_email(&self, email: &str) -> Result<bool, StoreError>;

    async fn list_by_status(
        &self,
        status: ApprovalStatus,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, StoreError>;

    async fn list_all(&self, page: PageRequest) -> Result<Page<ApprovalRecord>, StoreError>;
}
