//! Approval record model.

use crate::error::RegistrationError;
use chrono::{DateTime, Utc};
use onboarding_events::{ApprovalEvent, DEFAULT_ASSIGNED_ROLE};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;

/// Approval lifecycle state.
///
/// Only PENDING → APPROVED and PENDING → DECLINED are legal; both targets
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "approval_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Declined,
}

impl ApprovalStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Declined => "DECLINED",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn can_transition_to(&self, target: ApprovalStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Declined)
        )
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "DECLINED" => Ok(Self::Declined),
            _ => Err(RegistrationError::Validation {
                field: "status",
                reason: format!("unknown status '{s}'"),
            }),
        }
    }
}

/// A registration awaiting or past approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ApprovalRecord {
    /// Store-assigned identifier.
    pub id: Uuid,

    /// Cross-service identifier, assigned once at registration.
    pub correlation_id: Uuid,

    pub first_name: String,
    pub last_name: String,

    /// Unique, trimmed and lower-cased.
    pub email: String,

    pub status: ApprovalStatus,

    /// When `status` last changed (creation time for PENDING records).
    pub status_changed_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// The onboarding event announcing this record's approval.
    #[must_use]
    pub fn approval_event(&self) -> ApprovalEvent {
        ApprovalEvent {
            correlation_id: self.correlation_id.to_string(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            assigned_role: DEFAULT_ASSIGNED_ROLE.to_string(),
        }
    }
}

/// Validated input for a new PENDING record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApprovalRecord {
    pub correlation_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl NewApprovalRecord {
    /// Validate and normalize registration input.
    ///
    /// Names are trimmed, the email is trimmed and lower-cased, and a fresh
    /// correlation id is assigned.
    pub fn new(first_name: &str, last_name: &str, email: &str) -> Result<Self, RegistrationError> {
        Ok(Self {
            correlation_id: Uuid::new_v4(),
            first_name: validate_name("first_name", first_name)?,
            last_name: validate_name("last_name", last_name)?,
            email: validate_email(email)?,
        })
    }
}

/// Canonical form used for every email lookup.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_name(field: &'static str, value: &str) -> Result<String, RegistrationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RegistrationError::Validation {
            field,
            reason: "must not be blank".to_string(),
        });
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(RegistrationError::Validation {
            field,
            reason: format!("must be at most {MAX_NAME_LEN} characters"),
        });
    }
    Ok(value.to_string())
}

fn validate_email(value: &str) -> Result<String, RegistrationError> {
    let email = normalize_email(value);
    let invalid = |reason: &str| RegistrationError::Validation {
        field: "email",
        reason: reason.to_string(),
    };

    if email.is_empty() {
        return Err(invalid("must not be blank"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(invalid("is too long"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }

    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.') =>
        {
            Ok(email)
        }
        _ => Err(invalid("is not a valid address")),
    }
}

/// Zero-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub const DEFAULT_SIZE: u32 = 20;
    pub const MAX_SIZE: u32 = 100;

    /// Page selector with `size` clamped to `1..=MAX_SIZE`.
    #[must_use]
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }

    #[must_use]
    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    /// Total matching items across all pages.
    pub total: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            page: request.page,
            size: request.size,
            total,
        }
    }

    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.size.max(1)))
    }
}
