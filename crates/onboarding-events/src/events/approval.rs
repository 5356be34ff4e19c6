//! Registration approval events.

use crate::event::{DedupeKey, Event};
use serde::{Deserialize, Serialize};

/// Role assigned to every newly approved registration.
pub const DEFAULT_ASSIGNED_ROLE: &str = "USER";

/// Published once per successful PENDING → APPROVED transition.
///
/// Downstream services onboard the person using `correlation_id` as the
/// shared identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEvent {
    /// Stable cross-service identifier assigned at registration.
    pub correlation_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Role the downstream service should grant.
    pub assigned_role: String,
}

impl Event for ApprovalEvent {
    const TOPIC: &'static str = "registration.approved";
    const DEAD_LETTER_TOPIC: &'static str = "registration.approved.dlt";
    const EVENT_TYPE: &'static str = "registration.approved";

    fn partition_key(&self) -> String {
        self.email.clone()
    }

    fn dedupe_key(&self) -> DedupeKey {
        DedupeKey::new(format!("{}-{}", self.correlation_id, self.email))
    }
}
