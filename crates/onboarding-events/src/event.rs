//! Event trait definition for type-safe event publishing/consuming.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Deterministic identifier derived from event content, used to detect
/// redelivery of the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupeKey(String);

impl DedupeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for types that can be published and consumed as broker events.
///
/// Implementors define the topic, the dead-letter topic and how to derive
/// both the partition key and the dedupe key from the payload. The payload
/// itself is serialized as JSON.
///
/// # Example
///
/// ```rust
/// use serde::{Serialize, Deserialize};
/// use onboarding_events::{DedupeKey, Event};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// pub struct AccountClosed {
///     pub account_id: String,
/// }
///
/// impl Event for AccountClosed {
///     const TOPIC: &'static str = "account.closed";
///     const DEAD_LETTER_TOPIC: &'static str = "account.closed.dlt";
///     const EVENT_TYPE: &'static str = "account.closed";
///
///     fn partition_key(&self) -> String {
///         self.account_id.clone()
///     }
///
///     fn dedupe_key(&self) -> DedupeKey {
///         DedupeKey::new(self.account_id.clone())
///     }
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The topic events of this type are published to and consumed from.
    const TOPIC: &'static str;

    /// The fixed dead-letter destination for this event type.
    const DEAD_LETTER_TOPIC: &'static str;

    /// The fully qualified event type name, used in logs and errors.
    const EVENT_TYPE: &'static str;

    /// Key used for partition assignment on the broker.
    fn partition_key(&self) -> String;

    /// Key used by consumers to suppress redelivered duplicates.
    fn dedupe_key(&self) -> DedupeKey;
}
