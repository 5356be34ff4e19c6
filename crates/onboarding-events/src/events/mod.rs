//! Built-in event types.
//!
//! - Registration approval events (published on PENDING → APPROVED)

pub mod approval;

pub use approval::{ApprovalEvent, DEFAULT_ASSIGNED_ROLE};
