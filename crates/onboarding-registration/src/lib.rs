//! # onboarding-registration
//!
//! Registration approval state machine on top of a pluggable record store.
//!
//! [`RegistrationService`] owns the write-then-publish path: the record
//! store commits first, then the approval event goes out through
//! [`onboarding_events::EventProducer`]. [`ApprovalSyncHandler`] is the
//! consumer-side counterpart that applies approval events idempotently.
//!
//! Two store adapters are provided: [`InMemoryRegistrationStore`] and
//! [`PgRegistrationStore`].

pub mod error;
pub mod handler;
pub mod model;
pub mod service;
pub mod store;

pub use error::RegistrationError;
pub use handler::ApprovalSyncHandler;
pub use model::{
    normalize_email, ApprovalRecord, ApprovalStatus, NewApprovalRecord, Page, PageRequest,
};
pub use service::{RegistrationConfig, RegistrationService};
pub use store::{
    InMemoryRegistrationStore, PgRegistrationStore, RegistrationStore, StoreError,
    EMAIL_UNIQUE_CONSTRAINT,
};
