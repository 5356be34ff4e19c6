//! Building blocks of the onboarding sync service binary.
//!
//! The binary itself needs the `kafka` feature; everything here also builds
//! and tests without librdkafka.

pub mod config;
pub mod consumers;
pub mod logging;
