//! Service configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing required variable or an unparsable value
//! stops the service before anything connects.

use crate::logging::LogFormat;
use onboarding_events::{EventError, SyncConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "kafka")]
use onboarding_events::KafkaConfig;

const DEFAULT_LOG_FILTER: &str = "info,onboarding=debug";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error(transparent)]
    Sync(#[from] EventError),
}

/// Everything the service needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Consumer runner tasks in the consumer group.
    pub consumer_instances: usize,
    pub log_filter: String,
    pub log_format: LogFormat,
    /// How often the sync health report is logged.
    pub health_report_interval: Duration,
    pub sync: SyncConfig,
    #[cfg(feature = "kafka")]
    pub kafka: KafkaConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Required: `DATABASE_URL` (and `KAFKA_BOOTSTRAP_SERVERS` with the
    /// `kafka` feature). Optional: `DATABASE_MAX_CONNECTIONS` (10),
    /// `ONBOARDING_CONSUMER_INSTANCES` (1), `LOG_FILTER`, `LOG_FORMAT` (json),
    /// `ONBOARDING_HEALTH_REPORT_SECS` (60), plus everything
    /// [`SyncConfig::from_env`] reads.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let consumer_instances: usize = parse_or("ONBOARDING_CONSUMER_INSTANCES", 1)?;
        if consumer_instances == 0 {
            return Err(ConfigError::InvalidValue {
                var: "ONBOARDING_CONSUMER_INSTANCES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            consumer_instances,
            log_filter: env::var("LOG_FILTER").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
            log_format: parse_or("LOG_FORMAT", LogFormat::Json)?,
            health_report_interval: Duration::from_secs(parse_or(
                "ONBOARDING_HEALTH_REPORT_SECS",
                60,
            )?),
            sync: SyncConfig::from_env()?,
            #[cfg(feature = "kafka")]
            kafka: KafkaConfig::from_env()?,
        })
    }
}

fn parse_or<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    var: var.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
