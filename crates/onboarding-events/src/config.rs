//! Broker and synchronization configuration.
//!
//! Everything can be loaded from environment variables (`from_env`) or built
//! in code; defaults match the production settings.

use crate::error::EventError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default consumer group shared by every consumer instance of the service.
pub const DEFAULT_CONSUMER_GROUP: &str = "registration-service";

/// Default client identifier reported to the broker.
pub const DEFAULT_CLIENT_ID: &str = "onboarding-sync";

/// Security protocol for the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityProtocol {
    /// No encryption or authentication.
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    /// Value understood by librdkafka's `security.protocol`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::Ssl => "SSL",
            Self::SaslPlaintext => "SASL_PLAINTEXT",
            Self::SaslSsl => "SASL_SSL",
        }
    }

    /// Whether this protocol needs SASL credentials.
    #[must_use]
    pub fn requires_sasl(&self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }
}

impl FromStr for SecurityProtocol {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Plaintext, Self::Ssl, Self::SaslPlaintext, Self::SaslSsl]
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EventError::ConfigInvalid {
                var: "KAFKA_SECURITY_PROTOCOL".to_string(),
                reason: format!("Unknown protocol: {s}"),
            })
    }
}

/// SASL mechanism for broker authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    /// Value understood by librdkafka's `sasl.mechanism`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('_', "-");
        [Self::Plain, Self::ScramSha256, Self::ScramSha512]
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| EventError::ConfigInvalid {
                var: "KAFKA_SASL_MECHANISM".to_string(),
                reason: format!("Unknown mechanism: {s}"),
            })
    }
}

/// SASL credentials for authentication.
#[derive(Clone)]
pub struct SaslCredentials {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Broker connection configuration.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses.
    pub bootstrap_servers: String,
    pub security_protocol: SecurityProtocol,
    /// Present whenever `security_protocol` requires SASL.
    pub sasl: Option<SaslCredentials>,
    pub client_id: String,
    /// Logical consumer group for approval events.
    pub consumer_group: String,
}

fn required(var: &str) -> Result<String, EventError> {
    env::var(var).map_err(|_| EventError::ConfigMissing {
        var: var.to_string(),
    })
}

impl KafkaConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `KAFKA_BOOTSTRAP_SERVERS`
    ///
    /// Optional:
    /// - `KAFKA_SECURITY_PROTOCOL`: PLAINTEXT (default), SSL, `SASL_PLAINTEXT`, `SASL_SSL`
    /// - `KAFKA_CLIENT_ID` (default: "onboarding-sync")
    /// - `ONBOARDING_CONSUMER_GROUP` (default: "registration-service")
    /// - `KAFKA_SASL_MECHANISM`, `KAFKA_SASL_USERNAME`, `KAFKA_SASL_PASSWORD`
    ///   (required when the protocol uses SASL)
    pub fn from_env() -> Result<Self, EventError> {
        let mut builder = Self::builder()
            .bootstrap_servers(required("KAFKA_BOOTSTRAP_SERVERS")?)
            .client_id(env::var("KAFKA_CLIENT_ID").unwrap_or_else(|_| DEFAULT_CLIENT_ID.to_string()))
            .consumer_group(
                env::var("ONBOARDING_CONSUMER_GROUP")
                    .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string()),
            );

        let protocol = match env::var("KAFKA_SECURITY_PROTOCOL") {
            Ok(v) => v.parse::<SecurityProtocol>()?,
            Err(_) => SecurityProtocol::Plaintext,
        };
        builder = builder.security_protocol(protocol);

        if protocol.requires_sasl() {
            builder = builder.sasl(
                required("KAFKA_SASL_MECHANISM")?.parse()?,
                required("KAFKA_SASL_USERNAME")?,
                required("KAFKA_SASL_PASSWORD")?,
            );
        }

        builder.build()
    }

    #[must_use]
    pub fn builder() -> KafkaConfigBuilder {
        KafkaConfigBuilder::default()
    }

    /// Settings common to producer and consumer clients.
    #[cfg(feature = "kafka")]
    pub(crate) fn client_config(&self) -> rdkafka::config::ClientConfig {
        let mut client_config = rdkafka::config::ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set("security.protocol", self.security_protocol.as_str());

        if let Some(sasl) = &self.sasl {
            client_config
                .set("sasl.mechanism", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        client_config
    }
}

/// Builder for `KafkaConfig`.
#[derive(Debug, Default)]
pub struct KafkaConfigBuilder {
    bootstrap_servers: Option<String>,
    security_protocol: Option<SecurityProtocol>,
    sasl: Option<SaslCredentials>,
    client_id: Option<String>,
    consumer_group: Option<String>,
}

impl KafkaConfigBuilder {
    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    #[must_use]
    pub fn security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.security_protocol = Some(protocol);
        self
    }

    #[must_use]
    pub fn sasl(mut self, mechanism: SaslMechanism, username: String, password: String) -> Self {
        self.sasl = Some(SaslCredentials {
            mechanism,
            username,
            password,
        });
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Build the configuration, validating SASL requirements.
    pub fn build(self) -> Result<KafkaConfig, EventError> {
        let bootstrap_servers = self
            .bootstrap_servers
            .filter(|s| !s.trim().is_empty())
            .ok_or(EventError::ConfigMissing {
                var: "bootstrap_servers".to_string(),
            })?;

        let security_protocol = self.security_protocol.unwrap_or_default();
        if security_protocol.requires_sasl() && self.sasl.is_none() {
            return Err(EventError::ConfigMissing {
                var: "sasl_credentials".to_string(),
            });
        }

        Ok(KafkaConfig {
            bootstrap_servers,
            security_protocol,
            sasl: self.sasl,
            client_id: self.client_id.unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
        })
    }
}

/// Read an optional variable, parsing it when present.
fn env_or<T>(var: &str, default: T) -> Result<T, EventError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| EventError::ConfigInvalid {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Producer delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Bounded wait for delivery confirmation.
    pub delivery_timeout: Duration,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

/// Consumer redelivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Delivery attempts before a retryable failure is dead-lettered.
    pub max_attempts: u32,
    /// Fixed wait between redeliveries.
    pub redelivery_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            redelivery_backoff: Duration::from_secs(1),
        }
    }
}

/// Thresholds for [`SyncHealthMonitor`](crate::health::SyncHealthMonitor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Any counter at or above this reports WARNING.
    pub warning: u32,
    /// Any counter at or above this reports DOWN.
    pub down: u32,
    /// Divergence count that raises a critical sync failure.
    pub critical: u32,
    /// Counters whose last error is older than this are reset.
    pub quiescence: chrono::Duration,
    /// Whether reaching `critical` returns an error or only counts.
    pub fail_on_critical: bool,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warning: 5,
            down: 10,
            critical: 15,
            quiescence: chrono::Duration::hours(1),
            fail_on_critical: true,
        }
    }
}

/// Idempotency ledger retention settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Entries older than this are evicted.
    pub retention: chrono::Duration,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::hours(24),
            sweep_interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// All settings governing the store/broker consistency layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub health: HealthThresholds,
    pub ledger: LedgerSettings,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional and fall back to the defaults:
    /// - `ONBOARDING_PUBLISH_TIMEOUT_MS` (5000)
    /// - `ONBOARDING_CONSUMER_MAX_ATTEMPTS` (3)
    /// - `ONBOARDING_CONSUMER_BACKOFF_MS` (1000)
    /// - `ONBOARDING_HEALTH_WARNING` (5), `ONBOARDING_HEALTH_DOWN` (10),
    ///   `ONBOARDING_HEALTH_CRITICAL` (15)
    /// - `ONBOARDING_HEALTH_QUIESCENCE_SECS` (3600)
    /// - `ONBOARDING_HEALTH_FAIL_ON_CRITICAL` (true)
    /// - `ONBOARDING_LEDGER_RETENTION_SECS` (86400)
    /// - `ONBOARDING_LEDGER_SWEEP_SECS` (21600)
    pub fn from_env() -> Result<Self, EventError> {
        let defaults = Self::default();

        let config = Self {
            producer: ProducerSettings {
                delivery_timeout: Duration::from_millis(env_or(
                    "ONBOARDING_PUBLISH_TIMEOUT_MS",
                    defaults.producer.delivery_timeout.as_millis() as u64,
                )?),
            },
            consumer: ConsumerSettings {
                max_attempts: env_or(
                    "ONBOARDING_CONSUMER_MAX_ATTEMPTS",
                    defaults.consumer.max_attempts,
                )?,
                redelivery_backoff: Duration::from_millis(env_or(
                    "ONBOARDING_CONSUMER_BACKOFF_MS",
                    defaults.consumer.redelivery_backoff.as_millis() as u64,
                )?),
            },
            health: HealthThresholds {
                warning: env_or("ONBOARDING_HEALTH_WARNING", defaults.health.warning)?,
                down: env_or("ONBOARDING_HEALTH_DOWN", defaults.health.down)?,
                critical: env_or("ONBOARDING_HEALTH_CRITICAL", defaults.health.critical)?,
                quiescence: chrono::Duration::seconds(env_or(
                    "ONBOARDING_HEALTH_QUIESCENCE_SECS",
                    defaults.health.quiescence.num_seconds(),
                )?),
                fail_on_critical: env_or(
                    "ONBOARDING_HEALTH_FAIL_ON_CRITICAL",
                    defaults.health.fail_on_critical,
                )?,
            },
            ledger: LedgerSettings {
                retention: chrono::Duration::seconds(env_or(
                    "ONBOARDING_LEDGER_RETENTION_SECS",
                    defaults.ledger.retention.num_seconds(),
                )?),
                sweep_interval: Duration::from_secs(env_or(
                    "ONBOARDING_LEDGER_SWEEP_SECS",
                    defaults.ledger.sweep_interval.as_secs(),
                )?),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the consistency layer misbehave.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.consumer.max_attempts == 0 {
            return Err(EventError::ConfigInvalid {
                var: "ONBOARDING_CONSUMER_MAX_ATTEMPTS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.producer.delivery_timeout.is_zero() {
            return Err(EventError::ConfigInvalid {
                var: "ONBOARDING_PUBLISH_TIMEOUT_MS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let h = &self.health;
        if !(h.warning <= h.down && h.down <= h.critical) {
            return Err(EventError::ConfigInvalid {
                var: "ONBOARDING_HEALTH_*".to_string(),
                reason: format!(
                    "thresholds must satisfy warning <= down <= critical (got {} / {} / {})",
                    h.warning, h.down, h.critical
                ),
            });
        }

        if self.ledger.sweep_interval.is_zero() {
            return Err(EventError::ConfigInvalid {
                var: "ONBOARDING_LEDGER_SWEEP_SECS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_protocol_from_str() {
        assert_eq!(
            "PLAINTEXT".parse::<SecurityProtocol>().unwrap(),
            SecurityProtocol::Plaintext
        );
        assert_eq!(
            "sasl_ssl".parse::<SecurityProtocol>().unwrap(),
            SecurityProtocol::SaslSsl
        );
        assert!("INVALID".parse::<SecurityProtocol>().is_err());
    }

    #[test]
    fn test_sasl_mechanism_from_str() {
        assert_eq!(
            "SCRAM_SHA_512".parse::<SaslMechanism>().unwrap(),
            SaslMechanism::ScramSha512
        );
        assert_eq!(
            "scram-sha-256".parse::<SaslMechanism>().unwrap(),
            SaslMechanism::ScramSha256
        );
        assert!("KERBEROS".parse::<SaslMechanism>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = KafkaConfig::builder()
            .bootstrap_servers("localhost:9092")
            .build()
            .unwrap();

        assert_eq!(config.security_protocol, SecurityProtocol::Plaintext);
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.consumer_group, DEFAULT_CONSUMER_GROUP);
        assert!(config.sasl.is_none());
    }

    #[test]
    fn test_builder_requires_servers() {
        match KafkaConfig::builder().bootstrap_servers("  ").build() {
            Err(EventError::ConfigMissing { var }) => assert_eq!(var, "bootstrap_servers"),
            other => panic!("Expected ConfigMissing error, got {other:?}"),
        }
    }

    #[test]
    fn test_builder_sasl_without_credentials() {
        let result = KafkaConfig::builder()
            .bootstrap_servers("localhost:9092")
            .security_protocol(SecurityProtocol::SaslSsl)
            .build();

        match result {
            Err(EventError::ConfigMissing { var }) => assert_eq!(var, "sasl_credentials"),
            other => panic!("Expected ConfigMissing error, got {other:?}"),
        }
    }

    #[test]
    fn test_sasl_password_is_redacted() {
        let config = KafkaConfig::builder()
            .bootstrap_servers("broker:9093")
            .security_protocol(SecurityProtocol::SaslSsl)
            .sasl(SaslMechanism::Plain, "svc".to_string(), "hunter2".to_string())
            .build()
            .unwrap();

        let debug = format!("{config:?}");
        assert!(debug.contains("svc"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_from_env_missing_bootstrap() {
        env::remove_var("KAFKA_BOOTSTRAP_SERVERS");
        assert!(matches!(
            KafkaConfig::from_env(),
            Err(EventError::ConfigMissing { .. })
        ));
    }

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.producer.delivery_timeout, Duration::from_secs(5));
        assert_eq!(config.consumer.max_attempts, 3);
        assert_eq!(config.consumer.redelivery_backoff, Duration::from_secs(1));
        assert_eq!(config.health.warning, 5);
        assert_eq!(config.health.down, 10);
        assert_eq!(config.health.critical, 15);
        assert_eq!(config.health.quiescence, chrono::Duration::hours(1));
        assert!(config.health.fail_on_critical);
        assert_eq!(config.ledger.retention, chrono::Duration::hours(24));
        assert_eq!(config.ledger.sweep_interval, Duration::from_secs(21_600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_config_rejects_inverted_thresholds() {
        let mut config = SyncConfig::default();
        config.health.warning = 12;

        match config.validate() {
            Err(EventError::ConfigInvalid { var, .. }) => assert_eq!(var, "ONBOARDING_HEALTH_*"),
            other => panic!("Expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_config_rejects_zero_attempts() {
        let mut config = SyncConfig::default();
        config.consumer.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    // Single test so the ONBOARDING_* variables are never mutated concurrently.
    #[test]
    fn test_sync_config_from_env() {
        env::set_var("ONBOARDING_CONSUMER_MAX_ATTEMPTS", "5");
        env::set_var("ONBOARDING_HEALTH_FAIL_ON_CRITICAL", "false");
        let config = SyncConfig::from_env();
        env::remove_var("ONBOARDING_CONSUMER_MAX_ATTEMPTS");
        env::remove_var("ONBOARDING_HEALTH_FAIL_ON_CRITICAL");

        let config = config.unwrap();
        assert_eq!(config.consumer.max_attempts, 5);
        assert!(!config.health.fail_on_critical);
        assert_eq!(config.health.critical, 15);

        env::set_var("ONBOARDING_LEDGER_SWEEP_SECS", "six hours");
        let result = SyncConfig::from_env();
        env::remove_var("ONBOARDING_LEDGER_SWEEP_SECS");

        match result {
            Err(EventError::ConfigInvalid { var, .. }) => {
                assert_eq!(var, "ONBOARDING_LEDGER_SWEEP_SECS");
            }
            other => panic!("Expected ConfigInvalid, got {other:?}"),
        }
    }
}
