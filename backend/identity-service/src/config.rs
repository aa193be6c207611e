//! Configuration management for Identity Service
//!
//! Loads settings from environment variables; in debug builds a `.env` file is read first.
//!
//! # Example
//!
//! ```no_run
//! use identity_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use credential_engine::{Algorithm, EngineConfig};
use serde::{Deserialize, Serialize};
use tracing::info;
use transactional_outbox::RelayConfig;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub kafka: KafkaSettings,
    pub jwt: JwtSettings,
    pub email: EmailSettings,
    pub outbox: OutboxSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Self::from_env()
    }

    /// Read settings from the process environment only.
    pub fn from_env() -> Result<Self> {
        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            kafka: KafkaSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            email: EmailSettings::from_env()?,
            outbox: OutboxSettings::from_env()?,
        })
    }
}

fn parse_env<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {name}"))
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "20")?,
            acquire_timeout: parse_env("DATABASE_ACQUIRE_TIMEOUT", "5")?,
        })
    }
}

/// Kafka event streaming settings
///
/// An empty broker list runs the service without a broker; user events are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub user_events_topic: String,
    pub producer_timeout: u64,
}

impl KafkaSettings {
    fn from_env() -> Result<Self> {
        let brokers = env::var("KAFKA_BROKERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            brokers,
            user_events_topic: env::var("KAFKA_USER_EVENTS_TOPIC")
                .unwrap_or_else(|_| "identity.user.created".to_string()),
            producer_timeout: parse_env("KAFKA_PRODUCER_TIMEOUT", "5")?,
        })
    }
}

/// JWT signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub issuer: String,
    pub audience: String,
    pub expiry_seconds: u64,
    pub leeway_seconds: u64,
    pub access_token_algorithm: Algorithm,
    pub id_token_algorithm: Algorithm,
    pub revocation_purge_enabled: bool,
    pub revocation_purge_interval_seconds: u64,
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "IAMService.com".to_string()),
            audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "IAMService".to_string()),
            expiry_seconds: parse_env("JWT_EXPIRY_SECONDS", "3600")?,
            leeway_seconds: parse_env("JWT_LEEWAY_SECONDS", "60")?,
            access_token_algorithm: parse_env("JWT_ACCESS_TOKEN_ALGORITHM", "ES256")?,
            id_token_algorithm: parse_env("JWT_ID_TOKEN_ALGORITHM", "RS256")?,
            revocation_purge_enabled: parse_env("JWT_REVOCATION_PURGE_ENABLED", "false")?,
            revocation_purge_interval_seconds: parse_env(
                "JWT_REVOCATION_PURGE_INTERVAL_SECONDS",
                "3600",
            )?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            token_ttl: Duration::from_secs(self.expiry_seconds),
            leeway: Duration::from_secs(self.leeway_seconds),
        }
    }
}

/// Email service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    /// Empty host puts the email service in no-op mode
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: parse_env("SMTP_PORT", "1025")?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "user_test@example.com".to_string()),
            use_starttls: parse_env("SMTP_USE_STARTTLS", "false")?,
        })
    }
}

/// Outbox relay tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxSettings {
    pub delete_batch_size: i64,
    pub delete_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub delete_period_seconds: u64,
    pub retention_seconds: u64,
    pub fetch_error_backoff_ms: u64,
    pub metrics_enabled: bool,
}

impl OutboxSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            delete_batch_size: parse_env("OUTBOX_DELETE_BATCH_SIZE", "100")?,
            delete_interval_ms: parse_env("OUTBOX_DELETE_INTERVAL_MS", "500")?,
            retry_backoff_ms: parse_env("OUTBOX_RETRY_BACKOFF_MS", "5000")?,
            delete_period_seconds: parse_env("OUTBOX_DELETE_PERIOD_SECONDS", "86400")?,
            retention_seconds: parse_env("OUTBOX_RETENTION_SECONDS", "86400")?,
            fetch_error_backoff_ms: parse_env("OUTBOX_FETCH_ERROR_BACKOFF_MS", "0")?,
            metrics_enabled: parse_env("OUTBOX_METRICS_ENABLED", "true")?,
        })
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            delete_batch_size: self.delete_batch_size,
            delete_interval: Duration::from_millis(self.delete_interval_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            delete_period: Duration::from_secs(self.delete_period_seconds),
            retention: Duration::from_secs(self.retention_seconds),
            fetch_error_backoff: Duration::from_millis(self.fetch_error_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 7] = [
        "DATABASE_URL",
        "KAFKA_BROKERS",
        "JWT_ACCESS_TOKEN_ALGORITHM",
        "JWT_REVOCATION_PURGE_ENABLED",
        "OUTBOX_RETRY_BACKOFF_MS",
        "SMTP_PORT",
        "SMTP_USE_STARTTLS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/identity");

        let settings = Settings::from_env().unwrap();
        assert!(settings.kafka.brokers.is_empty());
        assert_eq!(settings.jwt.access_token_algorithm, Algorithm::ES256);
        assert_eq!(settings.jwt.id_token_algorithm, Algorithm::RS256);
        assert!(!settings.jwt.revocation_purge_enabled);

        let engine = settings.jwt.engine_config();
        assert_eq!(engine.issuer, "IAMService.com");
        assert_eq!(engine.audience, "IAMService");
        assert_eq!(engine.token_ttl, Duration::from_secs(3600));

        let relay = settings.outbox.relay_config();
        assert_eq!(relay.delete_batch_size, 100);
        assert_eq!(relay.retry_backoff, Duration::from_secs(5));
        assert!(relay.fetch_error_backoff.is_zero());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/identity");
        env::set_var("KAFKA_BROKERS", "kafka-1:9092, kafka-2:9092,");
        env::set_var("JWT_ACCESS_TOKEN_ALGORITHM", "HS512");
        env::set_var("JWT_REVOCATION_PURGE_ENABLED", "true");
        env::set_var("OUTBOX_RETRY_BACKOFF_MS", "250");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.kafka.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(settings.jwt.access_token_algorithm, Algorithm::HS512);
        assert!(settings.jwt.revocation_purge_enabled);
        assert_eq!(
            settings.outbox.relay_config().retry_backoff,
            Duration::from_millis(250)
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        clear_env();
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_reported() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/identity");
        env::set_var("SMTP_PORT", "not-a-port");
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("SMTP_PORT"));

        env::remove_var("SMTP_PORT");
        env::set_var("SMTP_USE_STARTTLS", "yes");
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("SMTP_USE_STARTTLS"));

        env::set_var("SMTP_USE_STARTTLS", "true");
        assert!(Settings::from_env().unwrap().email.use_starttls);

        env::remove_var("SMTP_USE_STARTTLS");
        env::set_var("JWT_ACCESS_TOKEN_ALGORITHM", "XS999");
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("JWT_ACCESS_TOKEN_ALGORITHM"));

        clear_env();
    }
}
