use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::relay::RelayConfig;
use crate::utils::RetryConfig;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub relay: RelaySettings,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the gRPC server binds to
    pub grpc_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    pub max_connections: u32,
    /// Apply embedded migrations at startup
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub message_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    /// Failed delivery rounds before an outbox row is dead-lettered
    pub max_attempts: i32,
}

impl RelaySettings {
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            // one poll interval keeps the relay behind the post-commit publish
            min_age: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Settings {
    /// Load configuration from the `config` directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("server.grpc_addr", "0.0.0.0:7000")?
            .set_default("database.url", "postgres://localhost/money_movement")?
            .set_default("database.max_connections", 10)?
            .set_default("database.run_migrations", true)?
            .set_default("kafka.brokers", "my-cluster-kafka-bootstrap:9092")?
            .set_default("kafka.message_timeout_ms", 5000)?
            .set_default("relay.poll_interval_ms", 2000)?
            .set_default("relay.batch_size", 100)?
            .set_default("relay.max_attempts", 5)?
            .set_default("metrics.port", 9090)?
            .set_default("logging.level", "info,money_movement=debug")?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // config/production.toml etc.
            .add_source(
                File::from(config_dir.join(
                    std::env::var("MONEY_MOVEMENT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // MONEY_MOVEMENT_DATABASE__URL, MONEY_MOVEMENT_KAFKA__BROKERS, ...
            .add_source(
                Environment::with_prefix("MONEY_MOVEMENT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
