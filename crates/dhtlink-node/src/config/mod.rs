//! Node configuration.
//!
//! Supports configuration from:
//! - TOML file (default: `dhtlink.toml`, or the path in `DHTLINK_CONFIG`)
//! - Environment variables with `DHTLINK__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `DHTLINK__BROKER__HOST=a1b2c3-ats.iot.eu-west-1.amazonaws.com`
//! - `DHTLINK__TELEMETRY__PUBLISH_INTERVAL_SECS=10`
//! - `DHTLINK__LOG__LEVEL=debug`
//!
//! In-file substitution examples:
//! ```toml
//! [tls]
//! ca_cert = "${CERT_DIR:-certs}/root-CA.crt"
//! ```

mod broker;
mod log;
mod reconnect;
mod telemetry;
mod tls;

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use dhtlink_client::ClientConfig;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub use self::log::LogConfig;
pub use broker::{
    BrokerConfig, DEFAULT_BROKER_HOST, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_PUBLISH_RETRIES,
};
pub use reconnect::{
    ReconnectConfig, DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_INTERVAL_SECS,
    DEFAULT_MIN_INTERVAL_SECS,
};
pub use telemetry::{
    TelemetryConfig, DEFAULT_PUBLISH_INTERVAL_SECS, DEFAULT_RETRY_INTERVAL_SECS,
    DEFAULT_SUBSCRIBER_POLL_MS, DEFAULT_TOPIC,
};
pub use tls::TlsConfig;

/// Config file used when `DHTLINK_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "dhtlink.toml";
/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "DHTLINK_CONFIG";

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub log: LogConfig,
    /// Broker connection.
    pub broker: BrokerConfig,
    /// TLS material.
    pub tls: TlsConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Telemetry topic and timing.
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// The config file path: `DHTLINK_CONFIG` if set, else `dhtlink.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.host", DEFAULT_BROKER_HOST)?
            .set_default("broker.port", dhtlink_client::DEFAULT_TLS_PORT as i64)?
            .set_default("broker.keep_alive", dhtlink_client::DEFAULT_KEEP_ALIVE as i64)?
            .set_default(
                "broker.command_timeout_secs",
                DEFAULT_COMMAND_TIMEOUT_SECS as i64,
            )?
            .set_default(
                "broker.connect_timeout_secs",
                DEFAULT_CONNECT_TIMEOUT_SECS as i64,
            )?
            .set_default("broker.clean_session", true)?
            .set_default("broker.auto_reconnect", true)?
            .set_default("broker.publish_retries", DEFAULT_PUBLISH_RETRIES as i64)?
            .set_default("tls.enabled", true)?
            .set_default("reconnect.min_interval_secs", DEFAULT_MIN_INTERVAL_SECS as i64)?
            .set_default("reconnect.max_interval_secs", DEFAULT_MAX_INTERVAL_SECS as i64)?
            .set_default("reconnect.max_attempts", DEFAULT_MAX_ATTEMPTS as i64)?
            .set_default("reconnect.jitter", DEFAULT_JITTER)?
            .set_default("telemetry.topic", DEFAULT_TOPIC)?
            .set_default("telemetry.qos", 0)?
            .set_default(
                "telemetry.publish_interval_secs",
                DEFAULT_PUBLISH_INTERVAL_SECS as i64,
            )?
            .set_default(
                "telemetry.retry_interval_secs",
                DEFAULT_RETRY_INTERVAL_SECS as i64,
            )?
            .set_default("telemetry.poll_interval_ms", DEFAULT_SUBSCRIBER_POLL_MS as i64)?;

        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content)?;
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        // DHTLINK__BROKER__HOST, DHTLINK__TLS__CA_CERT, ...
        let cfg = builder
            .add_source(
                Environment::with_prefix("DHTLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        let config: Config = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate().map_err(ConfigError::Validation)?;
        self.broker.validate().map_err(ConfigError::Validation)?;
        self.tls.validate().map_err(ConfigError::Validation)?;
        self.reconnect.validate().map_err(ConfigError::Validation)?;
        self.telemetry.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }

    /// Build the client configuration, using `default_client_id` when
    /// `broker.client_id` is unset.
    pub fn client_config(&self, default_client_id: &str) -> ClientConfig {
        let broker = &self.broker;
        let client_id = broker
            .client_id
            .clone()
            .unwrap_or_else(|| default_client_id.to_string());

        let mut client = ClientConfig::new(broker.host.clone(), broker.port)
            .client_id(client_id)
            .tls(self.tls.to_client())
            .keep_alive(broker.keep_alive)
            .command_timeout(Duration::from_secs(broker.command_timeout_secs))
            .connect_timeout(Duration::from_secs(broker.connect_timeout_secs))
            .clean_session(broker.clean_session)
            .auto_reconnect(broker.auto_reconnect)
            .reconnect(self.reconnect.to_client())
            .publish_retries(broker.publish_retries);
        if let Some(username) = &broker.username {
            client.username = Some(username.clone());
            client.password = broker.password.as_ref().map(|p| p.as_bytes().to_vec());
        }
        client
    }
}
