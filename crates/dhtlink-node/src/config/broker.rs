//! Broker connection configuration.

use serde::Deserialize;

use dhtlink_client::{DEFAULT_KEEP_ALIVE, DEFAULT_TLS_PORT};

/// Default broker host.
pub const DEFAULT_BROKER_HOST: &str = "localhost";
/// Default CONNACK/SUBACK/PUBACK timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 20;
/// Default TCP connect + TLS handshake timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
/// Default QoS 1 resend budget.
pub const DEFAULT_PUBLISH_RETRIES: u32 = 3;

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier. Each binary has its own default when unset.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive in seconds (0 = disabled).
    pub keep_alive: u16,
    pub command_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub clean_session: bool,
    pub auto_reconnect: bool,
    pub publish_retries: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_TLS_PORT,
            client_id: None,
            username: None,
            password: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            clean_session: true,
            auto_reconnect: true,
            publish_retries: DEFAULT_PUBLISH_RETRIES,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("broker.host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("broker.port must be non-zero".to_string());
        }
        if self.command_timeout_secs == 0 {
            return Err("broker.command_timeout_secs must be at least 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("broker.connect_timeout_secs must be at least 1".to_string());
        }
        if let Some(id) = &self.client_id {
            if id.len() > 23 {
                log::warn!(
                    "broker.client_id '{}' is longer than 23 bytes; some brokers reject it",
                    id
                );
            }
        }
        if self.password.is_some() && self.username.is_none() {
            return Err("broker.password requires broker.username".to_string());
        }
        Ok(())
    }
}
