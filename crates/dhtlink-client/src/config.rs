//! Client configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Default MQTT-over-TLS port.
pub const DEFAULT_TLS_PORT: u16 = 8883;
/// Default keep-alive in seconds.
pub const DEFAULT_KEEP_ALIVE: u16 = 600;
/// Default time to wait for CONNACK, SUBACK, PUBACK and PINGRESP.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);
/// Default TCP connect + TLS handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker host name (also used for SNI unless overridden).
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier, unique per broker.
    pub client_id: String,
    /// Username for brokers using password authentication.
    pub username: Option<String>,
    /// Password for brokers using password authentication.
    pub password: Option<Vec<u8>>,
    /// TLS settings.
    pub tls: TlsConfig,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    /// Time allowed for any acknowledgment from the broker.
    pub command_timeout: Duration,
    /// TCP connect and TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Clean session flag.
    pub clean_session: bool,
    /// Reconnect automatically after a transport loss.
    pub auto_reconnect: bool,
    /// Backoff settings for automatic reconnects.
    pub reconnect: ReconnectConfig,
    /// How many times an unacknowledged QoS 1 publish is re-sent.
    pub publish_retries: u32,
    /// Keep registered subscriptions after an explicit `disconnect()`.
    pub retain_subscriptions: bool,
    /// Maximum inbound packet size in bytes (0 = protocol maximum).
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_TLS_PORT,
            client_id: String::new(),
            username: None,
            password: None,
            tls: TlsConfig::default(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            clean_session: true,
            auto_reconnect: true,
            reconnect: ReconnectConfig::default(),
            publish_retries: 3,
            retain_subscriptions: true,
            max_packet_size: 0,
        }
    }
}

impl ClientConfig {
    /// Create a new config for the given broker.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the client ID.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set username and password.
    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set TLS settings.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set the acknowledgment timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Enable or disable automatic reconnects.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set reconnect backoff settings.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the QoS 1 resend budget.
    pub fn publish_retries(mut self, retries: u32) -> Self {
        self.publish_retries = retries;
        self
    }

    /// Keep or drop subscriptions on explicit disconnect.
    pub fn retain_subscriptions(mut self, retain: bool) -> Self {
        self.retain_subscriptions = retain;
        self
    }

    /// `host:port`, for log and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TLS configuration.
///
/// With no `ca_cert`, the webpki root store is used. Mutual TLS is enabled
/// when both `client_cert` and `client_key` are set.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Wrap the TCP stream in TLS. Plain TCP is meant for local brokers.
    pub enabled: bool,
    /// PEM file with the root CA certificate(s).
    pub ca_cert: Option<PathBuf>,
    /// PEM file with the client certificate chain.
    pub client_cert: Option<PathBuf>,
    /// PEM file with the client private key.
    pub client_key: Option<PathBuf>,
    /// Override the name used for SNI and certificate verification.
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            server_name: None,
        }
    }
}

impl TlsConfig {
    /// Plain TCP, no TLS.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub min_interval: Duration,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Relative jitter applied to each delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(128),
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = ClientConfig::new("broker.example", 1883)
            .client_id("dht11_node1_pub")
            .keep_alive(30)
            .command_timeout(Duration::from_secs(2))
            .auto_reconnect(false)
            .tls(TlsConfig::disabled());

        assert_eq!(config.address(), "broker.example:1883");
        assert_eq!(config.client_id, "dht11_node1_pub");
        assert_eq!(config.keep_alive, 30);
        assert_eq!(config.command_timeout, Duration::from_secs(2));
        assert!(!config.auto_reconnect);
        assert!(!config.tls.enabled);
        assert!(config.clean_session);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
