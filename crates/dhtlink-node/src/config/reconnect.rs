//! Reconnect backoff configuration.

use std::time::Duration;

use serde::Deserialize;

use dhtlink_client::ReconnectConfig as ClientReconnectConfig;

pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_MAX_INTERVAL_SECS: u64 = 128;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_JITTER: f64 = 0.2;

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay; doubles on every failed attempt.
    pub min_interval_secs: u64,
    /// Cap for a single delay.
    pub max_interval_secs: u64,
    /// Attempts before giving up (0 = never give up).
    pub max_attempts: u32,
    /// Relative jitter, 0.0 to below 1.0.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            max_interval_secs: DEFAULT_MAX_INTERVAL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_interval_secs == 0 {
            return Err("reconnect.min_interval_secs must be at least 1".to_string());
        }
        if self.max_interval_secs < self.min_interval_secs {
            return Err(format!(
                "reconnect.max_interval_secs ({}) must be >= min_interval_secs ({})",
                self.max_interval_secs, self.min_interval_secs
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(format!(
                "reconnect.jitter must be in [0.0, 1.0), got {}",
                self.jitter
            ));
        }
        Ok(())
    }

    pub(crate) fn to_client(&self) -> ClientReconnectConfig {
        ClientReconnectConfig {
            min_interval: Duration::from_secs(self.min_interval_secs),
            max_interval: Duration::from_secs(self.max_interval_secs),
            max_attempts: self.max_attempts,
            jitter: self.jitter,
        }
    }
}
