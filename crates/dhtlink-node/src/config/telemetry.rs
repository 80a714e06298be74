//! Telemetry topic and timing.

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_TOPIC: &str = "node1/dht11";
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_SUBSCRIBER_POLL_MS: u64 = 100;

/// Telemetry configuration shared by the publisher and the subscriber.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Topic readings are published to and subscribed from.
    pub topic: String,
    /// QoS for both publishing and subscribing (0 or 1).
    pub qos: u8,
    /// Wait after a successful reading.
    pub publish_interval_secs: u64,
    /// Wait after a failed sensor read.
    pub retry_interval_secs: u64,
    /// Subscriber `yield_now` slice.
    pub poll_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            qos: 0,
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            poll_interval_ms: DEFAULT_SUBSCRIBER_POLL_MS,
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        dhtlink_core::validate_topic_name(&self.topic)
            .map_err(|e| format!("telemetry.topic '{}': {}", self.topic, e))?;
        if self.qos > 1 {
            return Err(format!("telemetry.qos must be 0 or 1, got {}", self.qos));
        }
        if self.publish_interval_secs == 0 {
            return Err("telemetry.publish_interval_secs must be at least 1".to_string());
        }
        if self.retry_interval_secs == 0 {
            return Err("telemetry.retry_interval_secs must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("telemetry.poll_interval_ms must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
