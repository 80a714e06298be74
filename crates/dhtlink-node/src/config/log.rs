//! Logging configuration.

use std::str::FromStr;

use log::LevelFilter;
use serde::Deserialize;

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: off, error, warn, info, debug, trace.
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), String> {
        LevelFilter::from_str(&self.level)
            .map(|_| ())
            .map_err(|_| format!("log.level '{}' is not a log level", self.level))
    }
}
