//! Logger setup for the binaries.

use env_logger::Env;

use crate::config::LogConfig;

/// Install `env_logger` with the configured level as the default filter.
/// `RUST_LOG` takes precedence when set.
pub fn init(config: &LogConfig) {
    env_logger::Builder::from_env(Env::default().default_filter_or(&config.level))
        .format_timestamp_millis()
        .init();
}
