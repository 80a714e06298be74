//! dhtlink-node - DHT11 telemetry over MQTT/TLS.
//!
//! Configuration loading, logger setup, the sensor seam and the
//! publisher/subscriber loops shared by the `dht-publisher` and
//! `dht-subscriber` binaries.

pub mod config;
pub mod error;
pub mod logging;
pub mod sensor;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use error::{NodeError, Result};
pub use sensor::{Sample, Sensor, SensorError, SimulatedSensor};
pub use telemetry::{
    format_message, format_payload, run_publisher, run_subscriber, TelemetryLink,
    TelemetryPublisher, TelemetrySink, PUBLISHER_CLIENT_ID, SUBSCRIBER_CLIENT_ID, TIME_FORMAT,
};
