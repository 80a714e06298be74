//! Node error type.

use dhtlink_client::ClientError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::sensor::SensorError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error("MQTT client error: {0}")]
    Client(#[from] ClientError),

    #[error("Failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
