//! Sensor collaborator.
//!
//! Bit-level DHT11 acquisition lives outside this crate; a hardware driver
//! implements [`Sensor`] and the publisher only sees finished samples.

use thiserror::Error;

/// One temperature/humidity reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("Sensor did not respond")]
    Timeout,

    #[error("Checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    Checksum { expected: u8, actual: u8 },

    #[error("Sensor error: {0}")]
    Other(String),
}

pub trait Sensor {
    fn read_sample(&mut self) -> Result<Sample, SensorError>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn read_sample(&mut self) -> Result<Sample, SensorError> {
        (**self).read_sample()
    }
}

/// Fixed readings for boards without a DHT11 attached.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    sample: Sample,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSensor {
    /// 32.00 °C and 50.00 %.
    pub fn new() -> Self {
        Self::with_sample(Sample {
            temperature: 32.0,
            humidity: 50.0,
        })
    }

    pub fn with_sample(sample: Sample) -> Self {
        Self { sample }
    }
}

impl Sensor for SimulatedSensor {
    fn read_sample(&mut self) -> Result<Sample, SensorError> {
        Ok(self.sample)
    }
}
