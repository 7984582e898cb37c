//! # Telemetry Payloads
//!
//! Builds the record published every cycle and renders it to the wire format:
//!
//! ```text
//! {"temperature":27.3,"humidity":64.1,"co2":1187.0,"pm25":42}
//! ```
//!
//! The record is built, serialized, sent and dropped within one cycle. Readings come
//! from whatever [`SensorSuite`] the node was assembled with.

pub mod sensors;

use serde::Serialize;
use thiserror::Error;

use sensors::{SensorError, SensorSuite};

/// Upper bound for a serialized payload in bytes.
pub const MAX_PAYLOAD_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Failed to serialize telemetry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Telemetry payload is {len} bytes, limit is {MAX_PAYLOAD_LEN}")]
    TooLarge { len: usize },
}

/// One cycle's worth of readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub temperature: f32,
    pub humidity: f32,
    pub co2: f32,
    pub pm25: i32,
}

impl TelemetryRecord {
    /// Compact JSON with exactly the four record keys.
    pub fn to_json(&self) -> Result<String, PayloadError> {
        let json = serde_json::to_string(self)?;
        if json.len() > MAX_PAYLOAD_LEN {
            return Err(PayloadError::TooLarge { len: json.len() });
        }
        Ok(json)
    }
}

pub struct PayloadBuilder {
    sensors: Box<dyn SensorSuite>,
}

impl PayloadBuilder {
    pub fn new(sensors: Box<dyn SensorSuite>) -> Self {
        Self { sensors }
    }

    pub fn build(&mut self) -> Result<TelemetryRecord, SensorError> {
        Ok(TelemetryRecord {
            temperature: self.sensors.read_temperature()?,
            humidity: self.sensors.read_humidity()?,
            co2: self.sensors.read_co2()?,
            pm25: self.sensors.read_pm25()?,
        })
    }
}
