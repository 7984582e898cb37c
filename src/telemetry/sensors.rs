//! Sensor sources feeding the payload builder.
//!
//! [`MockSensors`] draws uniformly distributed values at one decimal of precision for
//! temperature and humidity and whole numbers for CO2 and PM2.5. [`SysfsSensors`] reads
//! one value per file, which covers Linux IIO devices and any helper process that
//! writes its latest reading to a file.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::config::SysfsChannels;
use crate::network::clock_seed;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unparsable reading '{value}' in {path}")]
    Parse { path: PathBuf, value: String },

    #[error("Reading {value} from {path} is out of range")]
    OutOfRange { path: PathBuf, value: f64 },
}

/// A set of the four quantities a telemetry record needs.
pub trait SensorSuite: Send {
    fn read_temperature(&mut self) -> Result<f32, SensorError>;
    fn read_humidity(&mut self) -> Result<f32, SensorError>;
    fn read_co2(&mut self) -> Result<f32, SensorError>;
    fn read_pm25(&mut self) -> Result<i32, SensorError>;
}

/// Random stand-in for real hardware.
pub struct MockSensors {
    rng: StdRng,
}

impl MockSensors {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seeded_from_clock() -> Self {
        Self::with_seed(clock_seed())
    }
}

impl SensorSuite for MockSensors {
    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        Ok(self.rng.gen_range(200..350) as f32 / 10.0)
    }

    fn read_humidity(&mut self) -> Result<f32, SensorError> {
        Ok(self.rng.gen_range(300..900) as f32 / 10.0)
    }

    fn read_co2(&mut self) -> Result<f32, SensorError> {
        Ok(self.rng.gen_range(400..2000) as f32)
    }

    fn read_pm25(&mut self) -> Result<i32, SensorError> {
        Ok(self.rng.gen_range(5..150))
    }
}

/// A single value file and the factor converting its raw content to the reported unit.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SensorChannel {
    pub path: PathBuf,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

pub struct SysfsSensors {
    channels: SysfsChannels,
}

impl SysfsSensors {
    pub fn new(channels: SysfsChannels) -> Self {
        Self { channels }
    }
}

fn read_channel(channel: &SensorChannel) -> Result<f64, SensorError> {
    let raw = std::fs::read_to_string(&channel.path).map_err(|source| SensorError::Read {
        path: channel.path.clone(),
        source,
    })?;
    let value = raw.trim();
    // f64::from_str accepts "nan" and "inf", neither is a reading
    let parsed = value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SensorError::Parse {
            path: channel.path.clone(),
            value: value.to_string(),
        })?;
    debug!("sensor {} raw={} scale={}", channel.path.display(), value, channel.scale);

    let scaled = parsed * channel.scale;
    if !scaled.is_finite() {
        return Err(SensorError::OutOfRange {
            path: channel.path.clone(),
            value: scaled,
        });
    }
    Ok(scaled)
}

fn read_f32(channel: &SensorChannel) -> Result<f32, SensorError> {
    let value = read_channel(channel)?;
    let narrowed = value as f32;
    if !narrowed.is_finite() {
        return Err(SensorError::OutOfRange {
            path: channel.path.clone(),
            value,
        });
    }
    Ok(narrowed)
}

fn read_i32(channel: &SensorChannel) -> Result<i32, SensorError> {
    let value = read_channel(channel)?.round();
    if value < i32::MIN as f64 || value > i32::MAX as f64 {
        return Err(SensorError::OutOfRange {
            path: channel.path.clone(),
            value,
        });
    }
    Ok(value as i32)
}

impl SensorSuite for SysfsSensors {
    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        read_f32(&self.channels.temperature)
    }

    fn read_humidity(&mut self) -> Result<f32, SensorError> {
        read_f32(&self.channels.humidity)
    }

    fn read_co2(&mut self) -> Result<f32, SensorError> {
        read_f32(&self.channels.co2)
    }

    fn read_pm25(&mut self) -> Result<i32, SensorError> {
        read_i32(&self.channels.pm25)
    }
}
