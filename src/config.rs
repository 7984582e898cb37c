//! # Node Configuration
//!
//! Loads the node's TOML configuration from disk. Every section carries defaults so a
//! partially filled file still produces a usable configuration; only the values that
//! cannot have a sensible default (SSID, access token) are enforced by [`NodeConfig::validate`].
//!
//! ## File Location
//!
//! `~/.config/airnode/config.toml`, or whatever `AIRNODE_CONFIG` points to. When the
//! file does not exist a default one is written so the operator has a template to fill in.
//!
//! ```text
//! [wifi]
//! ssid = "my-network"
//! password = "secret"
//!
//! [mqtt]
//! host = "app.coreiot.io"
//! access_token = "device-token"
//!
//! [sensors]
//! kind = "mock"
//! ```

use crate::telemetry::sensors::{MockSensors, SensorChannel, SensorSuite, SysfsSensors};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, Level};

const CONFIG_DIR: &str = ".config/airnode";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "AIRNODE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine home directory, set AIRNODE_CONFIG to the config file")]
    NoHomeDir,
}

/// Complete configuration of a telemetry node.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
    pub sensors: SensorSource,
}

/// Station credentials and the interface to associate on.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    pub interface: String,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            interface: "wlan0".to_string(),
        }
    }
}

/// Broker endpoint and session parameters.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Device access token, sent as the MQTT username
    pub access_token: String,
    pub telemetry_topic: String,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub publish_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "app.coreiot.io".to_string(),
            port: 1883,
            access_token: String::new(),
            telemetry_topic: "v1/devices/me/telemetry".to_string(),
            client_id_prefix: "airnode-".to_string(),
            keep_alive_secs: 15,
            connect_timeout_secs: 15,
            publish_timeout_secs: 5,
        }
    }
}

/// Retry bounds, backoffs and the publish cadence.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub link_poll_interval_ms: u64,
    pub link_max_retries: u32,
    pub reconnect_backoff_secs: u64,
    pub publish_interval_secs: u64,
    pub restart_delay_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            link_poll_interval_ms: 500,
            link_max_retries: 20,
            reconnect_backoff_secs: 5,
            publish_interval_secs: 10,
            restart_delay_secs: 1,
        }
    }
}

impl TimingConfig {
    pub fn link_poll_interval(&self) -> Duration {
        Duration::from_millis(self.link_poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

/// Where readings come from. Chosen once, when the node is assembled.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorSource {
    #[default]
    Mock,
    Sysfs(SysfsChannels),
}

/// One file per quantity, typically Linux IIO attributes.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SysfsChannels {
    pub temperature: SensorChannel,
    pub humidity: SensorChannel,
    pub co2: SensorChannel,
    pub pm25: SensorChannel,
}

impl SensorSource {
    pub fn build(&self) -> Box<dyn SensorSuite> {
        match self {
            SensorSource::Mock => {
                info!("Using mock sensors");
                Box::new(MockSensors::seeded_from_clock())
            }
            SensorSource::Sysfs(channels) => {
                info!("Using sysfs sensors");
                Box::new(SysfsSensors::new(channels.clone()))
            }
        }
    }
}

impl NodeConfig {
    /// Config path, honouring the `AIRNODE_CONFIG` override.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        resolve_path(std::env::var_os(CONFIG_ENV), dirs::home_dir())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Writes a default config to `path` unless a file already exists there.
    /// Returns whether a file was written.
    pub fn ensure_default(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(&NodeConfig::default())?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wifi.ssid.trim().is_empty() {
            return Err(ConfigError::Invalid("wifi.ssid must not be empty".into()));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".into()));
        }
        if self.mqtt.access_token.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.access_token must not be empty".into(),
            ));
        }
        if self.mqtt.telemetry_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.telemetry_topic must not be empty".into(),
            ));
        }
        if self.timing.publish_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "timing.publish_interval_secs must be positive".into(),
            ));
        }
        self.logging.max_level()?;
        Ok(())
    }
}

fn resolve_path(
    override_path: Option<OsString>,
    home: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = override_path {
        return Ok(PathBuf::from(path));
    }
    let mut path = home.ok_or(ConfigError::NoHomeDir)?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}
