// dlbus-bridge - DL-bus telemetry bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Daemon configuration.
//!
//! Loaded from a TOML file; every section has working defaults so a
//! minimal file only needs to override what differs from the reference
//! wiring. Validation happens at load time: an unknown datalogger type or
//! terminator is a startup failure, not a runtime surprise.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use dlbus::device::DeviceType;
use dlbus::source::Terminator;

/// Errors while loading or validating the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML or has the wrong shape
    #[error("Cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configured datalogger type is not supported
    #[error("Unsupported datalogger type: {0:?}")]
    UnsupportedDatalogger(String),

    /// The configured terminator is not supported
    #[error("Invalid terminator {0:?} (expected pullup, pulldown or none)")]
    InvalidTerminator(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub datalogger: DataloggerConfig,
    pub dlbus: DlbusConfig,
    pub mqtt: MqttConfig,
    pub webserver: WebserverConfig,
    pub log: LogConfig,
}

/// Controller model selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataloggerConfig {
    /// Controller model on the bus; currently only `"uvr42"`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for DataloggerConfig {
    fn default() -> Self {
        Self {
            kind: "uvr42".to_string(),
        }
    }
}

/// DL-bus line configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DlbusConfig {
    /// GPIO character device path.
    pub chip: String,
    /// Line offset the bus is wired to.
    pub gpio_line: u32,
    /// Line terminator: `pullup`, `pulldown` or `none`.
    pub terminator: String,
    /// Debounce window in microseconds; 0 forwards every edge.
    pub debounce_us: u64,
    /// Restart clock discovery when the line is silent for this long.
    pub stall_timeout_s: u64,
}

impl Default for DlbusConfig {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".to_string(),
            gpio_line: 4,
            terminator: "none".to_string(),
            debounce_us: 0,
            stall_timeout_s: 10,
        }
    }
}

/// MQTT publication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address as `host:port`; empty disables publishing.
    pub connection: String,
    /// Topic the measurement JSON is published to.
    pub topic: String,
    /// Heartbeat interval in seconds; 0 publishes only on change.
    pub interval_s: u64,
    /// Minimum temperature movement in Kelvin; 0 publishes only on
    /// heartbeat.
    pub delta_kelvin: f64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            connection: String::new(),
            topic: "/test/uvr42".to_string(),
            interval_s: 60,
            delta_kelvin: 0.5,
        }
    }
}

/// Webserver configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebserverConfig {
    /// Listen address of the HTTP service.
    pub listen: String,
    /// Per-route enable switches.
    pub services: ServicesConfig,
}

impl Default for WebserverConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4000".to_string(),
            services: ServicesConfig::default(),
        }
    }
}

/// Per-route enable switches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub version: bool,
    pub health: bool,
    pub data: bool,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            version: true,
            health: true,
            data: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter: trace, debug, info, warn or error.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.device_type()?;
        config.terminator()?;
        Ok(config)
    }

    /// Parsed controller model; unknown names fail startup.
    pub fn device_type(&self) -> Result<DeviceType, ConfigError> {
        DeviceType::from_str(&self.datalogger.kind)
            .map_err(|_| ConfigError::UnsupportedDatalogger(self.datalogger.kind.clone()))
    }

    /// Parsed line terminator.
    pub fn terminator(&self) -> Result<Terminator, ConfigError> {
        Terminator::from_str(&self.dlbus.terminator)
            .map_err(|_| ConfigError::InvalidTerminator(self.dlbus.terminator.clone()))
    }

    /// Debounce window of the edge source.
    pub fn debounce(&self) -> Duration {
        Duration::from_micros(self.dlbus.debounce_us)
    }

    /// Stall window of the decoder supervisor.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.dlbus.stall_timeout_s)
    }

    /// Heartbeat interval of the delta gate.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.mqtt.interval_s)
    }
}
