//! Configuration module for the telemetry bridge
//!
//! Loads configuration from a TOML file:
//! - [default] - General settings (log_level)
//! - [device] - Channel polling settings
//! - [metrics] - Integration and derived metric timers
//! - [state] - Persisted state location
//! - [mqtt] - Optional MQTT broker settings

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log level for the application
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing LevelFilter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
    pub device: DeviceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub state: StateConfig,
    pub mqtt: Option<MqttConfig>,
}

/// General application settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DefaultConfig {
    /// Log level: TRACE, DEBUG, INFO, WARN, ERROR
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Device channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Directory holding `primary.json` and `secondary.json` replies
    pub replay_dir: PathBuf,

    /// Poll the secondary (web interface) channel
    #[serde(default = "default_true")]
    pub secondary_enabled: bool,

    #[serde(default = "default_primary_interval", with = "humantime_serde")]
    pub primary_interval: Duration,

    #[serde(default = "default_secondary_interval", with = "humantime_serde")]
    pub secondary_interval: Duration,

    #[serde(default = "default_primary_timeout", with = "humantime_serde")]
    pub primary_timeout: Duration,

    #[serde(default = "default_secondary_timeout", with = "humantime_serde")]
    pub secondary_timeout: Duration,
}

fn default_true() -> bool {
    true
}

fn default_primary_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_secondary_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_primary_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_secondary_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Integrator and derived metric timers
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval", with = "humantime_serde")]
    pub integration_interval: Duration,

    #[serde(default = "default_metrics_interval", with = "humantime_serde")]
    pub derived_interval: Duration,
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            integration_interval: default_metrics_interval(),
            derived_interval: default_metrics_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// JSON file holding energy totals and daily accumulators
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("state.json")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// MQTT broker configuration
#[derive(Deserialize, Clone)]
pub struct MqttConfig {
    /// MQTT root topic (e.g., "varta")
    #[serde(default = "default_mqtt_root")]
    pub root: String,

    /// MQTT broker hostname
    pub host: String,

    /// MQTT broker port (default 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Topic segment below the root identifying this battery
    #[serde(default = "default_device_id")]
    pub device_id: String,
}

fn default_mqtt_root() -> String {
    "varta".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_device_id() -> String {
    "battery".to_string()
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("root", &self.root)
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration logic (semantic validation beyond type checks)
    fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("device.primary_interval", self.device.primary_interval),
            ("device.secondary_interval", self.device.secondary_interval),
            ("device.primary_timeout", self.device.primary_timeout),
            ("device.secondary_timeout", self.device.secondary_timeout),
            ("metrics.integration_interval", self.metrics.integration_interval),
            ("metrics.derived_interval", self.metrics.derived_interval),
        ];
        for (name, duration) in durations {
            if duration.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.is_empty() {
                return Err(ConfigError::ValidationError(
                    "mqtt.host must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
