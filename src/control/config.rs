//! Configuration loading for the device link and telemetry pipeline.

use embassy_time::Duration;
use serde::Deserialize;
use std::path::Path;

use crate::validation::{DEFAULT_MAX_VOLTAGE, DEFAULT_MIN_VOLTAGE, VoltageLimits};

/// Longest accepted period, window, delay or timeout (one day).
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileReadError(msg) => write!(f, "Failed to read config file: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config file: {}", msg),
            ConfigError::ValidationError(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings for talking to one converter and sampling its output.
///
/// Every key is optional in the TOML file; missing keys fall back to the
/// converter's factory defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LinkConfig {
    /// Default host offered for the first connection
    pub host: String,
    /// Default HTTP port offered for the first connection
    pub port: u16,
    /// Interval between measurement requests
    pub sampling_period_ms: u64,
    /// Age limit of the sample window
    pub window_ms: u64,
    pub min_voltage: f32,
    pub max_voltage: f32,
    /// Timeout for status, set-voltage and set-output requests
    pub command_timeout_ms: u64,
    /// Timeout for measurement requests
    pub measurement_timeout_ms: u64,
    /// How long a failed connection attempt is shown before reverting
    pub failed_revert_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".to_string(),
            port: 80,
            sampling_period_ms: 100,
            window_ms: 30_000,
            min_voltage: DEFAULT_MIN_VOLTAGE,
            max_voltage: DEFAULT_MAX_VOLTAGE,
            command_timeout_ms: 5_000,
            measurement_timeout_ms: 3_000,
            failed_revert_ms: 2_000,
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    ///
    /// # Returns
    /// * `Ok(LinkConfig)` if the file was read, parsed and passed validation
    /// * `Err(ConfigError)` describing the first problem found otherwise
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(config_path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_period_ms == 0 {
            return Err(ConfigError::ValidationError("sampling-period-ms must be positive".to_string()));
        }
        if self.window_ms < self.sampling_period_ms {
            return Err(ConfigError::ValidationError(format!(
                "window-ms ({}) must be at least sampling-period-ms ({})",
                self.window_ms, self.sampling_period_ms
            )));
        }
        if !(self.min_voltage < self.max_voltage) {
            return Err(ConfigError::ValidationError(format!(
                "min-voltage ({}) must be below max-voltage ({})",
                self.min_voltage, self.max_voltage
            )));
        }
        if self.command_timeout_ms == 0 || self.measurement_timeout_ms == 0 {
            return Err(ConfigError::ValidationError("request timeouts must be positive".to_string()));
        }
        for (key, value) in [
            ("sampling-period-ms", self.sampling_period_ms),
            ("window-ms", self.window_ms),
            ("failed-revert-ms", self.failed_revert_ms),
            ("command-timeout-ms", self.command_timeout_ms),
            ("measurement-timeout-ms", self.measurement_timeout_ms),
        ] {
            if value > MAX_INTERVAL_MS {
                return Err(ConfigError::ValidationError(format!("{} ({}) must not exceed {}", key, value, MAX_INTERVAL_MS)));
            }
        }
        Ok(())
    }

    pub fn voltage_limits(&self) -> VoltageLimits {
        VoltageLimits {
            min: self.min_voltage,
            max: self.max_voltage,
        }
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_millis(self.sampling_period_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn failed_revert(&self) -> Duration {
        Duration::from_millis(self.failed_revert_ms)
    }

    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.command_timeout_ms)
    }

    pub fn measurement_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.measurement_timeout_ms)
    }
}
