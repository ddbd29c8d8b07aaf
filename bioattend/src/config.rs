//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use bioattend_core::CommandSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::attendance::AttendanceOptions;
use crate::session::{ReconnectPolicy, SessionOptions};

/// Longest accepted per-scan timeout
const MAX_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Firmware protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    /// Single-character commands (`E`, `V`, `D`, `C`, `X`, `P`)
    #[default]
    Character,

    /// Scan query only (`S`)
    Scan,

    /// Firmware accepting both
    Both,
}

impl ProtocolVariant {
    pub fn command_set(self) -> CommandSet {
        match self {
            Self::Character => CommandSet::CHARACTER,
            Self::Scan => CommandSet::SCAN_QUERY,
            Self::Both => CommandSet::CHARACTER | CommandSet::SCAN_QUERY,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub reconnect: ReconnectConfig,
    pub attendance: AttendanceConfig,
    pub correlator: CorrelatorConfig,
    pub logging: LoggingConfig,
}

/// Sensor link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port; discovered when absent
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Wait after opening while the board resets
    pub settle_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub protocol: ProtocolVariant,
}

/// Reconnection backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures before giving up (0 = never)
    pub max_attempts: u32,
}

/// Attendance mode timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    pub poll_interval_ms: u64,
    pub verify_timeout_ms: u64,
    /// Repeat matches within this window are ignored
    pub cooldown_secs: u64,
}

/// Two-factor correlation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub max_attempts: u32,
    pub scan_timeout_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter, overridden by `RUST_LOG`
    pub level: String,
    /// Directory for daily log files; console only when absent
    pub directory: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: bioattend_core::DEFAULT_BAUD_RATE,
            settle_delay_ms: 2000,
            poll_interval_ms: 100,
            protocol: ProtocolVariant::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            verify_timeout_ms: 2500,
            cooldown_secs: 30,
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            scan_timeout_ms: 12_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl Config {
    /// Load config, writing defaults if the file does not exist yet
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {:?}, writing defaults", path);
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        Self::load(path)
    }

    /// Load and validate config
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.baud_rate == 0 {
            return Err(ConfigError::Validation("Baud rate must be greater than 0".to_string()));
        }
        if self.device.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "Device poll interval must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "Reconnect delay must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigError::Validation(
                "Maximum reconnect delay cannot be below the initial delay".to_string(),
            ));
        }
        if self.attendance.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "Attendance poll interval must be greater than 0".to_string(),
            ));
        }
        if self.attendance.verify_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Verify timeout must be greater than 0".to_string(),
            ));
        }
        if self.correlator.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "Correlator needs at least 1 attempt".to_string(),
            ));
        }
        let scan_timeout = self.correlator.scan_timeout();
        if scan_timeout.is_zero() || scan_timeout > MAX_SCAN_TIMEOUT {
            return Err(ConfigError::Validation(format!(
                "Scan timeout must be between 1 ms and {} s",
                MAX_SCAN_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }

    /// Session settings derived from this config
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            command_set: self.device.protocol.command_set(),
            poll_interval: Duration::from_millis(self.device.poll_interval_ms),
            reconnect: self.reconnect.policy(),
        }
    }

    /// Attendance mode settings derived from this config
    pub fn attendance_options(&self) -> AttendanceOptions {
        AttendanceOptions {
            interval: Duration::from_millis(self.attendance.poll_interval_ms),
            verify_timeout: Duration::from_millis(self.attendance.verify_timeout_ms),
        }
    }
}

impl DeviceConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
        }
    }
}

impl AttendanceConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl CorrelatorConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}
