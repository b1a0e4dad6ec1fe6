//! Configuration and settings management for FabKit
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats stored in the platform-specific config directory.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (driver, port, timeouts)
//! - Protocol settings (device flavour, temperature polling)
//! - Job settings (SD status polling, recent files)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use fabkit_communication::{ConnectionDriver, ConnectionParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "fabkit";
const CONFIG_FILE: &str = "config.toml";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Transport driver
    pub driver: ConnectionDriver,
    /// Serial port name or host name
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// TCP port for network connections
    pub network_port: u16,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Hardware flow control (serial only)
    pub flow_control: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            network_port: 23,
            timeout_ms: 5000,
            flow_control: false,
        }
    }
}

impl ConnectionSettings {
    /// Transport parameters for these settings
    pub fn to_params(&self) -> ConnectionParams {
        ConnectionParams {
            driver: self.driver,
            port: self.port.clone(),
            network_port: self.network_port,
            baud_rate: self.baud_rate,
            flow_control: self.flow_control,
            timeout_ms: self.timeout_ms,
            ..ConnectionParams::default()
        }
    }
}

/// Device protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Device flavour name
    pub flavor: String,
    /// Temperature poll interval in milliseconds, 0 disables polling
    pub temperature_poll_interval_ms: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            flavor: "reprap".to_string(),
            temperature_poll_interval_ms: 2000,
        }
    }
}

/// Job settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// SD print status poll interval in milliseconds, 0 disables polling
    pub sd_status_interval_ms: u64,
    /// Number of recent files to remember
    pub recent_files_count: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            sd_status_interval_ms: 1000,
            recent_files_count: 10,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Recent files list, most recent first
    pub recent_files: Vec<PathBuf>,
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Protocol settings
    pub protocol: ProtocolSettings,
    /// Job settings
    pub jobs: JobSettings,
}

#[derive(Clone, Copy)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string()).into()),
    }
}

fn invalid(key: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let connection = &self.connection;
        if connection.timeout_ms == 0 {
            return Err(invalid("connection.timeout_ms", "must be > 0"));
        }

        match connection.driver {
            ConnectionDriver::Serial => {
                if connection.baud_rate == 0 {
                    return Err(invalid("connection.baud_rate", "must be > 0"));
                }
                if connection.port.is_empty() {
                    return Err(invalid("connection.port", "serial port name is empty"));
                }
            }
            ConnectionDriver::Tcp => {
                if connection.network_port == 0 {
                    return Err(ConfigError::ValueOutOfRange {
                        key: "connection.network_port".to_string(),
                        value: connection.network_port.to_string(),
                    }
                    .into());
                }
                if connection.port.is_empty() {
                    return Err(invalid("connection.port", "host name is empty"));
                }
            }
            ConnectionDriver::Virtual => {}
        }

        if self.protocol.flavor.trim().is_empty() {
            return Err(invalid("protocol.flavor", "must not be empty"));
        }

        if self.jobs.recent_files_count == 0 {
            return Err(invalid("jobs.recent_files_count", "must be > 0"));
        }

        Ok(())
    }

    /// Add file to recent files list
    pub fn add_recent_file(&mut self, path: PathBuf) {
        self.recent_files.retain(|f| f != &path);
        self.recent_files.insert(0, path);
        self.recent_files.truncate(self.jobs.recent_files_count);
    }
}

/// Platform configuration directory for FabKit
///
/// Falls back to the home directory, then the working directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default configuration file path
pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}
