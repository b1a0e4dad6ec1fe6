//! FabKit Settings Crate
//!
//! Handles configuration files: connection, protocol and job settings,
//! stored as JSON or TOML in the platform config directory.

pub mod config;
pub mod error;

pub use config::{
    config_dir, default_config_path, Config, ConnectionSettings, JobSettings, ProtocolSettings,
};
pub use error::{ConfigError, SettingsError, SettingsResult};
