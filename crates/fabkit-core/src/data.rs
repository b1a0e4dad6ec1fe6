//! Data reported by devices through the protocol
//!
//! Temperatures and removable-storage file listings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One heater reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Measured temperature in °C
    pub actual: f64,
    /// Target temperature in °C, if the device reported one
    pub target: Option<f64>,
}

impl TemperatureReading {
    /// Create a reading
    pub fn new(actual: f64, target: Option<f64>) -> Self {
        Self { actual, target }
    }
}

/// Heater readings keyed by heater name (`tool0`, `tool1`, ..., `bed`)
pub type Temperatures = BTreeMap<String, TemperatureReading>;

/// A file on the device's removable storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name as reported by the device
    pub name: String,
    /// Size in bytes, if reported
    pub size: Option<u64>,
}

impl FileEntry {
    /// Create a file entry
    pub fn new(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl std::fmt::Display for FileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.size {
            Some(size) => write!(f, "{} ({} bytes)", self.name, size),
            None => write!(f, "{}", self.name),
        }
    }
}
