//! Device capability fragments
//!
//! Devices differ in what they can do: a laser has no bed heater, a
//! printer without a card reader has no file storage. Each group of
//! optional operations is its own trait, and a device protocol implements
//! only the fragments its hardware supports, exposing them through the
//! accessors on [`DeviceProtocol`](crate::device::DeviceProtocol).
//!
//! Command operations default to returning
//! [`ProtocolError::NotSupported`]; query operations default to
//! `Ok(None)`, meaning the value is unknown.

use super::Protocol;
use crate::command::Tags;
use fabkit_core::{ProtocolError, Result};

fn unsupported<T>(capability: &str, operation: &str) -> Result<T> {
    Err(ProtocolError::not_supported(capability, operation).into())
}

/// Target of a move. Axes left `None` do not move.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Move {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    /// Extrusion axis
    pub e: Option<f64>,
    /// Feed rate in mm/min
    pub feedrate: Option<f64>,
    /// Interpret coordinates relative to the current position
    pub relative: bool,
}

/// Axis selection for homing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Axes {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl Axes {
    /// All three axes
    pub const ALL: Axes = Axes {
        x: true,
        y: true,
        z: true,
    };

    /// Whether no axis is selected
    pub fn is_empty(&self) -> bool {
        !(self.x || self.y || self.z)
    }
}

/// Motion along up to three axes
pub trait AxisMotion: Send + Sync {
    fn move_axes(&self, _protocol: &Protocol, _target: &Move) -> Result<()> {
        unsupported("axis motion", "move_axes")
    }

    fn home(&self, _protocol: &Protocol, _axes: Axes) -> Result<()> {
        unsupported("axis motion", "home")
    }

    fn change_tool(&self, _protocol: &Protocol, _tool: u32) -> Result<()> {
        unsupported("axis motion", "change_tool")
    }
}

/// Motion plus extrusion and heater control
pub trait FabricationMotion: AxisMotion {
    /// Feed rate override in percent
    fn set_feedrate_multiplier(&self, _protocol: &Protocol, _percent: f64) -> Result<()> {
        unsupported("fabrication motion", "set_feedrate_multiplier")
    }

    /// Flow override in percent
    fn set_extrusion_multiplier(&self, _protocol: &Protocol, _percent: f64) -> Result<()> {
        unsupported("fabrication motion", "set_extrusion_multiplier")
    }

    /// Set an extruder target; `wait` blocks the device until it is reached
    fn set_extruder_temperature(
        &self,
        _protocol: &Protocol,
        _temperature: f64,
        _tool: Option<u32>,
        _wait: bool,
    ) -> Result<()> {
        unsupported("fabrication motion", "set_extruder_temperature")
    }

    /// Set the bed target; `wait` blocks the device until it is reached
    fn set_bed_temperature(&self, _protocol: &Protocol, _temperature: f64, _wait: bool) -> Result<()> {
        unsupported("fabrication motion", "set_bed_temperature")
    }
}

/// Part cooling fan
pub trait FanControl: Send + Sync {
    /// Set the fan speed as a fraction in `0.0..=1.0`
    fn set_fan_speed(&self, _protocol: &Protocol, _speed: f64) -> Result<()> {
        unsupported("fan control", "set_fan_speed")
    }

    fn get_fan_speed(&self, _protocol: &Protocol) -> Result<Option<f64>> {
        Ok(None)
    }
}

/// Stepper motor power
pub trait MotorControl: Send + Sync {
    fn set_motor_state(&self, _protocol: &Protocol, _enabled: bool) -> Result<()> {
        unsupported("motor control", "set_motor_state")
    }

    fn get_motor_state(&self, _protocol: &Protocol) -> Result<Option<bool>> {
        Ok(None)
    }

    fn enable_motors(&self, protocol: &Protocol) -> Result<()> {
        self.set_motor_state(protocol, true)
    }

    fn disable_motors(&self, protocol: &Protocol) -> Result<()> {
        self.set_motor_state(protocol, false)
    }
}

/// Main power supply
pub trait PowerControl: Send + Sync {
    fn set_power_state(&self, _protocol: &Protocol, _enabled: bool) -> Result<()> {
        unsupported("power control", "set_power_state")
    }

    fn get_power_state(&self, _protocol: &Protocol) -> Result<Option<bool>> {
        Ok(None)
    }

    fn enable_power(&self, protocol: &Protocol) -> Result<()> {
        self.set_power_state(protocol, true)
    }

    fn disable_power(&self, protocol: &Protocol) -> Result<()> {
        self.set_power_state(protocol, false)
    }
}

/// Removable storage and prints running from it.
///
/// Results arrive asynchronously as `on_protocol_file_*` notifications.
pub trait FileAware: Send + Sync {
    fn init_file_storage(&self, _protocol: &Protocol) -> Result<()> {
        unsupported("file storage", "init_file_storage")
    }

    fn eject_file_storage(&self, _protocol: &Protocol) -> Result<()> {
        unsupported("file storage", "eject_file_storage")
    }

    fn list_files(&self, _protocol: &Protocol) -> Result<()> {
        unsupported("file storage", "list_files")
    }

    fn start_file_print(
        &self,
        _protocol: &Protocol,
        _name: &str,
        _position: u64,
        _tags: &Tags,
    ) -> Result<()> {
        unsupported("file storage", "start_file_print")
    }

    fn pause_file_print(&self, _protocol: &Protocol) -> Result<()> {
        unsupported("file storage", "pause_file_print")
    }

    fn resume_file_print(&self, _protocol: &Protocol) -> Result<()> {
        unsupported("file storage", "resume_file_print")
    }

    /// Request a status report
    fn get_file_print_status(&self, _protocol: &Protocol) -> Result<()> {
        unsupported("file storage", "get_file_print_status")
    }
}

/// File storage with deletion
pub trait FileManagement: FileAware {
    fn delete_file(&self, _protocol: &Protocol, _name: &str) -> Result<()> {
        unsupported("file management", "delete_file")
    }
}

/// File storage that can record a file sent from the host
pub trait FileStreaming: FileManagement {
    /// Start writing subsequent lines to `name`
    fn record_file(&self, _protocol: &Protocol, _name: &str) -> Result<()> {
        unsupported("file streaming", "record_file")
    }

    /// Stop writing and close the file
    fn stop_recording_file(&self, _protocol: &Protocol) -> Result<()> {
        unsupported("file streaming", "stop_recording_file")
    }
}
