//! Device protocols
//!
//! A device protocol is the device-specific half of the orchestrator: it
//! turns capability calls into commands, interprets lines received from the
//! device, and reacts to state transitions. The generic half, connection
//! and job lifecycles, lives in [`Protocol`].

pub mod gcode;

use crate::command::Command;
use crate::job::JobKind;
use crate::protocol::capabilities::{
    AxisMotion, FabricationMotion, FanControl, FileAware, FileManagement, FileStreaming,
    MotorControl, PowerControl,
};
use crate::protocol::Protocol;
use fabkit_core::{ProtocolState, Result};

/// Hooks run when the orchestrator enters a state.
///
/// Each receives the state that was left. The orchestrator calls exactly one
/// hook per transition, before logging and notifying listeners.
pub trait StateHooks {
    fn on_disconnected(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_disconnected_with_error(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_connecting(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_connected(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_disconnecting(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_printing(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_pausing(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_paused(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_cancelling(&self, _protocol: &Protocol, _old: ProtocolState) {}
    fn on_error(&self, _protocol: &Protocol, _old: ProtocolState) {}
}

/// Device-specific behaviour plugged into a [`Protocol`]
pub trait DeviceProtocol: StateHooks + Send + Sync {
    /// Protocol name
    fn name(&self) -> &str;

    /// Job kinds this device can run
    fn supported_jobs(&self) -> &[JobKind];

    fn supports_job(&self, kind: JobKind) -> bool {
        self.supported_jobs().contains(&kind)
    }

    /// Whether the device can take another command right now
    fn can_send(&self, _protocol: &Protocol) -> bool {
        true
    }

    /// Send commands to the device
    fn send_commands(
        &self,
        _protocol: &Protocol,
        _command_type: Option<&str>,
        _commands: &[Command],
    ) -> Result<()> {
        Ok(())
    }

    /// Recover from a stalled exchange
    fn repair(&self, _protocol: &Protocol) -> Result<()> {
        Ok(())
    }

    /// A complete line arrived from the device
    fn on_line_received(&self, _protocol: &Protocol, _line: &str) {}

    fn axis_motion(&self) -> Option<&dyn AxisMotion> {
        None
    }

    fn fabrication_motion(&self) -> Option<&dyn FabricationMotion> {
        None
    }

    fn fan_control(&self) -> Option<&dyn FanControl> {
        None
    }

    fn motor_control(&self) -> Option<&dyn MotorControl> {
        None
    }

    fn power_control(&self) -> Option<&dyn PowerControl> {
        None
    }

    fn file_aware(&self) -> Option<&dyn FileAware> {
        None
    }

    fn file_management(&self) -> Option<&dyn FileManagement> {
        None
    }

    fn file_streaming(&self) -> Option<&dyn FileStreaming> {
        None
    }
}

/// Device protocol without commands or capabilities.
///
/// Useful for driving the orchestrator's lifecycle alone, e.g. with jobs
/// that talk to the transport themselves.
#[derive(Debug, Clone, Default)]
pub struct NullDevice {
    jobs: Vec<JobKind>,
}

impl NullDevice {
    /// A device that supports no job kinds
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that claims support for `jobs`
    pub fn with_jobs(jobs: &[JobKind]) -> Self {
        Self {
            jobs: jobs.to_vec(),
        }
    }
}

impl StateHooks for NullDevice {}

impl DeviceProtocol for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn supported_jobs(&self) -> &[JobKind] {
        &self.jobs
    }
}
