//! RepRap/Marlin style G-code device
//!
//! Lines are sent one at a time: after each line the device must answer
//! `ok` (or `start`/`wait`) before the next one goes out. While the
//! orchestrator is `Printing` and nothing is queued, every acknowledgement
//! pulls the next line from the active job.
//!
//! Queued lines may carry a command type; a line is dropped if another line
//! of the same type is still waiting, so periodic queries never pile up.

use super::{DeviceProtocol, StateHooks};
use crate::command::{Command, CommandKind, GcodeCommand, Tags};
use crate::job::JobKind;
use crate::protocol::capabilities::{
    Axes, AxisMotion, FabricationMotion, FanControl, FileAware, FileManagement, FileStreaming,
    Move, MotorControl, PowerControl,
};
use crate::protocol::Protocol;
use fabkit_core::{FileEntry, ProtocolError, ProtocolState, Result, TemperatureReading, Temperatures};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;

static TEMPERATURE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<tool>B|T(?P<toolnum>\d*)):\s*(?P<actual>[-+]?\d*\.?\d+)(?:\s*/?\s*(?P<target>[-+]?\d*\.?\d+))?")
        .expect("invalid regex pattern")
});

static FILE_OPENED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"File opened:\s*(?P<name>.*?)\s+Size:\s*(?P<size>\d+)").expect("invalid regex pattern")
});

static SD_PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"SD printing byte (?P<pos>\d+)/(?P<total>\d+)").expect("invalid regex pattern")
});

const SUPPORTED_JOBS: &[JobKind] = &[JobKind::LocalGcode, JobKind::Stream, JobKind::SdFile];

/// Command type of temperature polls
pub const TEMPERATURE_POLL: &str = "temperature_poll";

/// Command type of storage status polls
pub const SD_STATUS_POLL: &str = "sd_status_poll";

#[derive(Debug, Clone)]
struct QueuedLine {
    line: String,
    command_type: Option<String>,
}

#[derive(Debug, Default)]
struct GcodeState {
    queue: VecDeque<QueuedLine>,
    clear_to_send: bool,
    last_sent: Option<String>,
    temperatures: Temperatures,
    fan_speed: Option<f64>,
    motors_enabled: Option<bool>,
    power_on: Option<bool>,
    storage_available: Option<bool>,
    file_list: Option<Vec<FileEntry>>,
    recording: Option<String>,
}

/// G-code device protocol for RepRap style firmware
#[derive(Debug)]
pub struct GcodeDevice {
    name: String,
    inner: Mutex<GcodeState>,
}

impl Default for GcodeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GcodeDevice {
    pub fn new() -> Self {
        Self::with_name("reprap")
    }

    /// Create a device with a custom protocol name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(GcodeState::default()),
        }
    }

    /// Last reported temperatures
    pub fn temperatures(&self) -> Temperatures {
        self.inner.lock().temperatures.clone()
    }

    /// Whether the storage reported ready, if it reported at all
    pub fn storage_available(&self) -> Option<bool> {
        self.inner.lock().storage_available
    }

    /// Name of the file being recorded
    pub fn recording(&self) -> Option<String> {
        self.inner.lock().recording.clone()
    }

    /// Number of lines waiting to be sent
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Queue a temperature report request
    pub fn request_temperature(&self, protocol: &Protocol) -> Result<()> {
        self.enqueue(
            protocol,
            vec![QueuedLine {
                line: "M105".to_string(),
                command_type: Some(TEMPERATURE_POLL.to_string()),
            }],
        )
    }

    fn send(&self, protocol: &Protocol, commands: &[GcodeCommand]) -> Result<()> {
        let lines = commands
            .iter()
            .map(|command| QueuedLine {
                line: command.to_string(),
                command_type: None,
            })
            .collect();
        self.enqueue(protocol, lines)
    }

    fn enqueue(&self, protocol: &Protocol, lines: Vec<QueuedLine>) -> Result<()> {
        let state = protocol.state();
        if !matches!(
            state,
            ProtocolState::Connected
                | ProtocolState::Printing
                | ProtocolState::Pausing
                | ProtocolState::Paused
                | ProtocolState::Cancelling
        ) {
            return Err(ProtocolError::InvalidState {
                operation: "send".to_string(),
                state,
            }
            .into());
        }

        {
            let mut inner = self.inner.lock();
            for line in lines {
                let duplicate = line.command_type.as_ref().is_some_and(|command_type| {
                    inner
                        .queue
                        .iter()
                        .any(|queued| queued.command_type.as_ref() == Some(command_type))
                });
                if duplicate {
                    tracing::trace!("Dropping duplicate {}", line.line);
                    continue;
                }
                inner.queue.push_back(line);
            }
        }
        self.pump(protocol);
        Ok(())
    }

    /// Send the next line if the device is ready for one
    fn pump(&self, protocol: &Protocol) {
        let queued = {
            let mut inner = self.inner.lock();
            if !inner.clear_to_send {
                return;
            }
            inner.queue.pop_front().map(|queued| queued.line)
        };
        let Some(line) = queued.or_else(|| self.next_job_line(protocol)) else {
            return;
        };

        {
            let mut inner = self.inner.lock();
            if !inner.clear_to_send {
                // something was sent while the job produced its line
                inner.queue.push_front(QueuedLine {
                    line,
                    command_type: None,
                });
                return;
            }
            inner.clear_to_send = false;
            inner.last_sent = Some(line.clone());
        }

        if let Err(e) = protocol.write_line(&line) {
            tracing::warn!("Failed to send {}: {}", line, e);
            self.inner.lock().clear_to_send = true;
        }
    }

    /// Pull the next sendable line from the active job
    fn next_job_line(&self, protocol: &Protocol) -> Option<String> {
        loop {
            if protocol.state() != ProtocolState::Printing {
                return None;
            }
            let job = protocol.active_job()?;
            let command = match job.next_command() {
                Ok(Some(command)) => command,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!("Job {} stopped delivering lines: {}", job.name(), e);
                    return None;
                }
            };

            match &command.kind {
                CommandKind::At { command: directive, .. } => match directive.as_str() {
                    "pause" => {
                        protocol.pause_processing(&command.tags);
                        return None;
                    }
                    "cancel" | "abort" => {
                        protocol.cancel_processing(false, &command.tags);
                        return None;
                    }
                    other => tracing::debug!("Skipping unknown directive @{}", other),
                },
                _ => return Some(command.line),
            }
        }
    }

    fn acknowledge(&self, protocol: &Protocol) {
        self.inner.lock().clear_to_send = true;
        self.pump(protocol);
    }

    /// Put the last sent line back at the head of the queue.
    ///
    /// Firmware follows a resend request with an `ok`, which releases the
    /// repeated line. `repair` unblocks a device that never sends it.
    fn resend(&self) {
        let mut inner = self.inner.lock();
        if let Some(line) = inner.last_sent.take() {
            tracing::warn!("Device requested resend of {}", line);
            inner.queue.push_front(QueuedLine {
                line,
                command_type: None,
            });
        }
    }

    fn reset(&self) {
        *self.inner.lock() = GcodeState::default();
    }

    fn handle_temperatures(&self, protocol: &Protocol, line: &str) {
        let temperatures = parse_temperatures(line);
        if temperatures.is_empty() {
            return;
        }
        self.inner.lock().temperatures = temperatures.clone();
        protocol.notify_temperature(&temperatures);
    }

    /// Consume a line of a file listing; returns whether the line was one
    fn collect_file_entry(&self, protocol: &Protocol, line: &str) -> bool {
        let finished = {
            let mut inner = self.inner.lock();
            let Some(files) = inner.file_list.as_mut() else {
                return false;
            };
            if !line.eq_ignore_ascii_case("End file list") {
                files.push(parse_file_entry(line));
                return true;
            }
            inner.file_list.take().unwrap_or_default()
        };
        protocol.notify_file_list(&finished);
        true
    }

    fn set_storage_available(&self, protocol: &Protocol, available: bool) {
        self.inner.lock().storage_available = Some(available);
        protocol.notify_file_storage_available(available);
    }

    fn active_job_kind(protocol: &Protocol) -> Option<JobKind> {
        protocol.active_job().map(|job| job.kind())
    }
}

/// Parse every heater reading on a report line.
///
/// A bare `T` only counts when no numbered tool is present, since firmware
/// with several extruders repeats the active one as `T`.
pub fn parse_temperatures(line: &str) -> Temperatures {
    let mut numbered = Temperatures::new();
    let mut bare = None;

    for caps in TEMPERATURE_REGEX.captures_iter(line) {
        let Some(actual) = caps.name("actual").and_then(|m| m.as_str().parse::<f64>().ok()) else {
            continue;
        };
        let target = caps.name("target").and_then(|m| m.as_str().parse::<f64>().ok());
        let reading = TemperatureReading::new(actual, target);

        match (&caps["tool"], caps.name("toolnum").map(|m| m.as_str())) {
            ("B", _) => {
                numbered.insert("bed".to_string(), reading);
            }
            (_, Some(num)) if !num.is_empty() => {
                numbered.insert(format!("tool{}", num), reading);
            }
            _ => bare = Some(reading),
        }
    }

    let has_tool = numbered.keys().any(|key| key.starts_with("tool"));
    if let (Some(reading), false) = (bare, has_tool) {
        numbered.insert("tool0".to_string(), reading);
    }
    numbered
}

fn is_temperature_line(line: &str) -> bool {
    line.contains(" T:") || line.starts_with("T:") || line.contains(" T0:") || line.starts_with("T0:")
}

fn parse_file_entry(line: &str) -> FileEntry {
    match line.rsplit_once(' ') {
        Some((name, size)) => match size.parse::<u64>() {
            Ok(size) => FileEntry::new(name.trim(), Some(size)),
            Err(_) => FileEntry::new(line.trim(), None),
        },
        None => FileEntry::new(line.trim(), None),
    }
}

impl StateHooks for GcodeDevice {
    fn on_connected(&self, protocol: &Protocol, old: ProtocolState) {
        if old == ProtocolState::Connecting {
            {
                let mut inner = self.inner.lock();
                *inner = GcodeState::default();
                inner.clear_to_send = true;
            }
            if let Err(e) = self.request_temperature(protocol) {
                tracing::warn!("Initial temperature request failed: {}", e);
            }
        } else {
            self.pump(protocol);
        }
    }

    fn on_disconnected(&self, _protocol: &Protocol, _old: ProtocolState) {
        self.reset();
    }

    fn on_disconnected_with_error(&self, _protocol: &Protocol, _old: ProtocolState) {
        self.reset();
    }

    fn on_printing(&self, protocol: &Protocol, old: ProtocolState) {
        if old == ProtocolState::Paused && Self::active_job_kind(protocol) == Some(JobKind::SdFile) {
            if let Err(e) = self.resume_file_print(protocol) {
                tracing::warn!("Failed to resume storage print: {}", e);
            }
        } else {
            self.pump(protocol);
        }
    }

    fn on_paused(&self, protocol: &Protocol, _old: ProtocolState) {
        if Self::active_job_kind(protocol) == Some(JobKind::SdFile) {
            if let Err(e) = self.pause_file_print(protocol) {
                tracing::warn!("Failed to pause storage print: {}", e);
            }
        }
    }
}

impl DeviceProtocol for GcodeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_jobs(&self) -> &[JobKind] {
        SUPPORTED_JOBS
    }

    fn can_send(&self, _protocol: &Protocol) -> bool {
        self.inner.lock().clear_to_send
    }

    fn send_commands(
        &self,
        protocol: &Protocol,
        command_type: Option<&str>,
        commands: &[Command],
    ) -> Result<()> {
        let lines = commands
            .iter()
            .map(|command| QueuedLine {
                line: command.line.clone(),
                command_type: command
                    .command_type
                    .clone()
                    .or_else(|| command_type.map(str::to_string)),
            })
            .collect();
        self.enqueue(protocol, lines)
    }

    fn repair(&self, protocol: &Protocol) -> Result<()> {
        tracing::info!("Repairing communication with {}", self.name);
        self.acknowledge(protocol);
        Ok(())
    }

    fn on_line_received(&self, protocol: &Protocol, line: &str) {
        if self.collect_file_entry(protocol, line) {
            return;
        }

        let lower = line.to_lowercase();
        if is_temperature_line(line) {
            self.handle_temperatures(protocol, line);
        }

        if lower.starts_with("ok") || lower.starts_with("start") || lower.starts_with("wait") {
            self.acknowledge(protocol);
        } else if lower.starts_with("resend") || lower.starts_with("rs") {
            self.resend();
        } else if line.starts_with("Error:") || line.starts_with("!!") {
            tracing::warn!("Device {} reported: {}", self.name, line);
        } else if line.starts_with("SD card ok") {
            self.set_storage_available(protocol, true);
        } else if line.starts_with("SD init fail") || line.starts_with("volume.init failed") {
            self.set_storage_available(protocol, false);
        } else if line.starts_with("Begin file list") {
            self.inner.lock().file_list = Some(Vec::new());
        } else if let Some(caps) = FILE_OPENED_REGEX.captures(line) {
            let size = caps["size"].parse::<u64>().unwrap_or(0);
            protocol.notify_file_print_started(&caps["name"], size);
        } else if let Some(caps) = SD_PROGRESS_REGEX.captures(line) {
            if let (Ok(pos), Ok(total)) = (caps["pos"].parse::<u64>(), caps["total"].parse::<u64>()) {
                protocol.notify_file_status(pos, total);
            }
        } else if line.starts_with("Done printing file") {
            protocol.notify_file_print_done();
        }
    }

    fn axis_motion(&self) -> Option<&dyn AxisMotion> {
        Some(self)
    }

    fn fabrication_motion(&self) -> Option<&dyn FabricationMotion> {
        Some(self)
    }

    fn fan_control(&self) -> Option<&dyn FanControl> {
        Some(self)
    }

    fn motor_control(&self) -> Option<&dyn MotorControl> {
        Some(self)
    }

    fn power_control(&self) -> Option<&dyn PowerControl> {
        Some(self)
    }

    fn file_aware(&self) -> Option<&dyn FileAware> {
        Some(self)
    }

    fn file_management(&self) -> Option<&dyn FileManagement> {
        Some(self)
    }

    fn file_streaming(&self) -> Option<&dyn FileStreaming> {
        Some(self)
    }
}

impl AxisMotion for GcodeDevice {
    fn move_axes(&self, protocol: &Protocol, target: &Move) -> Result<()> {
        let motion = GcodeCommand {
            x: target.x,
            y: target.y,
            z: target.z,
            e: target.e,
            f: target.feedrate.map(|feedrate| feedrate.round() as i64),
            ..GcodeCommand::new("G1")
        };
        if target.relative {
            self.send(protocol, &[GcodeCommand::new("G91"), motion, GcodeCommand::new("G90")])
        } else {
            self.send(protocol, &[motion])
        }
    }

    fn home(&self, protocol: &Protocol, axes: Axes) -> Result<()> {
        let zero = |selected: bool| selected.then_some(0.0);
        let command = GcodeCommand {
            x: zero(axes.x),
            y: zero(axes.y),
            z: zero(axes.z),
            ..GcodeCommand::new("G28")
        };
        self.send(protocol, &[command])
    }

    fn change_tool(&self, protocol: &Protocol, tool: u32) -> Result<()> {
        self.send(protocol, &[GcodeCommand::tool(tool)])
    }
}

impl FabricationMotion for GcodeDevice {
    fn set_feedrate_multiplier(&self, protocol: &Protocol, percent: f64) -> Result<()> {
        let command = GcodeCommand {
            s: Some(percent),
            ..GcodeCommand::new("M220")
        };
        self.send(protocol, &[command])
    }

    fn set_extrusion_multiplier(&self, protocol: &Protocol, percent: f64) -> Result<()> {
        let command = GcodeCommand {
            s: Some(percent),
            ..GcodeCommand::new("M221")
        };
        self.send(protocol, &[command])
    }

    fn set_extruder_temperature(
        &self,
        protocol: &Protocol,
        temperature: f64,
        tool: Option<u32>,
        wait: bool,
    ) -> Result<()> {
        let command = GcodeCommand {
            s: Some(temperature),
            t: tool.map(i64::from),
            ..GcodeCommand::new(if wait { "M109" } else { "M104" })
        };
        self.send(protocol, &[command])
    }

    fn set_bed_temperature(&self, protocol: &Protocol, temperature: f64, wait: bool) -> Result<()> {
        let command = GcodeCommand {
            s: Some(temperature),
            ..GcodeCommand::new(if wait { "M190" } else { "M140" })
        };
        self.send(protocol, &[command])
    }
}

impl FanControl for GcodeDevice {
    fn set_fan_speed(&self, protocol: &Protocol, speed: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&speed) {
            return Err(ProtocolError::InvalidArgument {
                reason: format!("fan speed {} outside 0.0..=1.0", speed),
            }
            .into());
        }

        let command = if speed == 0.0 {
            GcodeCommand::new("M107")
        } else {
            GcodeCommand {
                s: Some((speed * 255.0).round()),
                ..GcodeCommand::new("M106")
            }
        };
        self.send(protocol, &[command])?;
        self.inner.lock().fan_speed = Some(speed);
        Ok(())
    }

    fn get_fan_speed(&self, _protocol: &Protocol) -> Result<Option<f64>> {
        Ok(self.inner.lock().fan_speed)
    }
}

impl MotorControl for GcodeDevice {
    fn set_motor_state(&self, protocol: &Protocol, enabled: bool) -> Result<()> {
        self.send(protocol, &[GcodeCommand::new(if enabled { "M17" } else { "M18" })])?;
        self.inner.lock().motors_enabled = Some(enabled);
        Ok(())
    }

    fn get_motor_state(&self, _protocol: &Protocol) -> Result<Option<bool>> {
        Ok(self.inner.lock().motors_enabled)
    }
}

impl PowerControl for GcodeDevice {
    fn set_power_state(&self, protocol: &Protocol, enabled: bool) -> Result<()> {
        self.send(protocol, &[GcodeCommand::new(if enabled { "M80" } else { "M81" })])?;
        self.inner.lock().power_on = Some(enabled);
        Ok(())
    }

    fn get_power_state(&self, _protocol: &Protocol) -> Result<Option<bool>> {
        Ok(self.inner.lock().power_on)
    }
}

impl FileAware for GcodeDevice {
    fn init_file_storage(&self, protocol: &Protocol) -> Result<()> {
        self.send(protocol, &[GcodeCommand::new("M21")])
    }

    fn eject_file_storage(&self, protocol: &Protocol) -> Result<()> {
        self.send(protocol, &[GcodeCommand::new("M22")])?;
        self.set_storage_available(protocol, false);
        Ok(())
    }

    fn list_files(&self, protocol: &Protocol) -> Result<()> {
        self.send(protocol, &[GcodeCommand::new("M20")])
    }

    fn start_file_print(&self, protocol: &Protocol, name: &str, position: u64, tags: &Tags) -> Result<()> {
        tracing::debug!("Starting storage print of {} (tags: {:?})", name, tags);
        let mut commands = vec![GcodeCommand::with_param("M23", name)];
        if position > 0 {
            commands.push(GcodeCommand {
                s: Some(position as f64),
                ..GcodeCommand::new("M26")
            });
        }
        commands.push(GcodeCommand::new("M24"));
        self.send(protocol, &commands)
    }

    fn pause_file_print(&self, protocol: &Protocol) -> Result<()> {
        self.send(protocol, &[GcodeCommand::new("M25")])
    }

    fn resume_file_print(&self, protocol: &Protocol) -> Result<()> {
        self.send(protocol, &[GcodeCommand::new("M24")])
    }

    fn get_file_print_status(&self, protocol: &Protocol) -> Result<()> {
        self.enqueue(
            protocol,
            vec![QueuedLine {
                line: "M27".to_string(),
                command_type: Some(SD_STATUS_POLL.to_string()),
            }],
        )
    }
}

impl FileManagement for GcodeDevice {
    fn delete_file(&self, protocol: &Protocol, name: &str) -> Result<()> {
        self.send(protocol, &[GcodeCommand::with_param("M30", name)])
    }
}

impl FileStreaming for GcodeDevice {
    fn record_file(&self, protocol: &Protocol, name: &str) -> Result<()> {
        self.send(protocol, &[GcodeCommand::with_param("M28", name)])?;
        self.inner.lock().recording = Some(name.to_string());
        Ok(())
    }

    fn stop_recording_file(&self, protocol: &Protocol) -> Result<()> {
        let name = self.inner.lock().recording.take();
        match name {
            Some(name) => self.send(protocol, &[GcodeCommand::with_param("M29", name)]),
            None => self.send(protocol, &[GcodeCommand::new("M29")]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_extruder() {
        let temps = parse_temperatures("ok T:20.5 /200.0 B:60.1 /60.0 @:0 B@:0");
        assert_eq!(temps.len(), 2);
        assert_eq!(temps["tool0"], TemperatureReading::new(20.5, Some(200.0)));
        assert_eq!(temps["bed"], TemperatureReading::new(60.1, Some(60.0)));
    }

    #[test]
    fn test_parse_multi_extruder_ignores_bare_t() {
        let temps = parse_temperatures("T:210.0 /210.0 T0:210.0 /210.0 T1:180.5 /0.0 B:59.0");
        assert_eq!(temps["tool0"], TemperatureReading::new(210.0, Some(210.0)));
        assert_eq!(temps["tool1"], TemperatureReading::new(180.5, Some(0.0)));
        assert_eq!(temps["bed"], TemperatureReading::new(59.0, None));
        assert_eq!(temps.len(), 3);
    }

    #[test]
    fn test_parse_without_targets() {
        let temps = parse_temperatures("T:19.8 B:21");
        assert_eq!(temps["tool0"], TemperatureReading::new(19.8, None));
        assert_eq!(temps["bed"].actual, 21.0);
    }

    #[test]
    fn test_temperature_line_detection() {
        assert!(is_temperature_line("T:20"));
        assert!(is_temperature_line("ok T:20 /0"));
        assert!(is_temperature_line("T0:200"));
        assert!(!is_temperature_line("echo:SD card ok"));
    }

    #[test]
    fn test_parse_file_entry() {
        assert_eq!(parse_file_entry("CUBE.GCO 12345"), FileEntry::new("CUBE.GCO", Some(12345)));
        assert_eq!(parse_file_entry("NOSIZE.GCO"), FileEntry::new("NOSIZE.GCO", None));
        assert_eq!(
            parse_file_entry("MY PART.GCO x"),
            FileEntry::new("MY PART.GCO x", None)
        );
    }

    #[test]
    fn test_supported_jobs() {
        let device = GcodeDevice::new();
        assert!(device.supports_job(JobKind::LocalGcode));
        assert!(device.supports_job(JobKind::SdFile));
        assert!(device.supports_job(JobKind::Stream));
        assert_eq!(device.name(), "reprap");
    }
}
