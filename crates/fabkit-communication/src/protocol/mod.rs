//! Protocol orchestrator
//!
//! [`Protocol`] binds at most one transport and at most one job to a state
//! machine and fans lifecycle events out to its listeners:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──transport connected──▶ Connected
//!      ▲                                                         │  ▲
//!      │                                              process    │  │ job done/cancelled/failed,
//!      │                                                         ▼  │ cancel_processing
//! Disconnecting ◀──disconnect── (any live state)              Printing ◀─resume─┐
//!                                                                │              │
//!                                                                └──pause──▶ Paused
//! ```
//!
//! Every transition runs the device's hook for the new state, emits a
//! protocol log line and notifies `on_protocol_state` with `(old, new)`.
//! Same-state transitions are dropped entirely. Transitions requested while
//! another one is being dispatched (from a hook or a listener) are queued,
//! so listeners always observe them in the order they happened.
//!
//! No lock is held while calling into the device, transports, jobs or
//! listeners. Public operations and transport/job callbacks are expected to
//! come from a single logical owner.

pub mod capabilities;
pub mod listeners;

use crate::command::{Command, Tags};
use crate::device::DeviceProtocol;
use crate::job::{Job, JobListener, JobProgress};
use crate::transport::{ConnectionParams, Transport, TransportListener};
use capabilities::{
    AxisMotion, FabricationMotion, FanControl, FileAware, FileManagement, FileStreaming,
    MotorControl, PowerControl,
};
use fabkit_core::{
    FileEntry, ListenerRegistry, ProtocolError, ProtocolState, Result, Temperatures,
    TransportError, TransportState,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Size of the buffer used for each transport read
const READ_CHUNK: usize = 1024;

/// Unterminated input longer than this is handed on as one line
const MAX_LINE_LENGTH: usize = 4 * 1024;

/// Receiver of protocol events.
///
/// All methods default to doing nothing.
pub trait ProtocolListener: Send + Sync {
    /// The protocol moved from `old` to `new`
    fn on_protocol_state(&self, _protocol: &Protocol, _old: ProtocolState, _new: ProtocolState) {}

    /// Protocol log line; traffic is prefixed with `<<<` (in), `>>>` (out)
    /// or `---` (informational)
    fn on_protocol_log(&self, _protocol: &Protocol, _message: &str) {}

    /// Temperature report
    fn on_protocol_temperature(&self, _protocol: &Protocol, _temperatures: &Temperatures) {}

    /// Removable storage became available or went away
    fn on_protocol_file_storage_available(&self, _protocol: &Protocol, _available: bool) {}

    /// File listing of the removable storage
    fn on_protocol_file_list(&self, _protocol: &Protocol, _files: &[FileEntry]) {}

    /// Progress of a print running from storage
    fn on_protocol_file_status(&self, _protocol: &Protocol, _pos: u64, _total: u64) {}

    /// A print from storage started
    fn on_protocol_file_print_started(&self, _protocol: &Protocol, _name: &str, _size: u64) {}

    /// A print from storage finished
    fn on_protocol_file_print_done(&self, _protocol: &Protocol) {}
}

struct ProtocolInner {
    state: ProtocolState,
    transport: Option<Arc<dyn Transport>>,
    job: Option<Arc<dyn Job>>,
}

/// Resets the dispatch flag even if a hook or listener unwinds
struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The protocol orchestrator
pub struct Protocol {
    device: Arc<dyn DeviceProtocol>,
    inner: Mutex<ProtocolInner>,
    listeners: ListenerRegistry<dyn ProtocolListener>,
    transitions: Mutex<VecDeque<(ProtocolState, ProtocolState)>>,
    dispatching: AtomicBool,
    pending_input: Mutex<Vec<u8>>,
    self_ref: Weak<Protocol>,
}

impl Protocol {
    /// Create a disconnected protocol driving `device`
    pub fn new(device: Arc<dyn DeviceProtocol>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            device,
            inner: Mutex::new(ProtocolInner {
                state: ProtocolState::Disconnected,
                transport: None,
                job: None,
            }),
            listeners: ListenerRegistry::new(),
            transitions: Mutex::new(VecDeque::new()),
            dispatching: AtomicBool::new(false),
            pending_input: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// The device protocol
    pub fn device(&self) -> &dyn DeviceProtocol {
        self.device.as_ref()
    }

    /// Current state
    pub fn state(&self) -> ProtocolState {
        self.inner.lock().state
    }

    /// The bound transport
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.lock().transport.clone()
    }

    /// The active job
    pub fn active_job(&self) -> Option<Arc<dyn Job>> {
        self.inner.lock().job.clone()
    }

    pub fn register_listener(&self, listener: &Arc<dyn ProtocolListener>) -> bool {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn ProtocolListener>) -> bool {
        self.listeners.unregister(listener)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ---- connection lifecycle ----

    /// Bind `transport` and start connecting.
    ///
    /// The protocol enters `Connecting` and moves on to `Connected` once the
    /// transport reports a live link. A transport that is already connected
    /// counts as that report. If opening the transport fails it is released
    /// again and the protocol ends in `DisconnectedWithError`.
    pub fn connect(&self, transport: Arc<dyn Transport>, params: &ConnectionParams) -> Result<()> {
        if !self.state().is_disconnected() {
            return Err(ProtocolError::AlreadyConnected.into());
        }

        self.process_protocol_log(&format!(
            "--- Protocol {} connecting via transport {}...",
            self,
            transport.name()
        ));

        self.pending_input.lock().clear();
        if let Some(listener) = self.as_transport_listener() {
            transport.register_listener(&listener);
        }
        self.inner.lock().transport = Some(transport.clone());
        self.set_state(ProtocolState::Connecting);

        match transport.state() {
            TransportState::Disconnected | TransportState::DisconnectedWithError => {
                if let Err(err) = transport.connect(params) {
                    self.process_protocol_log(&format!(
                        "--- Connecting via {} failed: {}",
                        transport.name(),
                        err
                    ));
                    self.release_transport();
                    self.set_state(ProtocolState::DisconnectedWithError);
                    return Err(err);
                }
            }
            TransportState::Connected => self.on_transport_connected(transport.as_ref()),
            TransportState::Connecting => {}
        }
        Ok(())
    }

    /// Tear down the connection.
    ///
    /// An active job is cancelled with `error = true` first, while the
    /// device still accepts commands. The protocol ends in
    /// `DisconnectedWithError` if `error` is set or closing the transport
    /// failed, otherwise in `Disconnected`.
    pub fn disconnect(&self, error: bool) -> Result<()> {
        if self.state().is_disconnecting_or_disconnected() {
            return Err(ProtocolError::NotConnected.into());
        }

        self.abort_job();
        self.set_state(ProtocolState::Disconnecting);

        let mut failed = false;
        if let Some(transport) = self.release_transport() {
            self.process_protocol_log(&format!(
                "--- Protocol {} disconnecting from transport {}",
                self,
                transport.name()
            ));
            if transport.state() == TransportState::Connected {
                if let Err(err) = transport.disconnect() {
                    tracing::warn!("Closing transport {} failed: {}", transport.name(), err);
                    failed = true;
                }
            }
        }

        self.set_state(if error || failed {
            ProtocolState::DisconnectedWithError
        } else {
            ProtocolState::Disconnected
        });
        Ok(())
    }

    // ---- job lifecycle ----

    /// Bind `job` and start it from `position`.
    ///
    /// Requires `Connected` and no active job. The protocol enters
    /// `Printing` once the job reports it started, or when `process`
    /// returns with the job still active.
    pub fn process(&self, job: Arc<dyn Job>, position: u64, tags: &Tags) -> Result<()> {
        let (state, active) = {
            let inner = self.inner.lock();
            (inner.state, inner.job.clone())
        };
        if let Some(active) = active {
            return Err(ProtocolError::JobActive { job: active.name() }.into());
        }
        if state != ProtocolState::Connected {
            return Err(ProtocolError::InvalidState {
                operation: "process".to_string(),
                state,
            }
            .into());
        }
        if !job.can_process(self) {
            return Err(ProtocolError::IncompatibleJob {
                job: job.name(),
                protocol: self.to_string(),
            }
            .into());
        }
        let this = self
            .self_ref
            .upgrade()
            .ok_or_else(|| fabkit_core::Error::other("protocol is shutting down"))?;

        tracing::debug!("Processing job {} from {} (tags: {:?})", job.name(), position, tags);
        self.process_protocol_log(&format!("--- Processing job {}", job.name()));

        if let Some(listener) = self.as_job_listener() {
            job.register_listener(&listener);
        }
        self.inner.lock().job = Some(job.clone());

        if let Err(err) = job.process(&this, position, tags) {
            if self.is_active_job(job.as_ref()) {
                self.release_job();
            }
            // the job may have reported started before failing
            let (current, has_job) = self.job_snapshot();
            if !has_job && matches!(current, ProtocolState::Printing | ProtocolState::Paused) {
                self.set_state(state);
            }
            self.process_protocol_log(&format!("--- Job {} failed to start: {}", job.name(), err));
            return Err(err);
        }

        if self.is_active_job(job.as_ref()) && self.state() == ProtocolState::Connected {
            self.set_state(ProtocolState::Printing);
        }
        Ok(())
    }

    /// `Printing` → `Paused`; does nothing without an active job
    pub fn pause_processing(&self, tags: &Tags) {
        let (state, has_job) = self.job_snapshot();
        if has_job && state == ProtocolState::Printing {
            tracing::debug!("Pausing (tags: {:?})", tags);
            self.set_state(ProtocolState::Paused);
        }
    }

    /// `Paused` → `Printing`; does nothing without an active job
    pub fn resume_processing(&self, tags: &Tags) {
        let (state, has_job) = self.job_snapshot();
        if has_job && state == ProtocolState::Paused {
            tracing::debug!("Resuming (tags: {:?})", tags);
            self.set_state(ProtocolState::Printing);
        }
    }

    /// Ask the active job to cancel and return to `Connected` immediately.
    ///
    /// Only acts while `Printing` or `Paused`. The job may still be winding
    /// down when this returns; its own termination callback arriving later
    /// is ignored.
    pub fn cancel_processing(&self, error: bool, tags: &Tags) {
        let (state, job) = {
            let inner = self.inner.lock();
            (inner.state, inner.job.clone())
        };
        let Some(job) = job else {
            return;
        };
        if !matches!(state, ProtocolState::Printing | ProtocolState::Paused) {
            return;
        }

        tracing::debug!("Cancelling {} (error: {}, tags: {:?})", job.name(), error, tags);
        self.process_protocol_log(&format!("--- Cancelling job {}", job.name()));
        job.cancel(error);
        if self.is_active_job(job.as_ref()) {
            self.release_job();
        }
        self.set_state(ProtocolState::Connected);
    }

    // ---- device commands ----

    /// Whether the device can take another command right now
    pub fn can_send(&self) -> bool {
        self.device.can_send(self)
    }

    /// Send commands through the device protocol
    pub fn send_commands(&self, command_type: Option<&str>, commands: &[Command]) -> Result<()> {
        self.device.send_commands(self, command_type, commands)
    }

    /// Ask the device protocol to recover from a stalled exchange
    pub fn repair(&self) -> Result<()> {
        self.device.repair(self)
    }

    /// Write one line to the transport, appending a newline
    pub fn write_line(&self, line: &str) -> Result<()> {
        let transport = self.transport().ok_or(TransportError::NotConnected)?;
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        transport.write(&data)?;
        Ok(())
    }

    /// Read what the transport has and hand complete lines to the device.
    ///
    /// Returns the number of bytes read; `Ok(0)` when nothing was waiting.
    pub fn receive(&self) -> Result<usize> {
        let transport = self.transport().ok_or(TransportError::NotConnected)?;
        let mut buf = [0u8; READ_CHUNK];
        let n = transport.read(&mut buf)?;
        if n == 0 {
            return Ok(0);
        }

        let lines: Vec<String> = {
            let mut pending = self.pending_input.lock();
            pending.extend_from_slice(&buf[..n]);
            let mut lines = Vec::new();
            while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=end).collect();
                lines.push(String::from_utf8_lossy(&raw).trim().to_string());
            }
            if pending.len() > MAX_LINE_LENGTH {
                tracing::warn!("No line end after {} bytes, flushing input", pending.len());
                let raw: Vec<u8> = pending.drain(..).collect();
                lines.push(String::from_utf8_lossy(&raw).trim().to_string());
            }
            lines
        };

        for line in lines.iter().filter(|line| !line.is_empty()) {
            self.device.on_line_received(self, line);
        }
        Ok(n)
    }

    // ---- capabilities ----

    pub fn axis_motion(&self) -> Result<&dyn AxisMotion> {
        self.device
            .axis_motion()
            .ok_or_else(|| ProtocolError::not_supported("axis motion", "axis_motion").into())
    }

    pub fn fabrication_motion(&self) -> Result<&dyn FabricationMotion> {
        self.device.fabrication_motion().ok_or_else(|| {
            ProtocolError::not_supported("fabrication motion", "fabrication_motion").into()
        })
    }

    pub fn fan_control(&self) -> Result<&dyn FanControl> {
        self.device
            .fan_control()
            .ok_or_else(|| ProtocolError::not_supported("fan control", "fan_control").into())
    }

    pub fn motor_control(&self) -> Result<&dyn MotorControl> {
        self.device
            .motor_control()
            .ok_or_else(|| ProtocolError::not_supported("motor control", "motor_control").into())
    }

    pub fn power_control(&self) -> Result<&dyn PowerControl> {
        self.device
            .power_control()
            .ok_or_else(|| ProtocolError::not_supported("power control", "power_control").into())
    }

    pub fn file_aware(&self) -> Result<&dyn FileAware> {
        self.device
            .file_aware()
            .ok_or_else(|| ProtocolError::not_supported("file storage", "file_aware").into())
    }

    pub fn file_management(&self) -> Result<&dyn FileManagement> {
        self.device.file_management().ok_or_else(|| {
            ProtocolError::not_supported("file management", "file_management").into()
        })
    }

    pub fn file_streaming(&self) -> Result<&dyn FileStreaming> {
        self.device.file_streaming().ok_or_else(|| {
            ProtocolError::not_supported("file streaming", "file_streaming").into()
        })
    }

    // ---- notifications for device protocols ----

    /// Emit a protocol log line
    pub fn process_protocol_log(&self, message: &str) {
        self.listeners.notify("on_protocol_log", |listener| {
            listener.on_protocol_log(self, message)
        });
    }

    pub fn notify_temperature(&self, temperatures: &Temperatures) {
        self.listeners.notify("on_protocol_temperature", |listener| {
            listener.on_protocol_temperature(self, temperatures)
        });
    }

    pub fn notify_file_storage_available(&self, available: bool) {
        self.listeners
            .notify("on_protocol_file_storage_available", |listener| {
                listener.on_protocol_file_storage_available(self, available)
            });
    }

    pub fn notify_file_list(&self, files: &[FileEntry]) {
        self.listeners.notify("on_protocol_file_list", |listener| {
            listener.on_protocol_file_list(self, files)
        });
    }

    pub fn notify_file_status(&self, pos: u64, total: u64) {
        self.listeners.notify("on_protocol_file_status", |listener| {
            listener.on_protocol_file_status(self, pos, total)
        });
    }

    pub fn notify_file_print_started(&self, name: &str, size: u64) {
        self.listeners
            .notify("on_protocol_file_print_started", |listener| {
                listener.on_protocol_file_print_started(self, name, size)
            });
    }

    pub fn notify_file_print_done(&self) {
        self.listeners.notify("on_protocol_file_print_done", |listener| {
            listener.on_protocol_file_print_done(self)
        });
    }

    // ---- internals ----

    /// The single place the state changes
    fn set_state(&self, new: ProtocolState) {
        {
            let mut inner = self.inner.lock();
            let old = inner.state;
            if old == new {
                return;
            }
            inner.state = new;
            self.transitions.lock().push_back((old, new));
        }

        loop {
            if self.dispatching.swap(true, Ordering::SeqCst) {
                return;
            }
            {
                let _guard = DispatchGuard(&self.dispatching);
                loop {
                    let next = self.transitions.lock().pop_front();
                    let Some((old, new)) = next else {
                        break;
                    };
                    self.dispatch_transition(old, new);
                }
            }
            if self.transitions.lock().is_empty() {
                return;
            }
        }
    }

    fn dispatch_transition(&self, old: ProtocolState, new: ProtocolState) {
        self.dispatch_state_hook(old, new);
        self.process_protocol_log(&format!(
            "--- Protocol state changed from '{}' to '{}'",
            old, new
        ));
        self.listeners.notify("on_protocol_state", |listener| {
            listener.on_protocol_state(self, old, new)
        });
    }

    fn dispatch_state_hook(&self, old: ProtocolState, new: ProtocolState) {
        let device = self.device.as_ref();
        match new {
            ProtocolState::Disconnected => device.on_disconnected(self, old),
            ProtocolState::DisconnectedWithError => device.on_disconnected_with_error(self, old),
            ProtocolState::Connecting => device.on_connecting(self, old),
            ProtocolState::Connected => device.on_connected(self, old),
            ProtocolState::Disconnecting => device.on_disconnecting(self, old),
            ProtocolState::Printing => device.on_printing(self, old),
            ProtocolState::Pausing => device.on_pausing(self, old),
            ProtocolState::Paused => device.on_paused(self, old),
            ProtocolState::Cancelling => device.on_cancelling(self, old),
            ProtocolState::Error => device.on_error(self, old),
        }
    }

    fn job_snapshot(&self) -> (ProtocolState, bool) {
        let inner = self.inner.lock();
        (inner.state, inner.job.is_some())
    }

    fn as_transport_listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.self_ref
            .upgrade()
            .map(|protocol| protocol as Arc<dyn TransportListener>)
    }

    fn as_job_listener(&self) -> Option<Arc<dyn JobListener>> {
        self.self_ref
            .upgrade()
            .map(|protocol| protocol as Arc<dyn JobListener>)
    }

    fn is_bound_transport(&self, transport: &dyn Transport) -> bool {
        self.inner
            .lock()
            .transport
            .as_ref()
            .is_some_and(|bound| {
                std::ptr::addr_eq(Arc::as_ptr(bound), std::ptr::from_ref(transport))
            })
    }

    fn is_active_job(&self, job: &dyn Job) -> bool {
        self.inner
            .lock()
            .job
            .as_ref()
            .is_some_and(|active| {
                std::ptr::addr_eq(Arc::as_ptr(active), std::ptr::from_ref(job))
            })
    }

    /// Unregister from and unbind the transport
    fn release_transport(&self) -> Option<Arc<dyn Transport>> {
        let transport = self.inner.lock().transport.take()?;
        if let Some(listener) = self.as_transport_listener() {
            transport.unregister_listener(&listener);
        }
        Some(transport)
    }

    /// Unregister from and unbind the job
    fn release_job(&self) -> Option<Arc<dyn Job>> {
        let job = self.inner.lock().job.take()?;
        if let Some(listener) = self.as_job_listener() {
            job.unregister_listener(&listener);
        }
        Some(job)
    }

    /// Release the active job and cancel it with an error
    fn abort_job(&self) {
        if let Some(job) = self.release_job() {
            self.process_protocol_log(&format!("--- Aborting job {}", job.name()));
            job.cancel(true);
        }
    }

    fn finish_job(&self, job: &dyn Job, outcome: &str) {
        if !self.is_active_job(job) {
            tracing::debug!("Ignoring {} of inactive job {}", outcome, job.name());
            return;
        }

        self.release_job();
        self.process_protocol_log(&format!("--- Job {} {}", job.name(), outcome));
        if matches!(
            self.state(),
            ProtocolState::Printing | ProtocolState::Paused | ProtocolState::Connected
        ) {
            self.set_state(ProtocolState::Connected);
        }
    }

    fn log_traffic(&self, marker: &str, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        self.process_protocol_log(&format!("{} {}", marker, text.trim()));
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device.name())
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Protocol")
            .field("device", &self.device.name())
            .field("state", &inner.state)
            .field("transport", &inner.transport.as_ref().map(|t| t.name()))
            .field("job", &inner.job.as_ref().map(|j| j.name()))
            .finish()
    }
}

impl TransportListener for Protocol {
    fn on_transport_connected(&self, transport: &dyn Transport) {
        if !self.is_bound_transport(transport) {
            tracing::debug!("Ignoring connect of unbound transport {}", transport.name());
            return;
        }
        if self.state() == ProtocolState::Connecting {
            self.set_state(ProtocolState::Connected);
        }
    }

    fn on_transport_disconnected(&self, transport: &dyn Transport, error: Option<&TransportError>) {
        if !self.is_bound_transport(transport) {
            tracing::debug!("Ignoring disconnect of unbound transport {}", transport.name());
            return;
        }
        if self.state().is_disconnecting_or_disconnected() {
            return;
        }

        match error {
            Some(err) => self.process_protocol_log(&format!(
                "--- Transport {} disconnected: {}",
                transport.name(),
                err
            )),
            None => self.process_protocol_log(&format!(
                "--- Transport {} disconnected",
                transport.name()
            )),
        }
        if let Err(err) = self.disconnect(error.is_some()) {
            tracing::debug!("Disconnect after transport loss: {}", err);
        }
    }

    fn on_transport_log_received_data(&self, _transport: &dyn Transport, data: &[u8]) {
        self.log_traffic("<<<", data);
    }

    fn on_transport_log_sent_data(&self, _transport: &dyn Transport, data: &[u8]) {
        self.log_traffic(">>>", data);
    }

    fn on_transport_log_message(&self, _transport: &dyn Transport, message: &str) {
        self.log_traffic("---", message.as_bytes());
    }
}

impl JobListener for Protocol {
    fn on_job_started(&self, job: &dyn Job) {
        if !self.is_active_job(job) {
            tracing::debug!("Ignoring start of inactive job {}", job.name());
            return;
        }
        self.set_state(ProtocolState::Printing);
    }

    fn on_job_done(&self, job: &dyn Job) {
        self.finish_job(job, "done");
    }

    fn on_job_cancelled(&self, job: &dyn Job) {
        self.finish_job(job, "cancelled");
    }

    fn on_job_failed(&self, job: &dyn Job) {
        self.finish_job(job, "failed");
    }

    fn on_job_progress(&self, job: &dyn Job, progress: &JobProgress) {
        tracing::trace!("Job {} progress {:?}", job.name(), progress.progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{NullDevice, StateHooks};
    use crate::job::JobKind;
    use crate::transport::virtual_port::VirtualTransport;

    #[derive(Default)]
    struct HookDevice {
        hooks: Mutex<Vec<String>>,
    }

    impl StateHooks for HookDevice {
        fn on_connecting(&self, _protocol: &Protocol, old: ProtocolState) {
            self.hooks.lock().push(format!("connecting from {}", old));
        }

        fn on_connected(&self, _protocol: &Protocol, old: ProtocolState) {
            self.hooks.lock().push(format!("connected from {}", old));
        }

        fn on_disconnected(&self, _protocol: &Protocol, old: ProtocolState) {
            self.hooks.lock().push(format!("disconnected from {}", old));
        }
    }

    impl DeviceProtocol for HookDevice {
        fn name(&self) -> &str {
            "hooks"
        }

        fn supported_jobs(&self) -> &[JobKind] {
            &[]
        }
    }

    #[derive(Default)]
    struct LogRecorder {
        lines: Mutex<Vec<String>>,
    }

    impl ProtocolListener for LogRecorder {
        fn on_protocol_log(&self, _protocol: &Protocol, message: &str) {
            self.lines.lock().push(message.to_string());
        }
    }

    #[test]
    fn test_hooks_follow_transitions() {
        let device = Arc::new(HookDevice::default());
        let protocol = Protocol::new(device.clone());
        let transport = Arc::new(VirtualTransport::new("v"));

        protocol
            .connect(transport.clone(), &ConnectionParams::virtual_port())
            .unwrap();
        protocol.disconnect(false).unwrap();

        assert_eq!(
            *device.hooks.lock(),
            vec![
                "connecting from disconnected",
                "connected from connecting",
                "disconnected from disconnecting",
            ]
        );
    }

    #[test]
    fn test_log_lines() {
        let protocol = Protocol::new(Arc::new(NullDevice::new()));
        let recorder = Arc::new(LogRecorder::default());
        let listener: Arc<dyn ProtocolListener> = recorder.clone();
        protocol.register_listener(&listener);

        let transport = Arc::new(VirtualTransport::new("v").with_auto_ok());
        protocol
            .connect(transport.clone(), &ConnectionParams::virtual_port())
            .unwrap();
        protocol.write_line("M105").unwrap();
        protocol.receive().unwrap();

        let lines = recorder.lines.lock().clone();
        assert_eq!(lines[0], "--- Protocol null connecting via transport v...");
        assert!(lines.contains(
            &"--- Protocol state changed from 'disconnected' to 'connecting'".to_string()
        ));
        assert!(lines.contains(&">>> M105".to_string()));
        assert!(lines.contains(&"<<< ok".to_string()));
    }

    #[test]
    fn test_receive_splits_partial_lines() {
        #[derive(Default)]
        struct LineDevice {
            lines: Mutex<Vec<String>>,
        }
        impl StateHooks for LineDevice {}
        impl DeviceProtocol for LineDevice {
            fn name(&self) -> &str {
                "lines"
            }
            fn supported_jobs(&self) -> &[JobKind] {
                &[]
            }
            fn on_line_received(&self, _protocol: &Protocol, line: &str) {
                self.lines.lock().push(line.to_string());
            }
        }

        let device = Arc::new(LineDevice::default());
        let protocol = Protocol::new(device.clone());
        let transport = Arc::new(VirtualTransport::new("v"));
        protocol
            .connect(transport.clone(), &ConnectionParams::virtual_port())
            .unwrap();

        transport.push_data(b"ok T:20");
        protocol.receive().unwrap();
        assert!(device.lines.lock().is_empty());

        transport.push_data(b".5\r\n\nstart\n");
        protocol.receive().unwrap();
        assert_eq!(*device.lines.lock(), vec!["ok T:20.5", "start"]);
        assert_eq!(protocol.receive().unwrap(), 0);
    }

    #[test]
    fn test_unsupported_capabilities() {
        let protocol = Protocol::new(Arc::new(NullDevice::new()));
        let err = protocol.fan_control().err().unwrap();
        assert!(err.is_not_supported());
        assert!(protocol.file_aware().is_err());
        assert!(protocol.write_line("G28").is_err());
        assert_eq!(protocol.to_string(), "null");
    }
}
