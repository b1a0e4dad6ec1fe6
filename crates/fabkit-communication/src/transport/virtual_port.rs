//! In-memory virtual transport
//!
//! Stands in for a real device in tests and dry runs: inbound data is
//! scripted with [`VirtualTransport::push_line`], outbound data is captured,
//! and link events (connect completion, connection loss) are triggered by
//! hand. With auto-ok enabled every written line is acknowledged with `ok`,
//! which is enough to stream a job through an ack-gated device protocol.

use super::{ConnectionParams, Transport, TransportCore, TransportListener};
use fabkit_core::{Result, TransportError, TransportState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory transport
pub struct VirtualTransport {
    core: TransportCore,
    name: String,
    deferred_connect: bool,
    auto_ok: AtomicBool,
    fail_connect: AtomicBool,
    connect_calls: AtomicUsize,
    inbound: Mutex<VecDeque<u8>>,
    outbound: Mutex<Vec<u8>>,
}

impl VirtualTransport {
    /// Create a transport that connects immediately
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: TransportCore::new(),
            name: name.into(),
            deferred_connect: false,
            auto_ok: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(Vec::new()),
        }
    }

    /// Create a transport that stays `Connecting` until
    /// [`complete_connect`](Self::complete_connect) is called
    pub fn deferred(name: impl Into<String>) -> Self {
        Self {
            deferred_connect: true,
            ..Self::new(name)
        }
    }

    /// Acknowledge every written line with `ok`
    pub fn with_auto_ok(self) -> Self {
        self.auto_ok.store(true, Ordering::SeqCst);
        self
    }

    /// Toggle automatic acknowledgements
    pub fn set_auto_ok(&self, enabled: bool) {
        self.auto_ok.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `connect` calls fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.core.listener_count()
    }

    /// Finish a deferred connect
    pub fn complete_connect(&self) {
        self.core.mark_connected(self);
    }

    /// Simulate the link going down, with `error` set for a lost connection
    pub fn drop_connection(&self, error: Option<TransportError>) {
        self.core.mark_disconnected(self, error);
    }

    /// Queue raw inbound bytes
    pub fn push_data(&self, data: &[u8]) {
        self.inbound.lock().extend(data.iter().copied());
    }

    /// Queue an inbound line; a newline is appended
    pub fn push_line(&self, line: &str) {
        let mut inbound = self.inbound.lock();
        inbound.extend(line.as_bytes().iter().copied());
        inbound.push_back(b'\n');
    }

    /// Everything written so far
    pub fn sent_data(&self) -> Vec<u8> {
        self.outbound.lock().clone()
    }

    /// Everything written so far, split into lines
    pub fn sent_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.outbound.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Forget captured outbound data
    pub fn clear_sent(&self) {
        self.outbound.lock().clear();
    }
}

impl Transport for VirtualTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> TransportState {
        self.core.state()
    }

    fn connect(&self, _params: &ConnectionParams) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_connect.load(Ordering::SeqCst) {
            self.core.set_state(TransportState::DisconnectedWithError);
            return Err(TransportError::FailedToOpen {
                port: self.name.clone(),
                reason: "virtual connect failure".to_string(),
            }
            .into());
        }

        self.inbound.lock().clear();
        if self.deferred_connect {
            self.core.set_state(TransportState::Connecting);
            self.core.log_message(self, "Waiting for virtual link");
        } else {
            self.core.mark_connected(self);
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.core.mark_disconnected(self, None);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        if self.core.state() != TransportState::Connected {
            return Err(TransportError::NotConnected.into());
        }

        self.outbound.lock().extend_from_slice(data);
        self.core.log_sent(self, data);

        if self.auto_ok.load(Ordering::SeqCst) {
            let lines = data.iter().filter(|&&b| b == b'\n').count();
            for _ in 0..lines {
                self.push_line("ok");
            }
        }
        Ok(data.len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.core.state() != TransportState::Connected {
            return Err(TransportError::NotConnected.into());
        }

        let n = {
            let mut inbound = self.inbound.lock();
            let n = buf.len().min(inbound.len());
            for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n > 0 {
            self.core.log_received(self, &buf[..n]);
        }
        Ok(n)
    }

    fn register_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.core.register_listener(listener)
    }

    fn unregister_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.core.unregister_listener(listener)
    }
}
