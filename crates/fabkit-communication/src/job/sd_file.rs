//! Printing a file stored on the device
//!
//! The device runs the print on its own; the host only starts it, polls
//! for status and follows the file events the device protocol reports.

use super::{Job, JobCore, JobKind, JobListener};
use crate::command::Tags;
use crate::protocol::{Protocol, ProtocolListener};
use fabkit_core::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Print of a file on the device's removable storage
pub struct SdFileJob {
    core: JobCore,
    filename: String,
    status_interval: Duration,
    protocol: Mutex<Weak<Protocol>>,
    active: AtomicBool,
    size: Mutex<Option<u64>>,
    last_pos: Mutex<Option<u64>>,
    self_ref: Weak<SdFileJob>,
}

impl SdFileJob {
    /// Create a job printing `filename`, polling status every `status_interval`
    pub fn new(filename: impl Into<String>, status_interval: Duration) -> Arc<Self> {
        let filename = filename.into();
        Arc::new_cyclic(|self_ref| Self {
            core: JobCore::new(filename.clone()),
            filename,
            status_interval,
            protocol: Mutex::new(Weak::new()),
            active: AtomicBool::new(false),
            size: Mutex::new(None),
            last_pos: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// File name on the device
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Whether the print is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Ask the device for a status report if it can take a command
    pub fn poll_status(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let Some(protocol) = self.protocol.lock().upgrade() else {
            return Ok(());
        };
        if protocol.can_send() {
            protocol.file_aware()?.get_file_print_status(&protocol)?;
        }
        Ok(())
    }

    /// Poll status on the tokio runtime until the print stops
    pub fn spawn_status_poller(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let job = Arc::downgrade(self);
        let period = self.status_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(job) = job.upgrade() else {
                    break;
                };
                if !job.is_active() {
                    break;
                }
                if let Err(e) = job.poll_status() {
                    tracing::warn!("Status poll for {} failed: {}", job.filename, e);
                }
            }
        })
    }

    fn as_protocol_listener(&self) -> Option<Arc<dyn ProtocolListener>> {
        self.self_ref
            .upgrade()
            .map(|job| job as Arc<dyn ProtocolListener>)
    }

    fn detach(&self) -> Option<Arc<Protocol>> {
        let protocol = self.protocol.lock().upgrade()?;
        if let Some(listener) = self.as_protocol_listener() {
            protocol.unregister_listener(&listener);
        }
        Some(protocol)
    }
}

impl Job for SdFileJob {
    fn id(&self) -> uuid::Uuid {
        self.core.id()
    }

    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn kind(&self) -> JobKind {
        JobKind::SdFile
    }

    fn can_process(&self, protocol: &Protocol) -> bool {
        protocol.device().supports_job(JobKind::SdFile) && protocol.device().file_aware().is_some()
    }

    fn process(&self, protocol: &Arc<Protocol>, position: u64, tags: &Tags) -> Result<()> {
        *self.protocol.lock() = Arc::downgrade(protocol);
        if let Some(listener) = self.as_protocol_listener() {
            protocol.register_listener(&listener);
        }
        *self.last_pos.lock() = Some(position);
        self.active.store(true, Ordering::SeqCst);
        self.core.mark_started();

        let started = protocol
            .file_aware()
            .and_then(|files| files.start_file_print(protocol, &self.filename, position, tags));
        if let Err(e) = started {
            self.active.store(false, Ordering::SeqCst);
            self.detach();
            return Err(e);
        }
        Ok(())
    }

    /// Stop the device print with `M25`.
    ///
    /// A stop still queued behind an unacknowledged line when the link
    /// closes is dropped, and the device keeps printing.
    fn cancel(&self, error: bool) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(protocol) = self.detach() {
            let paused = protocol
                .file_aware()
                .and_then(|files| files.pause_file_print(&protocol));
            if let Err(e) = paused {
                tracing::warn!("Failed to stop device print of {}: {}", self.filename, e);
            }
        }
        if error {
            self.core.notify_failed(self);
        } else {
            self.core.notify_cancelled(self);
        }
    }

    fn size(&self) -> Option<u64> {
        *self.size.lock()
    }

    fn pos(&self) -> Option<u64> {
        *self.last_pos.lock()
    }

    fn progress(&self) -> Option<f64> {
        match (self.pos(), self.size()) {
            (Some(pos), Some(size)) if size > 0 => Some(pos as f64 / size as f64),
            _ => None,
        }
    }

    fn elapsed(&self) -> Option<Duration> {
        self.core.elapsed()
    }

    fn register_listener(&self, listener: &Arc<dyn JobListener>) -> bool {
        self.core.register_listener(listener)
    }

    fn unregister_listener(&self, listener: &Arc<dyn JobListener>) -> bool {
        self.core.unregister_listener(listener)
    }
}

impl ProtocolListener for SdFileJob {
    fn on_protocol_file_print_started(&self, _protocol: &Protocol, _name: &str, size: u64) {
        if !self.is_active() {
            return;
        }
        *self.size.lock() = Some(size);
        self.core.notify_started(self);
    }

    fn on_protocol_file_status(&self, _protocol: &Protocol, pos: u64, total: u64) {
        if !self.is_active() {
            return;
        }
        *self.last_pos.lock() = Some(pos);
        *self.size.lock() = Some(total);
        self.core.notify_progress(self, self.progress());
    }

    fn on_protocol_file_print_done(&self, _protocol: &Protocol) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.detach();
        self.core.notify_done(self);
    }
}
