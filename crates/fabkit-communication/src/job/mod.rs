//! Jobs
//!
//! A job is a unit of device work, typically a print. The protocol
//! orchestrator binds at most one job at a time, registers itself as the
//! job's listener while bound, and returns to `Connected` when the job
//! reports done, cancelled or failed.

pub mod local_file;
pub mod sd_file;

use crate::command::{Command, Tags};
use crate::protocol::Protocol;
use fabkit_core::{ListenerRegistry, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Job kinds a device protocol can declare support for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Local G-code file sent line by line
    LocalGcode,
    /// Local file streamed onto the device's storage
    Stream,
    /// File printed from the device's own storage
    SdFile,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalGcode => write!(f, "local gcode"),
            Self::Stream => write!(f, "stream"),
            Self::SdFile => write!(f, "sd file"),
        }
    }
}

/// Progress report
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JobProgress {
    /// Fraction done in `0.0..=1.0`, if known
    pub progress: Option<f64>,
    /// Time since the job started
    pub elapsed: Option<Duration>,
    /// Estimated total duration, extrapolated from progress so far
    pub estimated_total: Option<Duration>,
}

/// Receiver of job lifecycle events.
///
/// All methods default to doing nothing.
pub trait JobListener: Send + Sync {
    /// The job started executing
    fn on_job_started(&self, _job: &dyn Job) {}

    /// The job ran to completion
    fn on_job_done(&self, _job: &dyn Job) {}

    /// The job was cancelled
    fn on_job_cancelled(&self, _job: &dyn Job) {}

    /// The job stopped because of an error
    fn on_job_failed(&self, _job: &dyn Job) {}

    /// The job made progress
    fn on_job_progress(&self, _job: &dyn Job, _progress: &JobProgress) {}
}

/// A unit of device work
pub trait Job: Send + Sync {
    /// Unique id of this job instance
    fn id(&self) -> Uuid;

    /// Display name
    fn name(&self) -> String;

    /// Job kind
    fn kind(&self) -> JobKind;

    /// Whether this job can run on `protocol`
    fn can_process(&self, protocol: &Protocol) -> bool;

    /// Start executing from `position`.
    ///
    /// Completion is reported through listener callbacks, which may fire
    /// before this returns.
    fn process(&self, protocol: &Arc<Protocol>, position: u64, tags: &Tags) -> Result<()>;

    /// Stop executing; `error` selects failed over cancelled
    fn cancel(&self, error: bool);

    /// Next command to send, for jobs that are fed line by line
    fn next_command(&self) -> Result<Option<Command>> {
        Ok(None)
    }

    /// Total size in bytes, if known
    fn size(&self) -> Option<u64> {
        None
    }

    /// Current position in bytes, if known
    fn pos(&self) -> Option<u64> {
        None
    }

    /// Fraction done, if known
    fn progress(&self) -> Option<f64> {
        None
    }

    /// Time since the job started
    fn elapsed(&self) -> Option<Duration> {
        None
    }

    /// Register a listener
    fn register_listener(&self, listener: &Arc<dyn JobListener>) -> bool;

    /// Unregister a listener
    fn unregister_listener(&self, listener: &Arc<dyn JobListener>) -> bool;
}

/// Identity, timing and listener handling shared by job implementations
#[derive(Debug)]
pub struct JobCore {
    id: Uuid,
    name: String,
    started_at: Mutex<Option<Instant>>,
    listeners: ListenerRegistry<dyn JobListener>,
}

impl JobCore {
    /// Create a core for a job called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            started_at: Mutex::new(None),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the clock
    pub fn mark_started(&self) {
        *self.started_at.lock() = Some(Instant::now());
    }

    /// Time since [`mark_started`](Self::mark_started)
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.lock().map(|start| start.elapsed())
    }

    /// Total duration extrapolated from `progress`
    pub fn time_estimate(&self, progress: Option<f64>) -> Option<Duration> {
        let elapsed = self.elapsed()?;
        match progress {
            Some(progress) if progress > 0.0 => {
                Some(Duration::from_secs_f64(elapsed.as_secs_f64() / progress))
            }
            _ => None,
        }
    }

    pub fn register_listener(&self, listener: &Arc<dyn JobListener>) -> bool {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn JobListener>) -> bool {
        self.listeners.unregister(listener)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_started(&self, job: &dyn Job) {
        self.listeners
            .notify("on_job_started", |listener| listener.on_job_started(job));
    }

    pub fn notify_done(&self, job: &dyn Job) {
        self.listeners
            .notify("on_job_done", |listener| listener.on_job_done(job));
    }

    pub fn notify_cancelled(&self, job: &dyn Job) {
        self.listeners
            .notify("on_job_cancelled", |listener| listener.on_job_cancelled(job));
    }

    pub fn notify_failed(&self, job: &dyn Job) {
        self.listeners
            .notify("on_job_failed", |listener| listener.on_job_failed(job));
    }

    /// Report progress with timing filled in from this core
    pub fn notify_progress(&self, job: &dyn Job, progress: Option<f64>) {
        let report = JobProgress {
            progress,
            elapsed: self.elapsed(),
            estimated_total: self.time_estimate(progress),
        };
        self.listeners.notify("on_job_progress", |listener| {
            listener.on_job_progress(job, &report)
        });
    }
}
