//! Jobs backed by a file on the host
//!
//! [`LocalGcodeFileJob`] feeds a G-code file to the device line by line.
//! [`LocalGcodeStreamJob`] copies a file onto the device's storage through
//! the file-streaming capability.

use super::{Job, JobCore, JobKind};
use crate::command::{strip_comment, Command, Tags};
use crate::protocol::Protocol;
use fabkit_core::{JobError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Line reader over a local file with a tracked byte position
#[derive(Debug)]
struct FileSource {
    path: PathBuf,
    size: u64,
    reader: Mutex<Option<BufReader<File>>>,
    pos: AtomicU64,
}

impl FileSource {
    fn new(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|_| JobError::FileNotFound {
            path: path.display().to_string(),
        })?;
        if !metadata.is_file() {
            return Err(JobError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            reader: Mutex::new(None),
            pos: AtomicU64::new(0),
        })
    }

    fn io_error(&self, err: std::io::Error) -> JobError {
        JobError::Io {
            name: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }

    fn open(&self, position: u64) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut reader = BufReader::new(file);
        let mut pos = position;

        if position > 0 {
            reader
                .seek(SeekFrom::Start(position))
                .map_err(|e| self.io_error(e))?;
        } else if reader
            .fill_buf()
            .map_err(|e| self.io_error(e))?
            .starts_with(UTF8_BOM)
        {
            reader.consume(UTF8_BOM.len());
            pos = UTF8_BOM.len() as u64;
        }

        self.pos.store(pos, Ordering::SeqCst);
        *self.reader.lock() = Some(reader);
        Ok(())
    }

    /// Close the file, returning whether it was open
    fn close(&self) -> bool {
        self.reader.lock().take().is_some()
    }

    /// Next raw line without its terminator; `None` at end of file, after
    /// which the file is closed
    fn read_line(&self) -> Result<Option<String>> {
        let mut guard = self.reader.lock();
        let reader = guard.as_mut().ok_or_else(|| JobError::NotOpen {
            name: self.path.display().to_string(),
        })?;

        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                guard.take();
                Ok(None)
            }
            Ok(n) => {
                self.pos.fetch_add(n as u64, Ordering::SeqCst);
                let line = String::from_utf8_lossy(&buf);
                Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
            }
            Err(err) => {
                guard.take();
                Err(self.io_error(err).into())
            }
        }
    }

    fn pos(&self) -> u64 {
        self.pos.load(Ordering::SeqCst)
    }

    fn progress(&self) -> Option<f64> {
        if self.size == 0 {
            return None;
        }
        Some((self.pos() as f64 / self.size as f64).min(1.0))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Sends a local G-code file line by line.
///
/// Comments and surrounding whitespace are stripped and empty lines are
/// skipped. Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug)]
pub struct LocalGcodeFileJob {
    core: JobCore,
    source: FileSource,
}

impl LocalGcodeFileJob {
    /// Create a job for the file at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            core: JobCore::new(file_name(path)),
            source: FileSource::new(path)?,
        })
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.source.path
    }
}

impl Job for LocalGcodeFileJob {
    fn id(&self) -> uuid::Uuid {
        self.core.id()
    }

    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn kind(&self) -> JobKind {
        JobKind::LocalGcode
    }

    fn can_process(&self, protocol: &Protocol) -> bool {
        protocol.device().supports_job(JobKind::LocalGcode)
    }

    fn process(&self, _protocol: &Arc<Protocol>, position: u64, tags: &Tags) -> Result<()> {
        tracing::debug!("Starting {} at byte {} (tags: {:?})", self.name(), position, tags);
        self.source.open(position)?;
        self.core.mark_started();
        self.core.notify_started(self);
        Ok(())
    }

    fn cancel(&self, error: bool) {
        if !self.source.close() {
            return;
        }
        if error {
            self.core.notify_failed(self);
        } else {
            self.core.notify_cancelled(self);
        }
    }

    fn next_command(&self) -> Result<Option<Command>> {
        loop {
            let line = match self.source.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.core.notify_done(self);
                    return Ok(None);
                }
                Err(err) => {
                    if !matches!(err, fabkit_core::Error::Job(JobError::NotOpen { .. })) {
                        tracing::error!("Reading {} failed: {}", self.name(), err);
                        self.core.notify_failed(self);
                    }
                    return Err(err);
                }
            };

            let processed = strip_comment(&line);
            if processed.is_empty() {
                continue;
            }
            self.core.notify_progress(self, self.source.progress());
            return Ok(Some(Command::from_line(&processed)));
        }
    }

    fn size(&self) -> Option<u64> {
        Some(self.source.size)
    }

    fn pos(&self) -> Option<u64> {
        Some(self.source.pos())
    }

    fn progress(&self) -> Option<f64> {
        self.source.progress()
    }

    fn elapsed(&self) -> Option<Duration> {
        self.core.elapsed()
    }

    fn register_listener(&self, listener: &Arc<dyn super::JobListener>) -> bool {
        self.core.register_listener(listener)
    }

    fn unregister_listener(&self, listener: &Arc<dyn super::JobListener>) -> bool {
        self.core.unregister_listener(listener)
    }
}

/// Copies a local file onto the device's storage.
///
/// Lines are forwarded as they are, comments included; only line endings
/// and surrounding whitespace are removed. Recording is started when the
/// job is processed and stopped at end of file or on cancel.
#[derive(Debug)]
pub struct LocalGcodeStreamJob {
    core: JobCore,
    source: FileSource,
    remote_name: String,
    protocol: Mutex<Weak<Protocol>>,
}

impl LocalGcodeStreamJob {
    /// Stream the file at `path` to `remote_name` on the device
    pub fn new(path: impl AsRef<Path>, remote_name: impl Into<String>) -> Result<Self> {
        let remote_name = remote_name.into();
        Ok(Self {
            core: JobCore::new(remote_name.clone()),
            source: FileSource::new(path.as_ref())?,
            remote_name,
            protocol: Mutex::new(Weak::new()),
        })
    }

    /// Target file name on the device
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    fn stop_recording(&self) {
        let protocol = self.protocol.lock().upgrade();
        if let Some(protocol) = protocol {
            let result = protocol
                .file_streaming()
                .and_then(|streaming| streaming.stop_recording_file(&protocol));
            if let Err(e) = result {
                tracing::warn!("Failed to stop recording {}: {}", self.remote_name, e);
            }
        }
    }
}

impl Job for LocalGcodeStreamJob {
    fn id(&self) -> uuid::Uuid {
        self.core.id()
    }

    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn kind(&self) -> JobKind {
        JobKind::Stream
    }

    fn can_process(&self, protocol: &Protocol) -> bool {
        protocol.device().supports_job(JobKind::Stream)
            && protocol.device().file_streaming().is_some()
    }

    fn process(&self, protocol: &Arc<Protocol>, position: u64, tags: &Tags) -> Result<()> {
        tracing::debug!(
            "Streaming {} to {} (tags: {:?})",
            self.source.path.display(),
            self.remote_name,
            tags
        );
        self.source.open(position)?;
        *self.protocol.lock() = Arc::downgrade(protocol);

        if let Err(e) = protocol
            .file_streaming()
            .and_then(|streaming| streaming.record_file(protocol, &self.remote_name))
        {
            self.source.close();
            return Err(e);
        }

        self.core.mark_started();
        self.core.notify_started(self);
        Ok(())
    }

    fn cancel(&self, error: bool) {
        if !self.source.close() {
            return;
        }
        self.stop_recording();
        if error {
            self.core.notify_failed(self);
        } else {
            self.core.notify_cancelled(self);
        }
    }

    fn next_command(&self) -> Result<Option<Command>> {
        loop {
            let line = match self.source.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.stop_recording();
                    self.core.notify_done(self);
                    return Ok(None);
                }
                Err(err) => {
                    if !matches!(err, fabkit_core::Error::Job(JobError::NotOpen { .. })) {
                        self.stop_recording();
                        self.core.notify_failed(self);
                    }
                    return Err(err);
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.core.notify_progress(self, self.source.progress());
            return Ok(Some(Command::from_line(line)));
        }
    }

    fn size(&self) -> Option<u64> {
        Some(self.source.size)
    }

    fn pos(&self) -> Option<u64> {
        Some(self.source.pos())
    }

    fn progress(&self) -> Option<f64> {
        self.source.progress()
    }

    fn elapsed(&self) -> Option<Duration> {
        self.core.elapsed()
    }

    fn register_listener(&self, listener: &Arc<dyn super::JobListener>) -> bool {
        self.core.register_listener(listener)
    }

    fn unregister_listener(&self, listener: &Arc<dyn super::JobListener>) -> bool {
        self.core.unregister_listener(listener)
    }
}
