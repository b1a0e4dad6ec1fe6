//! Error handling for FabKit
//!
//! Provides error types for all layers of the stack:
//! - Protocol errors (orchestrator precondition violations, unsupported capabilities)
//! - Transport errors (serial/TCP/virtual connections)
//! - Job errors (file-backed and device-backed jobs)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::state::ProtocolState;
use thiserror::Error;

/// Protocol error type
///
/// Precondition violations of the orchestrator's public operations. These
/// are returned synchronously and never retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// `connect` while not disconnected
    #[error("Already connected, disconnect first")]
    AlreadyConnected,

    /// `disconnect` while already disconnecting or disconnected
    #[error("Already disconnecting or disconnected")]
    NotConnected,

    /// The job rejected this protocol
    #[error("Job {job} cannot be processed with protocol {protocol}")]
    IncompatibleJob {
        /// The job name.
        job: String,
        /// The protocol name.
        protocol: String,
    },

    /// A job is already bound
    #[error("Job {job} is still active")]
    JobActive {
        /// The name of the job currently bound.
        job: String,
    },

    /// The operation is not valid in the current state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: String,
        /// The state the protocol was in.
        state: ProtocolState,
    },

    /// The device does not implement the requested capability operation
    #[error("{operation} not supported: device has no {capability} capability")]
    NotSupported {
        /// The capability fragment name.
        capability: String,
        /// The operation that was requested.
        operation: String,
    },

    /// A capability operation was called with an out-of-range argument
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },
}

impl ProtocolError {
    /// Build a `NotSupported` error
    pub fn not_supported(capability: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotSupported {
            capability: capability.into(),
            operation: operation.into(),
        }
    }
}

/// Transport error type
///
/// Represents errors of the byte-stream connection below the protocol layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port or socket
    #[error("Failed to open {port}: {reason}")]
    FailedToOpen {
        /// The port or address that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// I/O attempted on a transport that is not connected
    #[error("Transport not connected")]
    NotConnected,

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    Io {
        /// The reason for the I/O error.
        reason: String,
    },
}

/// Job error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Job file does not exist
    #[error("File not found: {path}")]
    FileNotFound {
        /// The missing path.
        path: String,
    },

    /// Reading was attempted before `process` opened the file
    #[error("File {name} is not open for reading")]
    NotOpen {
        /// The job name.
        name: String,
    },

    /// I/O error while reading the job
    #[error("I/O error in job {name}: {reason}")]
    Io {
        /// The job name.
        name: String,
        /// The reason for the I/O error.
        reason: String,
    },
}

/// Main error type for FabKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Job error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this is a job error
    pub fn is_job_error(&self) -> bool {
        matches!(self, Error::Job(_))
    }

    /// Check if this is an unsupported capability error
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::NotSupported { .. }))
    }

    /// The protocol error, if this is one
    pub fn as_protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Error::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
