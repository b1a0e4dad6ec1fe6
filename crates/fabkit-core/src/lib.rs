//! # FabKit Core
//!
//! Core types, traits, and utilities for FabKit.
//! Provides the protocol and transport state enums, the unified error
//! types, the generic listener registry used by every stateful entity,
//! and broadcast-based event forwarding for async consumers.

pub mod data;
pub mod error;
pub mod event;
pub mod listener;
pub mod state;

pub use data::{FileEntry, TemperatureReading, Temperatures};
pub use error::{Error, JobError, ProtocolError, Result, TransportError};
pub use event::{EventDispatcher, ProtocolEvent};
pub use listener::ListenerRegistry;
pub use state::{ProtocolState, TransportState};
