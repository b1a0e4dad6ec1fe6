//! Event forwarding for async consumers
//!
//! Provides:
//! - Event types mirroring the protocol listener callbacks
//! - Event dispatcher for publishing events to broadcast subscribers

use crate::data::{FileEntry, Temperatures};
use crate::state::ProtocolState;
use tokio::sync::broadcast;

/// Protocol event types
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// Protocol state changed
    StateChanged {
        /// State before the transition.
        old: ProtocolState,
        /// State after the transition.
        new: ProtocolState,
    },
    /// Protocol log line
    Log(String),
    /// Temperature report
    Temperature(Temperatures),
    /// Removable storage became available or unavailable
    FileStorageAvailable(bool),
    /// File listing of the removable storage
    FileList(Vec<FileEntry>),
    /// Progress of a device-side file print
    FileStatus {
        /// Bytes processed.
        pos: u64,
        /// Total bytes.
        total: u64,
    },
    /// Device-side file print started
    FilePrintStarted {
        /// File name.
        name: String,
        /// File size in bytes.
        size: u64,
    },
    /// Device-side file print finished
    FilePrintDone,
}

impl std::fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolEvent::StateChanged { old, new } => write!(f, "State: {} -> {}", old, new),
            ProtocolEvent::Log(message) => write!(f, "Log: {}", message),
            ProtocolEvent::Temperature(temps) => {
                write!(f, "Temperature:")?;
                for (heater, reading) in temps {
                    match reading.target {
                        Some(target) => write!(f, " {}={}/{}", heater, reading.actual, target)?,
                        None => write!(f, " {}={}", heater, reading.actual)?,
                    }
                }
                Ok(())
            }
            ProtocolEvent::FileStorageAvailable(available) => {
                write!(f, "File storage available: {}", available)
            }
            ProtocolEvent::FileList(files) => write!(f, "File list: {} files", files.len()),
            ProtocolEvent::FileStatus { pos, total } => write!(f, "File status: {}/{}", pos, total),
            ProtocolEvent::FilePrintStarted { name, size } => {
                write!(f, "File print started: {} ({} bytes)", name, size)
            }
            ProtocolEvent::FilePrintDone => write!(f, "File print done"),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for protocol events.
    tx: broadcast::Sender<ProtocolEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Create a new event dispatcher with default buffer size
    pub fn default_with_buffer() -> Self {
        Self::new(100)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it; zero when nobody
    /// is subscribed.
    pub fn publish(&self, event: ProtocolEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::default_with_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        let delivered = dispatcher.publish(ProtocolEvent::StateChanged {
            old: ProtocolState::Disconnected,
            new: ProtocolState::Connecting,
        });
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.to_string(), "State: disconnected -> connecting");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let dispatcher = EventDispatcher::new(4);
        assert_eq!(dispatcher.publish(ProtocolEvent::FilePrintDone), 0);
    }
}
