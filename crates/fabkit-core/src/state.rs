//! Protocol and transport state enums
//!
//! `ProtocolState` is the state of the protocol orchestrator, `TransportState`
//! the state of the byte-stream connection below it.

use serde::{Deserialize, Serialize};

/// State of a protocol orchestrator.
///
/// Only `Disconnected`, `DisconnectedWithError`, `Connecting`, `Connected`,
/// `Disconnecting`, `Printing` and `Paused` are reached through the
/// orchestrator's own operations. `Pausing`, `Cancelling` and `Error` are
/// reserved for device protocols that need intermediate states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    /// No transport bound
    #[default]
    Disconnected,
    /// No transport bound, the last connection ended with an error
    DisconnectedWithError,
    /// Transport bound, waiting for it to report a live connection
    Connecting,
    /// Connected and idle
    Connected,
    /// Tearing down the transport
    Disconnecting,
    /// A job is being processed
    Printing,
    /// Reserved
    Pausing,
    /// A job is bound but processing is suspended
    Paused,
    /// Reserved
    Cancelling,
    /// Reserved
    Error,
}

impl ProtocolState {
    /// Every state, in declaration order
    pub const ALL: [ProtocolState; 10] = [
        ProtocolState::Disconnected,
        ProtocolState::DisconnectedWithError,
        ProtocolState::Connecting,
        ProtocolState::Connected,
        ProtocolState::Disconnecting,
        ProtocolState::Printing,
        ProtocolState::Pausing,
        ProtocolState::Paused,
        ProtocolState::Cancelling,
        ProtocolState::Error,
    ];

    /// Stable lowercase name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::DisconnectedWithError => "disconnected_with_error",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Printing => "printing",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Cancelling => "cancelling",
            Self::Error => "error",
        }
    }

    /// Terminal states: no transport or job bound, reconnect required
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected | Self::DisconnectedWithError)
    }

    /// States in which `disconnect` is rejected
    pub fn is_disconnecting_or_disconnected(&self) -> bool {
        self.is_disconnected() || *self == Self::Disconnecting
    }

    /// States in which a job is bound and being worked on
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::Printing | Self::Pausing | Self::Paused | Self::Cancelling
        )
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a byte-stream transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Link is up
    Connected,
    /// Link went down because of an error
    DisconnectedWithError,
}

impl TransportState {
    /// Whether a new connection attempt may be started from this state
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected | Self::DisconnectedWithError)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::DisconnectedWithError => write!(f, "disconnected_with_error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = ProtocolState::ALL
            .iter()
            .filter(|s| s.is_disconnected())
            .collect();
        assert_eq!(
            terminal,
            vec![
                &ProtocolState::Disconnected,
                &ProtocolState::DisconnectedWithError
            ]
        );
        assert!(ProtocolState::Disconnecting.is_disconnecting_or_disconnected());
        assert!(!ProtocolState::Connecting.is_disconnecting_or_disconnected());
    }

    #[test]
    fn test_display_matches_serde_name() {
        for state in ProtocolState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_transport_state_default() {
        assert_eq!(TransportState::default(), TransportState::Disconnected);
        assert!(TransportState::DisconnectedWithError.is_disconnected());
        assert!(!TransportState::Connecting.is_disconnected());
    }
}
