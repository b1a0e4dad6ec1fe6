//! Byte-stream transports
//!
//! A transport moves raw bytes between the host and a device. It knows
//! nothing about G-code; it reports link state changes and traffic to its
//! listeners, one of which is the protocol orchestrator while bound.
//!
//! Implementations:
//! - [`serial::SerialTransport`] for USB/RS-232 devices
//! - [`tcp::TcpTransport`] for network attached devices
//! - [`virtual_port::VirtualTransport`] for tests and dry runs

pub mod serial;
pub mod tcp;
pub mod virtual_port;

use fabkit_core::{ListenerRegistry, Result, TransportError, TransportState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Connection driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDriver {
    /// Serial/USB connection
    #[default]
    Serial,
    /// TCP/IP network connection
    Tcp,
    /// In-memory virtual port
    Virtual,
}

impl std::fmt::Display for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Tcp => write!(f, "tcp"),
            Self::Virtual => write!(f, "virtual"),
        }
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Driver type
    pub driver: ConnectionDriver,
    /// Serial port name, or host name for TCP
    pub port: String,
    /// TCP port (ignored for serial)
    pub network_port: u16,
    /// Baud rate (serial only)
    pub baud_rate: u32,
    /// Data bits (5-8, serial only)
    pub data_bits: u8,
    /// Stop bits (1 or 2, serial only)
    pub stop_bits: u8,
    /// Parity (serial only)
    pub parity: SerialParity,
    /// Hardware flow control (serial only)
    pub flow_control: bool,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: String::new(),
            network_port: 23,
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 5000,
        }
    }
}

impl ConnectionParams {
    /// Serial connection to `port` at `baud_rate`
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// TCP connection to `host:network_port`
    pub fn tcp(host: impl Into<String>, network_port: u16) -> Self {
        Self {
            driver: ConnectionDriver::Tcp,
            port: host.into(),
            network_port,
            ..Self::default()
        }
    }

    /// In-memory virtual connection
    pub fn virtual_port() -> Self {
        Self {
            driver: ConnectionDriver::Virtual,
            port: "virtual".to_string(),
            ..Self::default()
        }
    }

    /// Check the parameters for the selected driver
    pub fn validate(&self) -> std::result::Result<(), TransportError> {
        let invalid = |reason: String| Err(TransportError::InvalidParameters { reason });

        if self.timeout_ms == 0 {
            return invalid("timeout must be greater than zero".to_string());
        }

        match self.driver {
            ConnectionDriver::Serial => {
                if self.port.is_empty() {
                    return invalid("serial port name is empty".to_string());
                }
                if self.baud_rate == 0 {
                    return invalid("baud rate must be greater than zero".to_string());
                }
                if !(5..=8).contains(&self.data_bits) {
                    return invalid(format!("invalid data bits: {}", self.data_bits));
                }
                if !(1..=2).contains(&self.stop_bits) {
                    return invalid(format!("invalid stop bits: {}", self.stop_bits));
                }
            }
            ConnectionDriver::Tcp => {
                if self.port.is_empty() {
                    return invalid("host is empty".to_string());
                }
                if self.network_port == 0 {
                    return invalid("network port must be greater than zero".to_string());
                }
            }
            ConnectionDriver::Virtual => {}
        }
        Ok(())
    }
}

/// Receiver of transport state changes and traffic.
///
/// All methods default to doing nothing.
pub trait TransportListener: Send + Sync {
    /// The link is up
    fn on_transport_connected(&self, _transport: &dyn Transport) {}

    /// The link went down; `error` is set when it was lost rather than closed
    fn on_transport_disconnected(
        &self,
        _transport: &dyn Transport,
        _error: Option<&TransportError>,
    ) {
    }

    /// Bytes were read from the device
    fn on_transport_log_received_data(&self, _transport: &dyn Transport, _data: &[u8]) {}

    /// Bytes were written to the device
    fn on_transport_log_sent_data(&self, _transport: &dyn Transport, _data: &[u8]) {}

    /// Informational message from the transport
    fn on_transport_log_message(&self, _transport: &dyn Transport, _message: &str) {}
}

/// A byte-stream connection to a device.
///
/// Methods take `&self`; implementations use interior mutability so a
/// transport can be shared as `Arc<dyn Transport>` between the orchestrator
/// and the caller.
pub trait Transport: Send + Sync {
    /// Human readable name (port or address)
    fn name(&self) -> String;

    /// Current link state
    fn state(&self) -> TransportState;

    /// Open the link.
    ///
    /// Listeners receive `on_transport_connected` once the link is up, which
    /// may happen before this returns.
    fn connect(&self, params: &ConnectionParams) -> Result<()>;

    /// Close the link
    fn disconnect(&self) -> Result<()>;

    /// Write bytes, returning the number written
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Read available bytes without blocking longer than the transport's
    /// poll timeout; `Ok(0)` means nothing was available
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Register a listener
    fn register_listener(&self, listener: &Arc<dyn TransportListener>) -> bool;

    /// Unregister a listener
    fn unregister_listener(&self, listener: &Arc<dyn TransportListener>) -> bool;
}

/// Shared state and listener handling for transport implementations
#[derive(Debug, Default)]
pub struct TransportCore {
    state: Mutex<TransportState>,
    listeners: ListenerRegistry<dyn TransportListener>,
}

impl TransportCore {
    /// Create a disconnected core
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Set the state without notifying listeners
    pub fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }

    /// Register a listener
    pub fn register_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.listeners.register(listener)
    }

    /// Unregister a listener
    pub fn unregister_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.listeners.unregister(listener)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Mark the link as up and notify listeners
    pub fn mark_connected(&self, transport: &dyn Transport) {
        {
            let mut state = self.state.lock();
            if *state == TransportState::Connected {
                return;
            }
            *state = TransportState::Connected;
        }
        self.listeners.notify("on_transport_connected", |listener| {
            listener.on_transport_connected(transport)
        });
    }

    /// Mark the link as down and notify listeners.
    ///
    /// Does nothing if the link was already down.
    pub fn mark_disconnected(&self, transport: &dyn Transport, error: Option<TransportError>) {
        {
            let mut state = self.state.lock();
            if state.is_disconnected() {
                return;
            }
            *state = if error.is_some() {
                TransportState::DisconnectedWithError
            } else {
                TransportState::Disconnected
            };
        }
        if let Some(err) = &error {
            tracing::warn!("Transport {} lost: {}", transport.name(), err);
        }
        self.listeners.notify("on_transport_disconnected", |listener| {
            listener.on_transport_disconnected(transport, error.as_ref())
        });
    }

    /// Report received bytes
    pub fn log_received(&self, transport: &dyn Transport, data: &[u8]) {
        self.listeners.notify("on_transport_log_received_data", |listener| {
            listener.on_transport_log_received_data(transport, data)
        });
    }

    /// Report sent bytes
    pub fn log_sent(&self, transport: &dyn Transport, data: &[u8]) {
        self.listeners.notify("on_transport_log_sent_data", |listener| {
            listener.on_transport_log_sent_data(transport, data)
        });
    }

    /// Report an informational message
    pub fn log_message(&self, transport: &dyn Transport, message: &str) {
        self.listeners.notify("on_transport_log_message", |listener| {
            listener.on_transport_log_message(transport, message)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = ConnectionParams::default();
        assert_eq!(params.driver, ConnectionDriver::Serial);
        assert_eq!(params.baud_rate, 115200);
        assert!(params.validate().is_err());
        assert!(ConnectionParams::serial("/dev/ttyUSB0", 250000)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_serial() {
        let mut params = ConnectionParams::serial("/dev/ttyACM0", 115200);
        params.data_bits = 9;
        assert!(matches!(
            params.validate(),
            Err(TransportError::InvalidParameters { .. })
        ));

        let mut params = ConnectionParams::serial("/dev/ttyACM0", 115200);
        params.stop_bits = 3;
        assert!(params.validate().is_err());

        let params = ConnectionParams::serial("/dev/ttyACM0", 0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_tcp() {
        assert!(ConnectionParams::tcp("printer.local", 23).validate().is_ok());
        assert!(ConnectionParams::tcp("", 23).validate().is_err());
        assert!(ConnectionParams::tcp("printer.local", 0).validate().is_err());
        assert!(ConnectionParams::virtual_port().validate().is_ok());
    }

    #[test]
    fn test_driver_serde_names() {
        let json = serde_json::to_string(&ConnectionDriver::Tcp).unwrap();
        assert_eq!(json, "\"tcp\"");
        let parity: SerialParity = serde_json::from_str("\"even\"").unwrap();
        assert_eq!(parity, SerialParity::Even);
    }
}
