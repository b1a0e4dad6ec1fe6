//! TCP/IP transport
//!
//! Connects to network attached devices (serial-to-network bridges, ESP
//! based boards) with a connect timeout and short polling reads.

use super::{ConnectionDriver, ConnectionParams, Transport, TransportCore, TransportListener};
use fabkit_core::{Error, Result, TransportError, TransportState};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// TCP transport
pub struct TcpTransport {
    core: TransportCore,
    address: Mutex<String>,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    /// Create a disconnected TCP transport
    pub fn new() -> Self {
        Self {
            core: TransportCore::new(),
            address: Mutex::new(String::new()),
            stream: Mutex::new(None),
        }
    }

    fn open(params: &ConnectionParams) -> std::result::Result<TcpStream, TransportError> {
        let address = format!("{}:{}", params.port, params.network_port);
        let failed = |reason: String| TransportError::FailedToOpen {
            port: address.clone(),
            reason,
        };

        let socket_addr = (params.port.as_str(), params.network_port)
            .to_socket_addrs()
            .map_err(|e| failed(e.to_string()))?
            .next()
            .ok_or_else(|| failed("address did not resolve".to_string()))?;

        let timeout = Duration::from_millis(params.timeout_ms);
        let stream = TcpStream::connect_timeout(&socket_addr, timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                TransportError::Timeout {
                    timeout_ms: params.timeout_ms,
                }
            } else {
                failed(e.to_string())
            }
        })?;

        stream
            .set_read_timeout(Some(POLL_TIMEOUT))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| failed(e.to_string()))?;

        Ok(stream)
    }

    fn connection_lost(&self, reason: String) -> Error {
        self.stream.lock().take();
        let error = TransportError::ConnectionLost { reason };
        self.core.mark_disconnected(self, Some(error.clone()));
        error.into()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> String {
        let address = self.address.lock();
        if address.is_empty() {
            "tcp".to_string()
        } else {
            address.clone()
        }
    }

    fn state(&self) -> TransportState {
        self.core.state()
    }

    fn connect(&self, params: &ConnectionParams) -> Result<()> {
        if params.driver != ConnectionDriver::Tcp {
            return Err(TransportError::InvalidParameters {
                reason: format!("tcp transport cannot use the {} driver", params.driver),
            }
            .into());
        }
        params.validate()?;

        let address = format!("{}:{}", params.port, params.network_port);
        *self.address.lock() = address.clone();
        self.core.set_state(TransportState::Connecting);
        self.core
            .log_message(self, &format!("Connecting to {}", address));

        match Self::open(params) {
            Ok(stream) => {
                *self.stream.lock() = Some(stream);
                self.core.mark_connected(self);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Failed to connect to {}: {}", address, err);
                self.core.set_state(TransportState::DisconnectedWithError);
                self.core.log_message(self, &err.to_string());
                Err(err.into())
            }
        }
    }

    fn disconnect(&self) -> Result<()> {
        if let Some(stream) = self.stream.lock().take() {
            if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
                tracing::debug!("Shutdown of {} failed: {}", self.name(), e);
            }
        }
        self.core.mark_disconnected(self, None);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let result = {
            let mut stream = self.stream.lock();
            let stream = stream.as_mut().ok_or(TransportError::NotConnected)?;
            stream.write_all(data).and_then(|_| stream.flush())
        };
        match result {
            Ok(()) => {
                self.core.log_sent(self, data);
                Ok(data.len())
            }
            Err(err) => Err(self.connection_lost(err.to_string())),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let result = {
            let mut stream = self.stream.lock();
            let stream = stream.as_mut().ok_or(TransportError::NotConnected)?;
            stream.read(buf)
        };
        match result {
            Ok(0) => Err(self.connection_lost("connection closed by peer".to_string())),
            Ok(n) => {
                self.core.log_received(self, &buf[..n]);
                Ok(n)
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(self.connection_lost(err.to_string())),
        }
    }

    fn register_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.core.register_listener(listener)
    }

    fn unregister_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.core.unregister_listener(listener)
    }
}
