//! Serial port transport
//!
//! Provides low-level serial port operations for direct hardware connection
//! to fabrication machines via USB or RS-232.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Baud rate configuration
//! - Flow control settings
//! - Parity and stop bit configuration
//! - Polling reads with a short timeout

use super::{
    ConnectionDriver, ConnectionParams, SerialParity, Transport, TransportCore, TransportListener,
};
use fabkit_core::{Error, Result, TransportError, TransportState};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Read timeout used for polling reads
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that look like printer or controller connections
///
/// Filters to:
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*, /dev/rfcomm*
/// - macOS: /dev/tty.usb*, /dev/cu.*
/// - FreeBSD: /dev/cuaU*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_device_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb_info) => {
                    let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                    if let Some(ref mfg) = usb_info.manufacturer {
                        info = info.with_manufacturer(mfg);
                    }
                    if let Some(ref serial) = usb_info.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    info
                }
                _ => info,
            }
        })
        .collect())
}

fn is_device_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    const PREFIXES: [&str; 6] = [
        "/dev/ttyUSB",
        "/dev/ttyACM",
        "/dev/tty.usb",
        "/dev/cu.",
        "/dev/cuaU",
        "/dev/rfcomm",
    ];
    PREFIXES.iter().any(|prefix| port_name.starts_with(prefix))
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

/// Serial transport backed by the `serialport` crate
pub struct SerialTransport {
    core: TransportCore,
    port_name: Mutex<String>,
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
}

impl SerialTransport {
    /// Create a disconnected serial transport
    pub fn new() -> Self {
        Self {
            core: TransportCore::new(),
            port_name: Mutex::new(String::new()),
            port: Mutex::new(None),
        }
    }

    fn open(
        params: &ConnectionParams,
    ) -> std::result::Result<Box<dyn serialport::SerialPort>, TransportError> {
        let data_bits = match params.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match params.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };

        serialport::new(&params.port, params.baud_rate)
            .timeout(POLL_TIMEOUT)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            })
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound {
                    port: params.port.clone(),
                },
                _ => TransportError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                },
            })
    }

    fn connection_lost(&self, err: &io::Error) -> Error {
        self.port.lock().take();
        let error = TransportError::ConnectionLost {
            reason: err.to_string(),
        };
        self.core.mark_disconnected(self, Some(error.clone()));
        error.into()
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> String {
        let name = self.port_name.lock();
        if name.is_empty() {
            "serial".to_string()
        } else {
            name.clone()
        }
    }

    fn state(&self) -> TransportState {
        self.core.state()
    }

    fn connect(&self, params: &ConnectionParams) -> Result<()> {
        if params.driver != ConnectionDriver::Serial {
            return Err(TransportError::InvalidParameters {
                reason: format!("serial transport cannot use the {} driver", params.driver),
            }
            .into());
        }
        params.validate()?;

        *self.port_name.lock() = params.port.clone();
        self.core.set_state(TransportState::Connecting);
        self.core.log_message(
            self,
            &format!("Opening {} at {} baud", params.port, params.baud_rate),
        );

        match Self::open(params) {
            Ok(port) => {
                *self.port.lock() = Some(port);
                self.core.mark_connected(self);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Failed to open serial port {}: {}", params.port, err);
                self.core.set_state(TransportState::DisconnectedWithError);
                self.core.log_message(self, &err.to_string());
                Err(err.into())
            }
        }
    }

    fn disconnect(&self) -> Result<()> {
        self.port.lock().take();
        self.core.mark_disconnected(self, None);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let result = {
            let mut port = self.port.lock();
            let port = port.as_mut().ok_or(TransportError::NotConnected)?;
            port.write_all(data).and_then(|_| port.flush())
        };
        match result {
            Ok(()) => {
                self.core.log_sent(self, data);
                Ok(data.len())
            }
            Err(err) => Err(self.connection_lost(&err)),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let result = {
            let mut port = self.port.lock();
            let port = port.as_mut().ok_or(TransportError::NotConnected)?;
            port.read(buf)
        };
        match result {
            Ok(n) => {
                if n > 0 {
                    self.core.log_received(self, &buf[..n]);
                }
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
            Err(err) => Err(self.connection_lost(&err)),
        }
    }

    fn register_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.core.register_listener(listener)
    }

    fn unregister_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.core.unregister_listener(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_port_patterns() {
        assert!(is_device_port("COM3"));
        assert!(is_device_port("/dev/ttyUSB0"));
        assert!(is_device_port("/dev/ttyACM1"));
        assert!(is_device_port("/dev/tty.usbmodem1411"));
        assert!(is_device_port("/dev/cu.usbserial-A1"));
        assert!(is_device_port("/dev/cuaU0"));
        assert!(is_device_port("/dev/rfcomm0"));

        assert!(!is_device_port("COM"));
        assert!(!is_device_port("COMX"));
        assert!(!is_device_port("/dev/ttyS0"));
    }

    #[test]
    fn test_rejects_wrong_driver() {
        let transport = SerialTransport::new();
        let err = transport
            .connect(&ConnectionParams::tcp("localhost", 23))
            .unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[test]
    fn test_io_requires_connection() {
        let transport = SerialTransport::new();
        let mut buf = [0u8; 8];
        assert!(transport.read(&mut buf).is_err());
        assert!(transport.write(b"M105\n").is_err());
        assert_eq!(transport.name(), "serial");
    }
}
