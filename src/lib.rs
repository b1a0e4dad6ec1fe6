//! # FabKit
//!
//! Host-side protocol orchestration for fabrication machines (3D printers,
//! CNC mills, laser cutters) attached over serial or network links.
//!
//! ## Architecture
//!
//! FabKit is organized as a workspace with multiple crates:
//!
//! 1. **fabkit-core** - Error types, state enums, listener registry, events
//! 2. **fabkit-communication** - Transports, jobs, commands, capability
//!    fragments, the protocol orchestrator and the G-code device protocol
//! 3. **fabkit-settings** - Configuration files and validation
//! 4. **fabkit** - This facade plus a small command line sender
//!
//! ## Example
//!
//! ```no_run
//! use fabkit::{ConnectionParams, GcodeDevice, LocalGcodeFileJob, Protocol, SerialTransport, Tags};
//! use std::sync::Arc;
//!
//! # fn main() -> fabkit::Result<()> {
//! let protocol = Protocol::new(Arc::new(GcodeDevice::new()));
//! let transport = Arc::new(SerialTransport::new());
//! protocol.connect(transport, &ConnectionParams::serial("/dev/ttyUSB0", 115200))?;
//! let job = Arc::new(LocalGcodeFileJob::new("part.gcode")?);
//! protocol.process(job, 0, &Tags::new())?;
//! # Ok(())
//! # }
//! ```

pub use fabkit_core::{
    Error, EventDispatcher, FileEntry, JobError, ListenerRegistry, ProtocolError, ProtocolEvent,
    ProtocolState, Result, TemperatureReading, Temperatures, TransportError, TransportState,
};

pub use fabkit_communication::{
    list_ports, strip_comment, Axes, AxisMotion, Command, CommandKind, ConnectionDriver,
    ConnectionParams, DeviceProtocol, EventForwarder, FabricationMotion, FanControl, FileAware,
    FileManagement, FileStreaming, GcodeCommand, GcodeDevice, Job, JobCore, JobKind, JobListener,
    JobProgress, LocalGcodeFileJob, LocalGcodeStreamJob, MotorControl, Move, NullDevice,
    PowerControl, Protocol, ProtocolListener, SdFileJob, SerialParity, SerialPortInfo,
    SerialTransport, StateHooks, Tags, TcpTransport, TracingProtocolListener, Transport,
    TransportCore, TransportListener, VirtualTransport,
};

pub use fabkit_settings::{
    config_dir, default_config_path, Config, ConnectionSettings, JobSettings, ProtocolSettings,
    SettingsError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, multi-line
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with(LogFormat::Pretty)
}

/// Initialize logging to stderr in the given format
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    match format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .pretty();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .json();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}
