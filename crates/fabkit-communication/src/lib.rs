//! # FabKit Communication
//!
//! Everything between a caller and a fabrication machine:
//! - Byte-stream transports (Serial/USB, TCP/IP, in-memory virtual port)
//! - The protocol orchestrator that owns the connection and job lifecycles
//! - Optional device capability fragments (motion, fans, motors, power, files)
//! - Jobs (local G-code files, SD streaming, device-side SD prints)
//! - A RepRap/Marlin style G-code device protocol

pub mod command;
pub mod device;
pub mod job;
pub mod protocol;
pub mod transport;

pub use command::{strip_comment, Command, CommandKind, GcodeCommand, Tags};
pub use device::{gcode::GcodeDevice, DeviceProtocol, NullDevice, StateHooks};
pub use job::{
    local_file::{LocalGcodeFileJob, LocalGcodeStreamJob},
    sd_file::SdFileJob,
    Job, JobCore, JobKind, JobListener, JobProgress,
};
pub use protocol::{
    capabilities::{
        Axes, AxisMotion, FabricationMotion, FanControl, FileAware, FileManagement,
        FileStreaming, MotorControl, Move, PowerControl,
    },
    listeners::{EventForwarder, TracingProtocolListener},
    Protocol, ProtocolListener,
};
pub use transport::{
    serial::{list_ports, SerialPortInfo, SerialTransport},
    tcp::TcpTransport,
    virtual_port::VirtualTransport,
    ConnectionDriver, ConnectionParams, SerialParity, Transport, TransportCore,
    TransportListener,
};
