//! End-to-end print through the facade against an acknowledging virtual port

use fabkit::{
    Config, ConnectionDriver, GcodeDevice, LocalGcodeFileJob, Protocol, ProtocolListener,
    ProtocolState, Tags, VirtualTransport,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

#[derive(Default)]
struct States(Mutex<Vec<ProtocolState>>);

impl ProtocolListener for States {
    fn on_protocol_state(&self, _protocol: &Protocol, _old: ProtocolState, new: ProtocolState) {
        self.0.lock().unwrap().push(new);
    }
}

#[test]
fn test_file_prints_to_completion_over_virtual_port() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "; sliced part").unwrap();
    writeln!(file, "G28").unwrap();
    writeln!(file, "G1 X10 Y10 ; move").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "M104 S0").unwrap();
    file.flush().unwrap();

    let mut config = Config::new();
    config.connection.driver = ConnectionDriver::Virtual;
    let params = config.connection.to_params();

    let transport = Arc::new(VirtualTransport::new("dry-run").with_auto_ok());
    let device = Arc::new(GcodeDevice::with_name(config.protocol.flavor.clone()));
    let protocol = Protocol::new(device.clone());
    let states = Arc::new(States::default());
    let listener: Arc<dyn ProtocolListener> = states.clone();
    protocol.register_listener(&listener);

    protocol.connect(transport.clone(), &params).unwrap();
    assert_eq!(protocol.state(), ProtocolState::Connected);

    let job = Arc::new(LocalGcodeFileJob::new(file.path()).unwrap());
    protocol.process(job, 0, &Tags::new()).unwrap();

    for _ in 0..100 {
        if protocol.active_job().is_none() {
            break;
        }
        protocol.receive().unwrap();
    }

    assert!(protocol.active_job().is_none());
    assert_eq!(protocol.state(), ProtocolState::Connected);
    assert_eq!(
        transport.sent_lines(),
        vec!["M105", "G28", "G1 X10 Y10", "M104 S0"]
    );

    protocol.disconnect(false).unwrap();
    assert_eq!(
        *states.0.lock().unwrap(),
        vec![
            ProtocolState::Connecting,
            ProtocolState::Connected,
            ProtocolState::Printing,
            ProtocolState::Connected,
            ProtocolState::Disconnecting,
            ProtocolState::Disconnected,
        ]
    );
}
