//! G-code device driven end to end over the virtual transport

use fabkit_communication::{
    Axes, Command, ConnectionParams, GcodeDevice, JobKind, LocalGcodeFileJob, LocalGcodeStreamJob,
    Move, NullDevice, Protocol, ProtocolListener, SdFileJob, Tags, VirtualTransport,
};
use fabkit_core::{FileEntry, ProtocolError, ProtocolState, TemperatureReading, Temperatures};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

#[derive(Default)]
struct Events {
    states: Mutex<Vec<(ProtocolState, ProtocolState)>>,
    temperatures: Mutex<Vec<Temperatures>>,
    storage: Mutex<Vec<bool>>,
    files: Mutex<Vec<Vec<FileEntry>>>,
}

impl ProtocolListener for Events {
    fn on_protocol_state(&self, _protocol: &Protocol, old: ProtocolState, new: ProtocolState) {
        self.states.lock().push((old, new));
    }

    fn on_protocol_temperature(&self, _protocol: &Protocol, temperatures: &Temperatures) {
        self.temperatures.lock().push(temperatures.clone());
    }

    fn on_protocol_file_storage_available(&self, _protocol: &Protocol, available: bool) {
        self.storage.lock().push(available);
    }

    fn on_protocol_file_list(&self, _protocol: &Protocol, files: &[FileEntry]) {
        self.files.lock().push(files.to_vec());
    }
}

struct Rig {
    device: Arc<GcodeDevice>,
    protocol: Arc<Protocol>,
    transport: Arc<VirtualTransport>,
    events: Arc<Events>,
    _listener: Arc<dyn ProtocolListener>,
}

impl Rig {
    fn new(auto_ok: bool) -> Self {
        let device = Arc::new(GcodeDevice::new());
        let protocol = Protocol::new(device.clone());
        let events = Arc::new(Events::default());
        let listener: Arc<dyn ProtocolListener> = events.clone();
        protocol.register_listener(&listener);

        let transport = Arc::new(VirtualTransport::new("virtual"));
        transport.set_auto_ok(auto_ok);
        protocol
            .connect(transport.clone(), &ConnectionParams::virtual_port())
            .unwrap();

        Self {
            device,
            protocol,
            transport,
            events,
            _listener: listener,
        }
    }

    /// Connected with the initial temperature request acknowledged
    fn ready() -> Self {
        let rig = Self::new(true);
        rig.drain();
        rig.transport.clear_sent();
        rig
    }

    /// Process inbound data until the transport has nothing left
    fn drain(&self) {
        for _ in 0..10_000 {
            if self.protocol.receive().unwrap() == 0 {
                return;
            }
        }
        panic!("transport never ran dry");
    }

    fn reply(&self, line: &str) {
        self.transport.push_line(line);
        self.drain();
    }

    fn sent(&self) -> Vec<String> {
        self.transport.sent_lines()
    }
}

fn gcode_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_requests_temperature_on_connect() {
    let rig = Rig::new(false);
    assert_eq!(rig.protocol.state(), ProtocolState::Connected);
    assert_eq!(rig.sent(), vec!["M105"]);
    assert!(!rig.protocol.can_send());

    rig.reply("ok");
    assert!(rig.protocol.can_send());
}

#[test]
fn test_lines_wait_for_acknowledgement() {
    let rig = Rig::new(false);
    rig.protocol
        .send_commands(None, &[Command::from_line("G28"), Command::from_line("G1 X10")])
        .unwrap();
    assert_eq!(rig.sent(), vec!["M105"]);
    assert_eq!(rig.device.queued(), 2);

    rig.reply("ok T:20.0 /0.0 B:19.5 /0.0");
    assert_eq!(rig.sent(), vec!["M105", "G28"]);

    rig.reply("wait");
    assert_eq!(rig.sent(), vec!["M105", "G28", "G1 X10"]);
    assert_eq!(rig.device.queued(), 0);
}

#[test]
fn test_typed_commands_are_not_queued_twice() {
    let rig = Rig::new(false);
    rig.device.request_temperature(&rig.protocol).unwrap();
    rig.device.request_temperature(&rig.protocol).unwrap();
    rig.protocol
        .send_commands(Some("temperature_poll"), &[Command::from_line("M105")])
        .unwrap();
    assert_eq!(rig.device.queued(), 1);
}

#[test]
fn test_resend_repeats_last_line() {
    let rig = Rig::new(false);
    rig.reply("ok");
    rig.protocol
        .send_commands(None, &[Command::from_line("G28")])
        .unwrap();

    rig.reply("Resend: 1");
    assert_eq!(rig.sent(), vec!["M105", "G28"]);
    rig.reply("ok");
    assert_eq!(rig.sent(), vec!["M105", "G28", "G28"]);
}

#[test]
fn test_resend_keeps_one_line_in_flight() {
    let rig = Rig::new(false);
    rig.reply("ok");
    rig.protocol
        .send_commands(
            None,
            &[
                Command::from_line("G1 X1"),
                Command::from_line("G1 X2"),
                Command::from_line("G1 X3"),
            ],
        )
        .unwrap();
    assert_eq!(rig.sent(), vec!["M105", "G1 X1"]);

    rig.transport.push_line("Resend: 2");
    rig.transport.push_line("ok");
    rig.drain();
    assert_eq!(rig.sent(), vec!["M105", "G1 X1", "G1 X1"]);
    assert_eq!(rig.device.queued(), 2);

    rig.reply("ok");
    assert_eq!(rig.sent(), vec!["M105", "G1 X1", "G1 X1", "G1 X2"]);
}

#[test]
fn test_repair_unblocks_sending() {
    let rig = Rig::new(false);
    rig.protocol
        .send_commands(None, &[Command::from_line("G28")])
        .unwrap();
    assert_eq!(rig.sent(), vec!["M105"]);

    rig.protocol.repair().unwrap();
    assert_eq!(rig.sent(), vec!["M105", "G28"]);
}

#[test]
fn test_sending_requires_connection() {
    let device = Arc::new(GcodeDevice::new());
    let protocol = Protocol::new(device);
    let err = protocol
        .send_commands(None, &[Command::from_line("G28")])
        .unwrap_err();
    assert!(matches!(
        err.as_protocol_error(),
        Some(ProtocolError::InvalidState { .. })
    ));
}

#[test]
fn test_temperature_reports_are_parsed() {
    let rig = Rig::new(false);
    rig.reply("ok T:20.5 /200.0 B:60.1 /60.0 @:0 B@:0");
    rig.reply("T0:210.0 /210.0 T1:180.0 /0.0 B:59.5 /60.0");

    let reports = rig.events.temperatures.lock().clone();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["tool0"], TemperatureReading::new(20.5, Some(200.0)));
    assert_eq!(reports[0]["bed"], TemperatureReading::new(60.1, Some(60.0)));
    assert_eq!(reports[1]["tool1"], TemperatureReading::new(180.0, Some(0.0)));
    assert_eq!(rig.device.temperatures(), reports[1]);
}

#[test]
fn test_local_file_job_runs_to_completion() {
    let file = gcode_file("G28\n; home first\nG1 X10 ; move\n\nM104 S200\n");
    let rig = Rig::ready();
    let job = Arc::new(LocalGcodeFileJob::new(file.path()).unwrap());

    rig.protocol.process(job.clone(), 0, &Tags::new()).unwrap();
    assert_eq!(rig.protocol.state(), ProtocolState::Printing);
    rig.drain();

    assert_eq!(rig.sent(), vec!["G28", "G1 X10", "M104 S200"]);
    assert_eq!(rig.protocol.state(), ProtocolState::Connected);
    assert!(rig.protocol.active_job().is_none());
    let states = rig.events.states.lock().clone();
    assert!(states.ends_with(&[
        (ProtocolState::Connected, ProtocolState::Printing),
        (ProtocolState::Printing, ProtocolState::Connected),
    ]));
}

#[test]
fn test_empty_file_finishes_immediately() {
    let file = gcode_file("; nothing to do\n\n");
    let rig = Rig::ready();

    rig.protocol
        .process(Arc::new(LocalGcodeFileJob::new(file.path()).unwrap()), 0, &Tags::new())
        .unwrap();
    assert_eq!(rig.protocol.state(), ProtocolState::Connected);
    assert!(rig.sent().is_empty());

    let states = rig.events.states.lock().clone();
    assert!(states.ends_with(&[
        (ProtocolState::Connected, ProtocolState::Printing),
        (ProtocolState::Printing, ProtocolState::Connected),
    ]));
}

#[test]
fn test_pause_directive_holds_the_job() {
    let file = gcode_file("G28\n@pause\nG1 X1\n");
    let rig = Rig::ready();

    rig.protocol
        .process(Arc::new(LocalGcodeFileJob::new(file.path()).unwrap()), 0, &Tags::new())
        .unwrap();
    rig.drain();
    assert_eq!(rig.protocol.state(), ProtocolState::Paused);
    assert_eq!(rig.sent(), vec!["G28"]);

    rig.protocol.resume_processing(&Tags::new());
    rig.drain();
    assert_eq!(rig.sent(), vec!["G28", "G1 X1"]);
    assert_eq!(rig.protocol.state(), ProtocolState::Connected);
}

#[test]
fn test_cancel_stops_pulling_lines() {
    let file = gcode_file("G28\nG1 X1\nG1 X2\n");
    let rig = Rig::new(false);
    rig.reply("ok");
    let job = Arc::new(LocalGcodeFileJob::new(file.path()).unwrap());

    rig.protocol.process(job, 0, &Tags::new()).unwrap();
    assert_eq!(rig.sent(), vec!["M105", "G28"]);

    rig.protocol.cancel_processing(false, &Tags::new());
    assert_eq!(rig.protocol.state(), ProtocolState::Connected);
    rig.reply("ok");
    assert_eq!(rig.sent(), vec!["M105", "G28"]);
}

#[test]
fn test_disconnect_aborts_running_job() {
    let file = gcode_file("G28\nG1 X1\n");
    let rig = Rig::new(false);
    rig.reply("ok");
    rig.protocol
        .process(Arc::new(LocalGcodeFileJob::new(file.path()).unwrap()), 0, &Tags::new())
        .unwrap();

    rig.protocol.disconnect(false).unwrap();
    assert_eq!(rig.protocol.state(), ProtocolState::Disconnected);
    assert!(rig.protocol.active_job().is_none());
    assert!(!rig.protocol.can_send());
}

#[test]
fn test_stream_job_records_file_on_device() {
    let file = gcode_file("G28\n; keep me\nG1 X10\n");
    let rig = Rig::ready();
    let job = Arc::new(LocalGcodeStreamJob::new(file.path(), "REMOTE.GCO").unwrap());

    rig.protocol.process(job, 0, &Tags::new()).unwrap();
    assert_eq!(rig.device.recording().as_deref(), Some("REMOTE.GCO"));
    rig.drain();

    assert_eq!(
        rig.sent(),
        vec!["M28 REMOTE.GCO", "G28", "; keep me", "G1 X10", "M29 REMOTE.GCO"]
    );
    assert_eq!(rig.device.recording(), None);
    assert_eq!(rig.protocol.state(), ProtocolState::Connected);
}

#[test]
fn test_sd_file_job_follows_device_reports() {
    let rig = Rig::ready();
    let job = SdFileJob::new("CUBE.GCO", Duration::from_secs(1));

    rig.protocol.process(job.clone(), 0, &Tags::new()).unwrap();
    rig.drain();
    assert_eq!(rig.sent(), vec!["M23 CUBE.GCO", "M24"]);
    assert!(job.is_active());

    rig.reply("File opened: CUBE.GCO Size: 1000");
    assert_eq!(rig.protocol.state(), ProtocolState::Printing);

    rig.reply("SD printing byte 500/1000");
    assert_eq!(fabkit_communication::Job::progress(job.as_ref()), Some(0.5));

    job.poll_status().unwrap();
    rig.drain();
    assert_eq!(rig.sent().last().map(String::as_str), Some("M27"));

    rig.protocol.pause_processing(&Tags::new());
    rig.drain();
    assert_eq!(rig.sent().last().map(String::as_str), Some("M25"));
    rig.protocol.resume_processing(&Tags::new());
    rig.drain();
    assert_eq!(rig.sent().last().map(String::as_str), Some("M24"));

    rig.reply("Done printing file");
    assert_eq!(rig.protocol.state(), ProtocolState::Connected);
    assert!(!job.is_active());
    assert!(rig.protocol.active_job().is_none());
}

#[test]
fn test_disconnect_stops_storage_print() {
    let rig = Rig::ready();
    let job = SdFileJob::new("CUBE.GCO", Duration::from_secs(1));
    rig.protocol.process(job.clone(), 0, &Tags::new()).unwrap();
    rig.drain();
    rig.reply("File opened: CUBE.GCO Size: 1000");
    assert_eq!(rig.protocol.state(), ProtocolState::Printing);

    rig.protocol.disconnect(false).unwrap();
    assert_eq!(rig.protocol.state(), ProtocolState::Disconnected);
    assert_eq!(rig.sent().last().map(String::as_str), Some("M25"));
    assert!(!job.is_active());
}

#[test]
fn test_sd_file_job_resumes_from_position() {
    let rig = Rig::ready();
    let job = SdFileJob::new("CUBE.GCO", Duration::from_secs(1));

    rig.protocol.process(job, 250, &Tags::new()).unwrap();
    rig.drain();
    assert_eq!(rig.sent(), vec!["M23 CUBE.GCO", "M26 S250", "M24"]);
}

#[test]
fn test_storage_messages_are_reported() {
    let rig = Rig::ready();
    let storage = rig.protocol.file_aware().unwrap();

    storage.init_file_storage(&rig.protocol).unwrap();
    rig.reply("SD card ok");
    storage.list_files(&rig.protocol).unwrap();
    rig.reply("Begin file list");
    rig.reply("CUBE.GCO 1000");
    rig.reply("PART.GCO 2000");
    rig.reply("End file list");
    rig.reply("SD init fail");

    assert_eq!(*rig.events.storage.lock(), vec![true, false]);
    assert_eq!(
        *rig.events.files.lock(),
        vec![vec![
            FileEntry::new("CUBE.GCO", Some(1000)),
            FileEntry::new("PART.GCO", Some(2000)),
        ]]
    );
    assert_eq!(rig.device.storage_available(), Some(false));

    rig.protocol
        .file_management()
        .unwrap()
        .delete_file(&rig.protocol, "CUBE.GCO")
        .unwrap();
    rig.drain();
    assert_eq!(rig.sent(), vec!["M21", "M20", "M30 CUBE.GCO"]);
}

#[test]
fn test_motion_encodings() {
    let rig = Rig::ready();
    let motion = rig.protocol.fabrication_motion().unwrap();

    let target = Move {
        x: Some(10.0),
        y: Some(20.5),
        feedrate: Some(3000.0),
        ..Move::default()
    };
    motion.move_axes(&rig.protocol, &target).unwrap();
    rig.drain();
    let lift = Move {
        z: Some(1.0),
        relative: true,
        ..Move::default()
    };
    motion.move_axes(&rig.protocol, &lift).unwrap();
    rig.drain();
    motion
        .home(
            &rig.protocol,
            Axes {
                x: true,
                y: true,
                z: false,
            },
        )
        .unwrap();
    rig.drain();
    motion.home(&rig.protocol, Axes::default()).unwrap();
    rig.drain();
    motion.change_tool(&rig.protocol, 1).unwrap();
    rig.drain();
    motion.set_feedrate_multiplier(&rig.protocol, 150.0).unwrap();
    rig.drain();
    motion.set_extrusion_multiplier(&rig.protocol, 95.0).unwrap();
    rig.drain();
    motion
        .set_extruder_temperature(&rig.protocol, 210.0, Some(1), true)
        .unwrap();
    rig.drain();
    motion
        .set_extruder_temperature(&rig.protocol, 200.0, None, false)
        .unwrap();
    rig.drain();
    motion.set_bed_temperature(&rig.protocol, 60.0, false).unwrap();
    rig.drain();
    motion.set_bed_temperature(&rig.protocol, 65.0, true).unwrap();
    rig.drain();

    assert_eq!(
        rig.sent(),
        vec![
            "G1 X10 Y20.5 F3000",
            "G91",
            "G1 Z1",
            "G90",
            "G28 X0 Y0",
            "G28",
            "T1",
            "M220 S150",
            "M221 S95",
            "M109 S210 T1",
            "M104 S200",
            "M140 S60",
            "M190 S65",
        ]
    );
}

#[test]
fn test_fan_motor_and_power_encodings() {
    let rig = Rig::ready();
    let fan = rig.protocol.fan_control().unwrap();
    assert_eq!(fan.get_fan_speed(&rig.protocol).unwrap(), None);

    fan.set_fan_speed(&rig.protocol, 0.5).unwrap();
    rig.drain();
    fan.set_fan_speed(&rig.protocol, 0.0).unwrap();
    rig.drain();
    let err = fan.set_fan_speed(&rig.protocol, 1.5).unwrap_err();
    assert!(matches!(
        err.as_protocol_error(),
        Some(ProtocolError::InvalidArgument { .. })
    ));
    assert_eq!(fan.get_fan_speed(&rig.protocol).unwrap(), Some(0.0));

    let motors = rig.protocol.motor_control().unwrap();
    motors.disable_motors(&rig.protocol).unwrap();
    rig.drain();
    assert_eq!(motors.get_motor_state(&rig.protocol).unwrap(), Some(false));
    motors.enable_motors(&rig.protocol).unwrap();
    rig.drain();

    let power = rig.protocol.power_control().unwrap();
    assert_eq!(power.get_power_state(&rig.protocol).unwrap(), None);
    power.enable_power(&rig.protocol).unwrap();
    rig.drain();
    power.disable_power(&rig.protocol).unwrap();
    rig.drain();
    assert_eq!(power.get_power_state(&rig.protocol).unwrap(), Some(false));

    assert_eq!(
        rig.sent(),
        vec!["M106 S128", "M107", "M18", "M17", "M80", "M81"]
    );
}

#[test]
fn test_missing_capabilities_are_reported() {
    let protocol = Protocol::new(Arc::new(NullDevice::with_jobs(&[
        JobKind::SdFile,
        JobKind::Stream,
    ])));
    let transport = Arc::new(VirtualTransport::new("virtual"));
    protocol
        .connect(transport, &ConnectionParams::virtual_port())
        .unwrap();

    assert!(protocol.axis_motion().is_err_and(|e| e.is_not_supported()));
    assert!(protocol.fan_control().is_err_and(|e| e.is_not_supported()));
    assert!(protocol.file_streaming().is_err_and(|e| e.is_not_supported()));

    let err = protocol
        .process(SdFileJob::new("CUBE.GCO", Duration::from_secs(1)), 0, &Tags::new())
        .unwrap_err();
    assert!(matches!(
        err.as_protocol_error(),
        Some(ProtocolError::IncompatibleJob { .. })
    ));

    let file = gcode_file("G28\n");
    let err = protocol
        .process(
            Arc::new(LocalGcodeStreamJob::new(file.path(), "X.GCO").unwrap()),
            0,
            &Tags::new(),
        )
        .unwrap_err();
    assert!(matches!(
        err.as_protocol_error(),
        Some(ProtocolError::IncompatibleJob { .. })
    ));
    assert_eq!(protocol.state(), ProtocolState::Connected);
}
