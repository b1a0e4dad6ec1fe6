//! Stock protocol listeners

use super::{Protocol, ProtocolListener};
use fabkit_core::{EventDispatcher, FileEntry, ProtocolEvent, ProtocolState, Temperatures};

/// Writes protocol events to the `tracing` log.
///
/// Device traffic goes to `debug`, everything else to `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProtocolListener;

impl TracingProtocolListener {
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolListener for TracingProtocolListener {
    fn on_protocol_state(&self, protocol: &Protocol, old: ProtocolState, new: ProtocolState) {
        tracing::info!(target: "fabkit::protocol", "{}: {} -> {}", protocol, old, new);
    }

    fn on_protocol_log(&self, _protocol: &Protocol, message: &str) {
        if message.starts_with("<<<") || message.starts_with(">>>") {
            tracing::debug!(target: "fabkit::protocol", "{}", message);
        } else {
            tracing::info!(target: "fabkit::protocol", "{}", message);
        }
    }

    fn on_protocol_temperature(&self, _protocol: &Protocol, temperatures: &Temperatures) {
        let report = temperatures
            .iter()
            .map(|(key, reading)| match reading.target {
                Some(target) => format!("{}={:.1}/{:.1}", key, reading.actual, target),
                None => format!("{}={:.1}", key, reading.actual),
            })
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(target: "fabkit::protocol", "Temperatures: {}", report);
    }

    fn on_protocol_file_storage_available(&self, _protocol: &Protocol, available: bool) {
        tracing::info!(target: "fabkit::protocol", "File storage available: {}", available);
    }

    fn on_protocol_file_list(&self, _protocol: &Protocol, files: &[FileEntry]) {
        tracing::info!(target: "fabkit::protocol", "{} files on storage", files.len());
    }

    fn on_protocol_file_print_started(&self, _protocol: &Protocol, name: &str, size: u64) {
        tracing::info!(target: "fabkit::protocol", "Printing {} from storage ({} bytes)", name, size);
    }

    fn on_protocol_file_print_done(&self, _protocol: &Protocol) {
        tracing::info!(target: "fabkit::protocol", "Print from storage done");
    }
}

/// Republishes protocol events on an [`EventDispatcher`] for async consumers
#[derive(Debug, Clone)]
pub struct EventForwarder {
    dispatcher: EventDispatcher,
}

impl EventForwarder {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher }
    }

    /// The dispatcher events are published on
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    fn publish(&self, event: ProtocolEvent) {
        self.dispatcher.publish(event);
    }
}

impl ProtocolListener for EventForwarder {
    fn on_protocol_state(&self, _protocol: &Protocol, old: ProtocolState, new: ProtocolState) {
        self.publish(ProtocolEvent::StateChanged { old, new });
    }

    fn on_protocol_log(&self, _protocol: &Protocol, message: &str) {
        self.publish(ProtocolEvent::Log(message.to_string()));
    }

    fn on_protocol_temperature(&self, _protocol: &Protocol, temperatures: &Temperatures) {
        self.publish(ProtocolEvent::Temperature(temperatures.clone()));
    }

    fn on_protocol_file_storage_available(&self, _protocol: &Protocol, available: bool) {
        self.publish(ProtocolEvent::FileStorageAvailable(available));
    }

    fn on_protocol_file_list(&self, _protocol: &Protocol, files: &[FileEntry]) {
        self.publish(ProtocolEvent::FileList(files.to_vec()));
    }

    fn on_protocol_file_status(&self, _protocol: &Protocol, pos: u64, total: u64) {
        self.publish(ProtocolEvent::FileStatus { pos, total });
    }

    fn on_protocol_file_print_started(&self, _protocol: &Protocol, name: &str, size: u64) {
        self.publish(ProtocolEvent::FilePrintStarted {
            name: name.to_string(),
            size,
        });
    }

    fn on_protocol_file_print_done(&self, _protocol: &Protocol) {
        self.publish(ProtocolEvent::FilePrintDone);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;
    use crate::transport::{virtual_port::VirtualTransport, ConnectionParams};
    use std::sync::Arc;

    #[test]
    fn test_forwarder_publishes_state_changes() {
        let dispatcher = EventDispatcher::default_with_buffer();
        let mut rx = dispatcher.subscribe();
        let listener: Arc<dyn ProtocolListener> = Arc::new(EventForwarder::new(dispatcher));

        let protocol = Protocol::new(Arc::new(NullDevice::new()));
        protocol.register_listener(&listener);
        protocol
            .connect(Arc::new(VirtualTransport::new("v")), &ConnectionParams::virtual_port())
            .unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProtocolEvent::StateChanged { old, new } = event {
                states.push((old, new));
            }
        }
        assert_eq!(
            states,
            vec![
                (ProtocolState::Disconnected, ProtocolState::Connecting),
                (ProtocolState::Connecting, ProtocolState::Connected),
            ]
        );
    }

    #[test]
    fn test_forwarder_publishes_file_events() {
        let dispatcher = EventDispatcher::default_with_buffer();
        let mut rx = dispatcher.subscribe();
        let listener: Arc<dyn ProtocolListener> = Arc::new(EventForwarder::new(dispatcher));

        let protocol = Protocol::new(Arc::new(NullDevice::new()));
        protocol.register_listener(&listener);
        protocol.notify_file_status(10, 100);
        protocol.notify_file_print_done();

        assert_eq!(rx.try_recv().unwrap(), ProtocolEvent::FileStatus { pos: 10, total: 100 });
        assert_eq!(rx.try_recv().unwrap(), ProtocolEvent::FilePrintDone);
    }
}
