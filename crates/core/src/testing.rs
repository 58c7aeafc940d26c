//! Testing infrastructure for the coordination layer.
//!
//! Provides trait-double implementations of the external collaborators so
//! the coordinator can be driven without a real process registry or
//! analytics backend:
//!
//! - [`FakeProcessesModel`]: settable devices/processes, selection with
//!   listener notification
//! - [`RecordingMetrics`]: records every metrics call for assertions
//!
//! The transport double lives in `fg_runtime::testing`.

use std::sync::Arc;

use parking_lot::Mutex;

use fg_protocol::{DeviceDescriptor, ProcessDescriptor, TrackingSupportEvent};

use crate::metrics::{DetectionMetrics, HandshakeConversion};
use crate::process_model::{ProcessesModel, SelectionListener};

/// In-memory process registry for tests.
#[derive(Default)]
pub struct FakeProcessesModel {
    devices: Mutex<Vec<DeviceDescriptor>>,
    processes: Mutex<Vec<ProcessDescriptor>>,
    selected: Mutex<Option<ProcessDescriptor>>,
    listeners: Mutex<Vec<SelectionListener>>,
}

impl FakeProcessesModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the registry aware of a device.
    pub fn add_device(&self, device: DeviceDescriptor) {
        self.devices.lock().push(device);
    }

    /// Adds a running process resolvable via `find_process_by_pid`.
    pub fn add_process(&self, process: ProcessDescriptor) {
        self.processes.lock().push(process);
    }
}

impl ProcessesModel for FakeProcessesModel {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.lock().clone()
    }

    fn processes(&self) -> Vec<ProcessDescriptor> {
        self.processes.lock().clone()
    }

    fn find_process_by_pid(
        &self,
        device: &DeviceDescriptor,
        pid: i32,
    ) -> Option<ProcessDescriptor> {
        self.processes
            .lock()
            .iter()
            .find(|process| &process.device == device && process.pid == pid)
            .cloned()
    }

    fn selected_process(&self) -> Option<ProcessDescriptor> {
        self.selected.lock().clone()
    }

    fn set_selected_process(&self, process: Option<ProcessDescriptor>) {
        *self.selected.lock() = process.clone();

        let listeners: Vec<SelectionListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(process.as_ref());
        }
    }

    fn add_selection_listener(&self, listener: SelectionListener) {
        self.listeners.lock().push(listener);
    }
}

/// Metrics sink that records every call for test assertions.
#[derive(Default)]
pub struct RecordingMetrics {
    results: Mutex<Vec<(TrackingSupportEvent, bool)>>,
    conversions: Mutex<Vec<HandshakeConversion>>,
    anomalies: Mutex<Vec<DeviceDescriptor>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(result, recovery)` pair logged so far, in order.
    pub fn handshake_results(&self) -> Vec<(TrackingSupportEvent, bool)> {
        self.results.lock().clone()
    }

    /// Every conversion logged so far, in order.
    pub fn conversions(&self) -> Vec<HandshakeConversion> {
        self.conversions.lock().clone()
    }

    /// Every device a reconnect anomaly was logged for, in order.
    pub fn reconnect_anomalies(&self) -> Vec<DeviceDescriptor> {
        self.anomalies.lock().clone()
    }
}

impl DetectionMetrics for RecordingMetrics {
    fn log_handshake_result(&self, result: &TrackingSupportEvent, recovery: bool) {
        self.results.lock().push((result.clone(), recovery));
    }

    fn log_conversion(&self, conversion: HandshakeConversion) {
        self.conversions.lock().push(conversion);
    }

    fn log_reconnect_anomaly(&self, device: &DeviceDescriptor) {
        self.anomalies.lock().push(device.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor::new("FakeManufacturer", "FakeModel", serial, 33)
    }

    #[test]
    fn selection_notifies_listeners() {
        let model = FakeProcessesModel::new();
        let seen: Arc<Mutex<Vec<Option<i32>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        model.add_selection_listener(Arc::new(move |process: Option<&ProcessDescriptor>| {
            sink.lock().push(process.map(|p| p.pid));
        }));

        let d = device("d1");
        model.set_selected_process(Some(ProcessDescriptor {
            device: d.clone(),
            pid: 7,
            name: "com.example.app".to_string(),
            is_running: true,
            is_debuggable: true,
        }));
        model.set_selected_process(None);

        assert_eq!(*seen.lock(), vec![Some(7), None]);
    }

    #[test]
    fn find_process_matches_device_and_pid() {
        let model = FakeProcessesModel::new();
        let d1 = device("d1");
        let d2 = device("d2");
        model.add_process(ProcessDescriptor {
            device: d1.clone(),
            pid: 7,
            name: "com.example.app".to_string(),
            is_running: true,
            is_debuggable: true,
        });

        assert!(model.find_process_by_pid(&d1, 7).is_some());
        assert!(model.find_process_by_pid(&d2, 7).is_none());
        assert!(model.find_process_by_pid(&d1, 8).is_none());
    }
}
