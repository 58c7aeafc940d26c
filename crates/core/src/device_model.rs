//! One session's device selection and support classifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use fg_protocol::{DeviceDescriptor, ProcessDescriptor};

use crate::process_model::ProcessesModel;
use crate::registry::SessionRegistry;

/// Per-device classification of whether on-device tracking works.
///
/// Mutated only by the detection coordinator; `Supported` is set only after
/// at least one successful handshake result, and the entry disappears on
/// disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportStatus {
    /// The device answered the handshake ambiguously; retries are running
    Unknown,
    /// The device supports on-device tracking
    Supported,
    /// The device reported it cannot track
    NotSupported,
    /// A handshake round has been started and no reply classified yet
    HandshakeInProgress,
}

/// Opaque handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Callback invoked when the session's selected device changes.
pub type SelectedDeviceListener = Arc<dyn Fn(Option<&DeviceDescriptor>) + Send + Sync>;

/// One client session's view of the device world.
///
/// Owns the selected device, the per-device [`SupportStatus`] map, and the
/// selected-device listener list. Device enumeration is delegated to the
/// process registry. Every model registers itself in the process-wide
/// [`SessionRegistry`] at construction and deregisters on drop; a session
/// that forgets to drop its model would otherwise hold a permanent
/// "device in use" vote against every sibling session.
pub struct DeviceModel {
    session_id: u64,
    registry: Arc<SessionRegistry>,
    process_model: Arc<dyn ProcessesModel>,
    selected_device: Mutex<Option<DeviceDescriptor>>,
    support_statuses: Mutex<HashMap<DeviceDescriptor, SupportStatus>>,
    listeners: Mutex<Vec<(ListenerId, SelectedDeviceListener)>>,
    next_listener_id: AtomicU64,
}

impl DeviceModel {
    pub fn new(process_model: Arc<dyn ProcessesModel>, registry: Arc<SessionRegistry>) -> Arc<Self> {
        let session_id = registry.next_session_id();
        let model = Arc::new(Self {
            session_id,
            registry: Arc::clone(&registry),
            process_model,
            selected_device: Mutex::new(None),
            support_statuses: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        });
        registry.register(session_id, Arc::downgrade(&model));
        model
    }

    /// The device this session is currently polling, if any.
    pub fn selected_device(&self) -> Option<DeviceDescriptor> {
        self.selected_device.lock().clone()
    }

    /// Coordinator-only mutator for the selection.
    ///
    /// Selecting a device and selecting a process are mutually exclusive
    /// axes, so any change resets the registry's selected process before
    /// listeners hear about the new value (which may be `None`).
    pub(crate) fn set_selected_device(&self, device: Option<DeviceDescriptor>) {
        *self.selected_device.lock() = device.clone();
        self.process_model.set_selected_process(None);

        let listeners: Vec<SelectedDeviceListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(device.as_ref());
        }
    }

    /// The current classification for `device`, absent if it never completed
    /// a handshake or has disconnected since.
    pub fn support_status(&self, device: &DeviceDescriptor) -> Option<SupportStatus> {
        self.support_statuses.lock().get(device).copied()
    }

    pub(crate) fn set_support_status(&self, device: &DeviceDescriptor, status: SupportStatus) {
        self.support_statuses.lock().insert(device.clone(), status);
    }

    pub(crate) fn remove_support_status(&self, device: &DeviceDescriptor) -> Option<SupportStatus> {
        self.support_statuses.lock().remove(device)
    }

    /// Devices the process registry currently knows about.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.process_model.devices()
    }

    /// Running debuggable processes, as enumerated by the process registry.
    pub fn processes(&self) -> Vec<ProcessDescriptor> {
        self.process_model.processes()
    }

    /// Devices currently classified [`SupportStatus::Supported`].
    pub fn tracking_supported_devices(&self) -> Vec<DeviceDescriptor> {
        self.support_statuses
            .lock()
            .iter()
            .filter(|(_, status)| **status == SupportStatus::Supported)
            .map(|(device, _)| device.clone())
            .collect()
    }

    pub fn add_selected_device_listener(&self, listener: SelectedDeviceListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove_selected_device_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(entry, _)| *entry != id);
    }

    pub(crate) fn session_id(&self) -> u64 {
        self.session_id
    }
}

impl Drop for DeviceModel {
    fn drop(&mut self) {
        self.registry.unregister(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcessesModel;

    fn device(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor::new("FakeManufacturer", "FakeModel", serial, 33)
    }

    fn process(device: &DeviceDescriptor, pid: i32) -> ProcessDescriptor {
        ProcessDescriptor {
            device: device.clone(),
            pid,
            name: format!("process{pid}"),
            is_running: true,
            is_debuggable: true,
        }
    }

    #[test]
    fn selecting_a_device_resets_the_selected_process() {
        let processes = Arc::new(FakeProcessesModel::new());
        let registry = Arc::new(SessionRegistry::new());
        let model = DeviceModel::new(processes.clone(), registry);

        let d = device("d1");
        processes.set_selected_process(Some(process(&d, 1)));

        model.set_selected_device(Some(d.clone()));

        assert_eq!(model.selected_device(), Some(d));
        assert_eq!(processes.selected_process(), None);
    }

    #[test]
    fn listeners_observe_selection_changes_including_clears() {
        let processes = Arc::new(FakeProcessesModel::new());
        let registry = Arc::new(SessionRegistry::new());
        let model = DeviceModel::new(processes, registry);

        let seen: Arc<Mutex<Vec<Option<DeviceDescriptor>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = model.add_selected_device_listener(Arc::new(
            move |device: Option<&DeviceDescriptor>| {
                sink.lock().push(device.cloned());
            },
        ));

        let d = device("d1");
        model.set_selected_device(Some(d.clone()));
        model.set_selected_device(None);

        assert_eq!(*seen.lock(), vec![Some(d), None]);

        model.remove_selected_device_listener(id);
        model.set_selected_device(Some(device("d2")));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn dropping_a_model_removes_its_registry_vote() {
        let processes = Arc::new(FakeProcessesModel::new());
        let registry = Arc::new(SessionRegistry::new());

        let first = DeviceModel::new(processes.clone(), Arc::clone(&registry));
        let second = DeviceModel::new(processes, Arc::clone(&registry));

        let d = device("d1");
        second.set_selected_device(Some(d.clone()));
        assert!(registry.is_selected_in_other_session(first.session_id(), &d));

        drop(second);
        assert!(!registry.is_selected_in_other_session(first.session_id(), &d));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn support_statuses_track_per_device() {
        let processes = Arc::new(FakeProcessesModel::new());
        let registry = Arc::new(SessionRegistry::new());
        let model = DeviceModel::new(processes, registry);

        let d1 = device("d1");
        let d2 = device("d2");
        model.set_support_status(&d1, SupportStatus::Supported);
        model.set_support_status(&d2, SupportStatus::NotSupported);

        assert_eq!(model.support_status(&d1), Some(SupportStatus::Supported));
        assert_eq!(model.tracking_supported_devices(), vec![d1.clone()]);

        model.remove_support_status(&d1);
        assert_eq!(model.support_status(&d1), None);
    }
}
