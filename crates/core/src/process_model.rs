//! The process registry collaborator interface.
//!
//! The registry enumerates running debuggable processes per device and owns
//! the "selected process" axis of the session's selection. Selecting a device
//! and selecting a process are mutually exclusive; the device side of that
//! rule is enforced by [`DeviceModel`](crate::DeviceModel).

use std::sync::Arc;

use fg_protocol::{DeviceDescriptor, ProcessDescriptor};

/// Callback invoked when the registry's selected process changes.
pub type SelectionListener = Arc<dyn Fn(Option<&ProcessDescriptor>) + Send + Sync>;

/// Interface to the external process registry.
pub trait ProcessesModel: Send + Sync {
    /// Devices the registry currently knows about.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Running debuggable processes across all known devices.
    fn processes(&self) -> Vec<ProcessDescriptor>;

    /// Looks up a running process on `device` by pid.
    ///
    /// `None` means the pid is not known to the registry, i.e. the process
    /// is not debuggable or not instrumentable.
    fn find_process_by_pid(&self, device: &DeviceDescriptor, pid: i32)
    -> Option<ProcessDescriptor>;

    /// The currently selected process, if any.
    fn selected_process(&self) -> Option<ProcessDescriptor>;

    /// Sets or clears the selected process and notifies selection listeners.
    fn set_selected_process(&self, process: Option<ProcessDescriptor>);

    /// Registers a selection-changed listener.
    fn add_selection_listener(&self, listener: SelectionListener);
}
