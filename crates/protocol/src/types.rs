//! Device and process identities used across the wire.

use serde::{Deserialize, Serialize};

/// Identity of a physical or virtual device.
///
/// Immutable value type compared by field equality; used as a map key
/// throughout the coordination layer. `serial` is the identity tiebreaker
/// when two devices share manufacturer and model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device manufacturer (e.g. "Google")
    pub manufacturer: String,
    /// Device model name
    pub model: String,
    /// Unique serial number
    pub serial: String,
    /// Platform API level reported by the device
    pub api_level: u32,
}

impl DeviceDescriptor {
    /// Creates a descriptor; convenience for tests and fakes.
    pub fn new(
        manufacturer: impl Into<String>,
        model: impl Into<String>,
        serial: impl Into<String>,
        api_level: u32,
    ) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            serial: serial.into(),
            api_level,
        }
    }
}

/// A running process on a device, as reported by the process registry.
///
/// Immutable snapshot; a fresh descriptor is produced every time the
/// registry re-enumerates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// Device the process runs on
    pub device: DeviceDescriptor,
    /// Process id
    pub pid: i32,
    /// Fully qualified process name
    pub name: String,
    /// Whether the process is currently running
    pub is_running: bool,
    /// Whether the process can be instrumented
    pub is_debuggable: bool,
}

/// A decoded foreground-process report from the on-device tracker.
///
/// Not yet correlated with a [`ProcessDescriptor`]; correlation happens in
/// the coordination layer via a pid lookup against the process registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundProcess {
    /// Process id of the foreground application
    pub pid: i32,
    /// Name of the foreground application's process
    pub process_name: String,
}

impl ForegroundProcess {
    pub fn new(pid: i32, process_name: impl Into<String>) -> Self {
        Self {
            pid,
            process_name: process_name.into(),
        }
    }
}
