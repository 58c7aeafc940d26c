//! Process-wide services shared by every client session.
//!
//! Both services are explicit injected singletons: constructed once at
//! process start and handed to every session. Nothing here is ambient
//! static state.

use std::collections::HashMap;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use fg_protocol::DeviceDescriptor;

use crate::device_model::DeviceModel;

struct SessionEntry {
    id: u64,
    model: Weak<DeviceModel>,
}

/// Process-wide set of live device sessions.
///
/// The on-device tracker has no concept of which session asked for it, so
/// stopping it is destructive to every session watching the same device.
/// Before sending a stop command, callers ask this registry whether any
/// other live session still has the device selected.
///
/// Sessions are held weakly; a session that is dropped without an explicit
/// deregistration stops counting as soon as its last strong reference goes
/// away.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<SessionEntry>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn register(&self, id: u64, model: Weak<DeviceModel>) {
        self.sessions.lock().push(SessionEntry { id, model });
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.sessions.lock().retain(|entry| entry.id != id);
    }

    /// Whether any live session other than `own_session` currently has
    /// `device` selected.
    ///
    /// This is the reference-counting predicate gating every on-device stop
    /// command. Dead sessions are pruned on the way through.
    pub fn is_selected_in_other_session(&self, own_session: u64, device: &DeviceDescriptor) -> bool {
        let mut sessions = self.sessions.lock();
        sessions.retain(|entry| entry.model.strong_count() > 0);
        sessions
            .iter()
            .filter(|entry| entry.id != own_session)
            .filter_map(|entry| entry.model.upgrade())
            .any(|model| model.selected_device().as_ref() == Some(device))
    }

    /// Number of live registered sessions.
    pub fn session_count(&self) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.retain(|entry| entry.model.strong_count() > 0);
        sessions.len()
    }
}

struct ClockEntry {
    last_clock: i64,
    anomaly_reported: bool,
}

/// Per-device record of the transport clock at last connect.
///
/// Used purely to detect reconnect anomalies: a connect whose clock is not
/// strictly greater than the previous connect's clock. Each device reports
/// the anomaly at most once; entries are never cleared.
#[derive(Default)]
pub struct ConnectClockTable {
    entries: Mutex<HashMap<DeviceDescriptor, ClockEntry>>,
}

impl ConnectClockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a connect. Returns `true` exactly once per device, the first
    /// time the connect clock fails to advance past the previous one.
    pub fn record_connect(&self, device: &DeviceDescriptor, clock: i64) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(device) {
            None => {
                entries.insert(
                    device.clone(),
                    ClockEntry {
                        last_clock: clock,
                        anomaly_reported: false,
                    },
                );
                false
            }
            Some(entry) => {
                let anomaly = clock <= entry.last_clock && !entry.anomaly_reported;
                if anomaly {
                    entry.anomaly_reported = true;
                }
                entry.last_clock = clock;
                anomaly
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor::new("FakeManufacturer", "FakeModel", serial, 33)
    }

    #[test]
    fn first_connect_is_never_an_anomaly() {
        let table = ConnectClockTable::new();
        assert!(!table.record_connect(&device("d1"), 1_000));
    }

    #[test]
    fn non_monotonic_reconnect_is_reported_once() {
        let table = ConnectClockTable::new();
        let d = device("d1");

        assert!(!table.record_connect(&d, 1_000));
        assert!(table.record_connect(&d, 500));
        // later reconnects stay quiet, monotonic or not
        assert!(!table.record_connect(&d, 2_000));
        assert!(!table.record_connect(&d, 100));
    }

    #[test]
    fn equal_clock_counts_as_anomaly() {
        let table = ConnectClockTable::new();
        let d = device("d1");

        assert!(!table.record_connect(&d, 1_000));
        assert!(table.record_connect(&d, 1_000));
    }

    #[test]
    fn devices_are_tracked_independently() {
        let table = ConnectClockTable::new();

        assert!(!table.record_connect(&device("d1"), 1_000));
        assert!(!table.record_connect(&device("d2"), 10));
        assert!(table.record_connect(&device("d1"), 10));
    }
}
