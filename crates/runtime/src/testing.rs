//! Testing infrastructure for the transport layer.
//!
//! Provides [`FakeTransport`], an in-memory [`Transport`] that scripts device
//! activity without any physical channel. Tests connect and disconnect
//! devices, configure per-device handshake replies, inject foreground-process
//! events, and assert on the commands the layer under test sent.
//!
//! # Example
//!
//! ```ignore
//! use fg_runtime::testing::FakeTransport;
//!
//! #[tokio::test]
//! async fn test_handshake() {
//!     let transport = Arc::new(FakeTransport::new());
//!     transport.set_support(&device, SupportType::Supported);
//!     transport.connect_device(&device);
//!     // ... drive the coordinator, then:
//!     assert_eq!(transport.command_count(CommandType::IsTrackingSupported), 1);
//! }
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use fg_protocol::{
    ActivityKind, CommandType, DeviceDescriptor, EventKind, EventPayload, ForegroundProcessEvent,
    ReasonNotSupported, StreamActivity, SupportType, TrackingSupportEvent, TransportEvent,
};

use crate::error::{Error, Result};
use crate::event_stream::EventStream;
use crate::transport::Transport;

const CHANNEL_CAPACITY: usize = 256;

struct FakeDevice {
    event_tx: broadcast::Sender<TransportEvent>,
    clock: i64,
    support: Option<(SupportType, Option<ReasonNotSupported>)>,
    connected: bool,
}

impl FakeDevice {
    fn new() -> Self {
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            event_tx,
            clock: 0,
            support: None,
            connected: false,
        }
    }
}

/// In-memory transport for tests.
///
/// Devices are registered lazily; configure them before connecting. When a
/// support type is configured for a device, every `IsTrackingSupported`
/// command is answered synchronously with a matching tracking-support event,
/// the way the real channel's agent replies to a handshake.
///
/// Event timestamps are a monotonic counter independent of the configured
/// device clock, and `from_timestamp` is ignored: subscribers receive
/// whatever is emitted after they subscribe, which is what the real
/// broadcast channel does for live sessions.
pub struct FakeTransport {
    activity_tx: broadcast::Sender<StreamActivity>,
    devices: DashMap<DeviceDescriptor, FakeDevice>,
    commands: Mutex<Vec<(DeviceDescriptor, CommandType)>>,
    next_timestamp: AtomicI64,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        let (activity_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            activity_tx,
            devices: DashMap::new(),
            commands: Mutex::new(Vec::new()),
            next_timestamp: AtomicI64::new(0),
        }
    }

    /// Marks the device connected and broadcasts the activity notification.
    pub fn connect_device(&self, device: &DeviceDescriptor) {
        self.devices
            .entry(device.clone())
            .or_insert_with(FakeDevice::new)
            .connected = true;
        let _ = self.activity_tx.send(StreamActivity {
            device: device.clone(),
            kind: ActivityKind::Connected,
        });
    }

    /// Marks the device disconnected and broadcasts the activity notification.
    pub fn disconnect_device(&self, device: &DeviceDescriptor) {
        if let Some(mut entry) = self.devices.get_mut(device) {
            entry.connected = false;
        }
        let _ = self.activity_tx.send(StreamActivity {
            device: device.clone(),
            kind: ActivityKind::Disconnected,
        });
    }

    /// Configures the reply this device gives to handshake commands.
    pub fn set_support(&self, device: &DeviceDescriptor, support: SupportType) {
        self.devices
            .entry(device.clone())
            .or_insert_with(FakeDevice::new)
            .support = Some((support, None));
    }

    /// Like [`set_support`](Self::set_support), with a not-supported reason.
    pub fn set_support_with_reason(
        &self,
        device: &DeviceDescriptor,
        support: SupportType,
        reason: ReasonNotSupported,
    ) {
        self.devices
            .entry(device.clone())
            .or_insert_with(FakeDevice::new)
            .support = Some((support, Some(reason)));
    }

    /// Sets the clock the device reports on connect.
    pub fn set_clock(&self, device: &DeviceDescriptor, clock: i64) {
        self.devices
            .entry(device.clone())
            .or_insert_with(FakeDevice::new)
            .clock = clock;
    }

    /// Emits a foreground-process event for the device.
    pub fn send_foreground_process(&self, device: &DeviceDescriptor, pid: i32, name: &str) {
        self.send_raw_foreground_process(device, &pid.to_string(), name);
    }

    /// Emits a foreground-process event with an arbitrary wire pid.
    ///
    /// Lets tests exercise the unparseable-pid protocol error.
    pub fn send_raw_foreground_process(&self, device: &DeviceDescriptor, pid: &str, name: &str) {
        self.emit(
            device,
            EventPayload::ForegroundProcess(ForegroundProcessEvent {
                pid: pid.to_string(),
                process_name: name.to_string(),
            }),
        );
    }

    /// Emits a tracking-support event directly, bypassing the handshake reply.
    pub fn send_tracking_support(
        &self,
        device: &DeviceDescriptor,
        support: SupportType,
        reason: Option<ReasonNotSupported>,
    ) {
        self.emit(
            device,
            EventPayload::TrackingSupport(TrackingSupportEvent {
                support_type: support,
                reason_not_supported: reason,
            }),
        );
    }

    /// Number of commands of the given type sent so far, across all devices.
    pub fn command_count(&self, command: CommandType) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|(_, c)| *c == command)
            .count()
    }

    /// Every `(device, command)` pair sent so far, in order.
    pub fn commands(&self) -> Vec<(DeviceDescriptor, CommandType)> {
        self.commands.lock().clone()
    }

    /// Whether the device is currently marked connected.
    pub fn is_connected(&self, device: &DeviceDescriptor) -> bool {
        self.devices
            .get(device)
            .is_some_and(|entry| entry.connected)
    }

    fn emit(&self, device: &DeviceDescriptor, payload: EventPayload) {
        let timestamp = self.next_timestamp.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(entry) = self.devices.get(device) {
            if !entry.connected {
                tracing::debug!(serial = %device.serial, "dropping event for disconnected device");
                return;
            }
            let _ = entry.event_tx.send(TransportEvent { timestamp, payload });
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn stream_activity(&self) -> EventStream<StreamActivity> {
        EventStream::new(self.activity_tx.subscribe())
    }

    fn events(
        &self,
        device: &DeviceDescriptor,
        kind: EventKind,
        _from_timestamp: i64,
    ) -> EventStream<TransportEvent> {
        match self.devices.get(device) {
            Some(entry) => EventStream::filtered(entry.event_tx.subscribe(), move |event| {
                event.payload.kind() == kind
            }),
            None => EventStream::closed(),
        }
    }

    fn send_command(&self, device: &DeviceDescriptor, command: CommandType) {
        self.commands.lock().push((device.clone(), command));

        if command == CommandType::IsTrackingSupported {
            let reply = self.devices.get(device).and_then(|entry| entry.support);
            if let Some((support, reason)) = reply {
                self.send_tracking_support(device, support, reason);
            }
        }
    }

    async fn current_clock(&self, device: &DeviceDescriptor) -> Result<i64> {
        match self.devices.get(device) {
            Some(entry) => Ok(entry.clock),
            None => Err(Error::DeviceNotConnected(device.serial.clone())),
        }
    }
}
