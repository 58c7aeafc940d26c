//! The transport collaborator interface.
//!
//! The transport owns the physical channel to every device and fans all
//! device activity and events out to all client sessions. The coordination
//! layer holds it as `Arc<dyn Transport>` and never sees the channel itself.

use async_trait::async_trait;

use fg_protocol::{CommandType, DeviceDescriptor, EventKind, StreamActivity, TransportEvent};

use crate::error::Result;
use crate::event_stream::EventStream;

/// Interface to the device event channel.
///
/// Implementations must preserve the broadcast property: every subscriber
/// observes every device's activity and events, not just its own. Consumers
/// are responsible for filtering by relevance and deduplicating.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribes to the connect/disconnect activity feed.
    ///
    /// One subscription covers all devices; a coordinator opens exactly one.
    fn stream_activity(&self) -> EventStream<StreamActivity>;

    /// Subscribes to one device's events of one kind.
    ///
    /// `from_timestamp` is the device clock at subscription time; transports
    /// that replay history must not deliver events older than it. Returns a
    /// closed stream for devices the transport does not know.
    fn events(
        &self,
        device: &DeviceDescriptor,
        kind: EventKind,
        from_timestamp: i64,
    ) -> EventStream<TransportEvent>;

    /// Sends a command to a device, fire-and-forget.
    ///
    /// Delivery failures are not surfaced to the caller; the protocol's
    /// periodic retry loop resends whatever still matters on the next tick.
    fn send_command(&self, device: &DeviceDescriptor, command: CommandType);

    /// Reads the device's current clock, in nanoseconds.
    ///
    /// Queried once per connect to anchor event subscriptions and to detect
    /// reconnect clock anomalies.
    async fn current_clock(&self, device: &DeviceDescriptor) -> Result<i64>;
}
