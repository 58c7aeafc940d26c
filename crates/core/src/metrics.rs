//! Metrics hooks for handshake outcomes.
//!
//! Implementations are fire-and-forget sinks; they must never block the
//! protocol-driving tasks.

use fg_protocol::{DeviceDescriptor, TrackingSupportEvent};

/// How an ambiguous or wrong classification eventually resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeConversion {
    /// `UNKNOWN` replies eventually resolved to `SUPPORTED`
    UnknownToSupported,
    /// `UNKNOWN` replies eventually resolved to `NOT_SUPPORTED`
    UnknownToNotSupported,
    /// The device disconnected while still answering `UNKNOWN`
    UnknownNotResolved,
    /// A device once classified `NOT_SUPPORTED` later reported `SUPPORTED`
    /// (false-negative recovery)
    NotSupportedToSupported,
}

/// Sink for handshake and reconnect diagnostics.
pub trait DetectionMetrics: Send + Sync {
    /// A handshake round produced a classification.
    ///
    /// `recovery` is true when this round re-negotiated a device that had
    /// already been through a handshake before.
    fn log_handshake_result(&self, result: &TrackingSupportEvent, recovery: bool);

    /// An ambiguous or wrong classification resolved; see [`HandshakeConversion`].
    fn log_conversion(&self, conversion: HandshakeConversion);

    /// A device reconnected with a non-monotonic clock. Reported at most
    /// once per device.
    fn log_reconnect_anomaly(&self, device: &DeviceDescriptor);
}

/// Metrics sink that discards everything.
pub struct NoopMetrics;

impl DetectionMetrics for NoopMetrics {
    fn log_handshake_result(&self, _result: &TrackingSupportEvent, _recovery: bool) {}

    fn log_conversion(&self, _conversion: HandshakeConversion) {}

    fn log_reconnect_anomaly(&self, _device: &DeviceDescriptor) {}
}
