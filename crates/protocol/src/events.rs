//! Event envelopes, commands, and device-activity notifications.
//!
//! The transport fans every event out to every connected client; these are
//! the shapes each client decodes off its subscriptions.

use serde::{Deserialize, Serialize};

use crate::types::{DeviceDescriptor, ForegroundProcess};

/// Kind of per-device event a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Foreground-process reports from the on-device tracker
    ForegroundProcess,
    /// Tracking-support classifications (handshake replies)
    TrackingSupport,
}

/// Envelope for a per-device event delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEvent {
    /// Transport-reported device clock at emission, in nanoseconds
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Discriminated union of per-device event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    ForegroundProcess(ForegroundProcessEvent),
    TrackingSupport(TrackingSupportEvent),
}

impl EventPayload {
    /// Returns the [`EventKind`] this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ForegroundProcess(_) => EventKind::ForegroundProcess,
            EventPayload::TrackingSupport(_) => EventKind::TrackingSupport,
        }
    }
}

/// Raw foreground-process report as it appears on the wire.
///
/// The on-device tracker sends the pid as a string; decoding it into a
/// [`ForegroundProcess`] can fail, and a non-numeric pid is a violation of
/// the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundProcessEvent {
    /// Process id, stringly typed on the wire
    pub pid: String,
    /// Name of the foreground application's process
    pub process_name: String,
}

impl TryFrom<&ForegroundProcessEvent> for ForegroundProcess {
    type Error = std::num::ParseIntError;

    fn try_from(event: &ForegroundProcessEvent) -> Result<Self, Self::Error> {
        Ok(ForegroundProcess {
            pid: event.pid.parse()?,
            process_name: event.process_name.clone(),
        })
    }
}

/// Handshake reply: whether the device supports foreground-process tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSupportEvent {
    /// The device's self-reported classification
    pub support_type: SupportType,
    /// Populated only when `support_type` is [`SupportType::NotSupported`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_not_supported: Option<ReasonNotSupported>,
}

impl TrackingSupportEvent {
    pub fn new(support_type: SupportType) -> Self {
        Self {
            support_type,
            reason_not_supported: None,
        }
    }

    pub fn not_supported(reason: ReasonNotSupported) -> Self {
        Self {
            support_type: SupportType::NotSupported,
            reason_not_supported: Some(reason),
        }
    }
}

/// Wire classification of a device's tracking capability.
///
/// `Unrecognized` is the forward-compatibility catch-all for values this
/// client does not know; consumers must treat it as a wire-contract
/// violation, never as [`SupportType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupportType {
    /// The device could not determine support yet; the client retries
    Unknown,
    /// On-device tracking works
    Supported,
    /// On-device tracking is unavailable
    NotSupported,
    /// Any wire value this client does not recognize
    #[serde(other)]
    Unrecognized,
}

/// Why a device reported [`SupportType::NotSupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonNotSupported {
    /// The dumpsys utility is missing on the device
    DumpsysNotFound,
    /// The grep utility is missing on the device
    GrepNotFound,
    /// Activity enumeration produced no usable foreground candidate
    NoTopActivityFound,
}

/// Commands a client can send to a device, fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Start the on-device foreground-process tracker
    StartTracking,
    /// Stop the on-device tracker; destructive for every watching client
    StopTracking,
    /// Ask the device to classify its tracking support (handshake)
    IsTrackingSupported,
}

/// Connect/disconnect notification from the transport's activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamActivity {
    pub device: DeviceDescriptor,
    pub kind: ActivityKind,
}

/// Whether a device appeared or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Connected,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&SupportType::NotSupported).unwrap(),
            "\"NOT_SUPPORTED\""
        );
        let parsed: SupportType = serde_json::from_str("\"SUPPORTED\"").unwrap();
        assert_eq!(parsed, SupportType::Supported);
    }

    #[test]
    fn unknown_wire_value_maps_to_unrecognized() {
        let parsed: SupportType = serde_json::from_str("\"SUPPORTED_V2\"").unwrap();
        assert_eq!(parsed, SupportType::Unrecognized);
    }

    #[test]
    fn event_envelope_roundtrip() {
        let event = TransportEvent {
            timestamp: 1234,
            payload: EventPayload::TrackingSupport(TrackingSupportEvent::not_supported(
                ReasonNotSupported::DumpsysNotFound,
            )),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "TRACKING_SUPPORT");
        assert_eq!(json["payload"]["support_type"], "NOT_SUPPORTED");

        let back: TransportEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.payload.kind(), EventKind::TrackingSupport);
    }

    #[test]
    fn foreground_process_pid_decodes_from_string() {
        let event = ForegroundProcessEvent {
            pid: "4242".to_string(),
            process_name: "com.example.app".to_string(),
        };

        let process = ForegroundProcess::try_from(&event).unwrap();
        assert_eq!(process.pid, 4242);
        assert_eq!(process.process_name, "com.example.app");
    }

    #[test]
    fn non_numeric_pid_is_an_error() {
        let event = ForegroundProcessEvent {
            pid: "not-a-pid".to_string(),
            process_name: "com.example.app".to_string(),
        };

        assert!(ForegroundProcess::try_from(&event).is_err());
    }
}
