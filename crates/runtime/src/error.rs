//! Error types for the fg runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the fg runtime and the layers built on it.
#[derive(Debug, Error)]
pub enum Error {
    /// The wire contract was violated (unrecognized classification value,
    /// unparseable payload field). Fatal for the affected device's handling.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure (subscription or delivery).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device is not currently connected to the transport.
    #[error("Device not connected: {0}")]
    DeviceNotConnected(String),

    /// Channel closed unexpectedly.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error means the wire contract was violated.
    ///
    /// Protocol errors must never be retried or downgraded to an ambiguous
    /// classification; the affected device's handling stops instead.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
