//! Detection tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a session's detection coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Interval between handshake retries while a device answers `UNKNOWN`.
    pub polling_interval: Duration,
    /// Capacity of each device's handshake state queue. Posting never
    /// blocks; overflow drops the newest state with a warning.
    pub handshake_queue_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(2),
            handshake_queue_capacity: 16,
        }
    }
}
