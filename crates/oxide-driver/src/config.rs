//! Driver configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default minimum gap between two progress emissions.
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 250;

/// Default capacity of the driver event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for a [`FrameDriver`](crate::FrameDriver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Minimum interval in milliseconds between progress updates sent to the
    /// host observer.
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,
    /// Ignore the element's frame-presentation capability and always drive
    /// processing from time-advance events.
    #[serde(default)]
    pub force_fallback: bool,
    /// Capacity of the broadcast channel carrying [`DriverEvent`](crate::DriverEvent)s.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_throttle_interval_ms() -> u64 {
    DEFAULT_THROTTLE_INTERVAL_MS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: default_throttle_interval_ms(),
            force_fallback: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl DriverConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_force_fallback(mut self, force_fallback: bool) -> Self {
        self.force_fallback = force_fallback;
        self
    }
}
