//! Progress update throttling.
//!
//! The scheduler reports the processed-frame count after every processing
//! call; the throttle forwards it to the host observer at most once per
//! interval. Since every call is an emission attempt the observer never stays
//! stale for longer than one interval plus one frame, and [`UpdateThrottle::flush`]
//! makes the last emitted value exact at shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Host callback receiving the current processed-frame count.
pub type ProgressObserver = Arc<dyn Fn(u64) + Send + Sync>;

pub struct UpdateThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_value: Option<u64>,
    emitted: u64,
    observer: ProgressObserver,
}

impl UpdateThrottle {
    pub fn new(interval: Duration, observer: ProgressObserver) -> Self {
        Self {
            interval,
            last_emit: None,
            last_value: None,
            emitted: 0,
            observer,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Offer `count` to the observer. Emits if nothing was emitted yet or more
    /// than one interval passed since the last emission.
    pub fn record(&mut self, count: u64) -> bool {
        let now = Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) > self.interval,
        };
        if due {
            self.emit(count, now);
        }
        due
    }

    /// Emit `count` unless it is already the last emitted value.
    pub fn flush(&mut self, count: u64) -> bool {
        if self.last_value == Some(count) {
            return false;
        }
        self.emit(count, Instant::now());
        true
    }

    pub fn last_emitted(&self) -> Option<u64> {
        self.last_value
    }

    /// Number of emissions so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn emit(&mut self, count: u64, now: Instant) {
        trace!(count, "Emitting progress");
        (self.observer)(count);
        self.last_emit = Some(now);
        self.last_value = Some(count);
        self.emitted += 1;
    }
}

impl std::fmt::Debug for UpdateThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateThrottle")
            .field("interval", &self.interval)
            .field("last_value", &self.last_value)
            .field("emitted", &self.emitted)
            .finish()
    }
}
