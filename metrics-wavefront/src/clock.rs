use std::time::{SystemTime, UNIX_EPOCH};

use quanta::{Clock, Instant};

/// A wall-clock time source with millisecond resolution.
///
/// `MillisClock` reads the current Unix time once, at creation, and advances it with a monotonic
/// [`quanta::Clock`]. This keeps the reading cheap and lets tests drive time through
/// [`Clock::mock`].
#[derive(Clone, Debug)]
pub struct MillisClock {
    clock: Clock,
    anchor: Instant,
    anchor_millis: u64,
}

impl MillisClock {
    /// Creates a new `MillisClock` anchored to the current system time.
    pub fn new() -> Self {
        let anchor_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self::from_parts(Clock::new(), anchor_millis)
    }

    /// Creates a new `MillisClock` from the given monotonic clock, reading `anchor_millis` as the
    /// Unix time, in milliseconds, at this moment.
    pub fn from_parts(clock: Clock, anchor_millis: u64) -> Self {
        let anchor = clock.now();
        Self { clock, anchor, anchor_millis }
    }

    /// Returns the current Unix time in milliseconds.
    pub fn now_millis(&self) -> u64 {
        let elapsed = self.clock.now().duration_since(self.anchor);
        self.anchor_millis + elapsed.as_millis() as u64
    }

    /// Returns the underlying monotonic clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl Default for MillisClock {
    fn default() -> Self {
        Self::new()
    }
}
