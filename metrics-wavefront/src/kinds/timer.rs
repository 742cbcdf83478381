use std::time::Duration;

use quanta::{Clock, Instant};

use super::{Histogram, HistogramSnapshot, Meter, MeterSnapshot};

/// Measures both the rate at which an operation is called and the distribution of its duration.
///
/// Durations are recorded in seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct Timer {
    meter: Meter,
    histogram: Histogram,
}

impl Timer {
    /// Creates a new `Timer` using the given clock.
    pub fn new(clock: Clock) -> Self {
        Self { meter: Meter::new(clock), histogram: Histogram::new() }
    }

    /// Records an operation that took `duration`.
    pub fn update(&self, duration: Duration) {
        self.histogram.add(duration.as_secs_f64());
        self.meter.mark(1);
    }

    /// Starts timing an operation.
    ///
    /// The duration is recorded when the returned context is stopped or dropped.
    pub fn time(&self) -> TimerContext {
        let clock = self.meter_clock();
        TimerContext { timer: self.clone(), start: clock.now(), clock, stopped: false }
    }

    /// Gets the number of recorded operations.
    pub fn count(&self) -> u64 {
        self.meter.count()
    }

    /// Gets the rates of recorded operations.
    pub fn meter_snapshot(&self) -> MeterSnapshot {
        self.meter.snapshot()
    }

    /// Gets the duration statistics of recorded operations.
    pub fn histogram_snapshot(&self) -> HistogramSnapshot {
        self.histogram.snapshot()
    }

    fn meter_clock(&self) -> Clock {
        self.meter.clock().clone()
    }
}

/// A running measurement started by [`Timer::time`].
pub struct TimerContext {
    timer: Timer,
    clock: Clock,
    start: Instant,
    stopped: bool,
}

impl TimerContext {
    /// Stops the measurement, records it and returns the elapsed time.
    pub fn stop(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.clock.now().duration_since(self.start);
        if !self.stopped {
            self.stopped = true;
            self.timer.update(elapsed);
        }
        elapsed
    }
}

impl Drop for TimerContext {
    fn drop(&mut self) {
        if !self.stopped {
            self.record();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quanta::Clock;

    use super::Timer;

    #[test]
    fn context_records_elapsed() {
        let (clock, mock) = Clock::mock();
        let timer = Timer::new(clock);

        let context = timer.time();
        mock.increment(Duration::from_millis(250));
        assert_eq!(context.stop(), Duration::from_millis(250));

        {
            let _context = timer.time();
            mock.increment(Duration::from_millis(750));
        }

        assert_eq!(timer.count(), 2);
        let snapshot = timer.histogram_snapshot();
        assert_eq!(snapshot.sum, 1.0);
        assert_eq!(snapshot.max, 0.75);
    }
}
