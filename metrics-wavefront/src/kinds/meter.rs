use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use super::ewma::{Ewma, TICK_INTERVAL};

struct Rates {
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    uncounted: u64,
    last_tick: Instant,
}

impl Rates {
    fn tick_if_necessary(&mut self, now: Instant) {
        let age = now.duration_since(self.last_tick);
        if age < TICK_INTERVAL {
            return;
        }

        let ticks = (age.as_nanos() / TICK_INTERVAL.as_nanos()) as u32;
        self.last_tick = self.last_tick + TICK_INTERVAL * ticks;

        // Only the first tick sees the events counted so far, the rest were silent intervals.
        let mut count = std::mem::take(&mut self.uncounted);
        for _ in 0..ticks {
            self.m1.tick(count);
            self.m5.tick(count);
            self.m15.tick(count);
            count = 0;
        }
    }
}

struct Inner {
    count: AtomicU64,
    rates: Mutex<Rates>,
    start: Instant,
    clock: Clock,
}

/// Point-in-time values of a [`Meter`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeterSnapshot {
    /// Total number of events.
    pub count: u64,

    /// Average rate, in events per second, since the meter was created.
    pub mean_rate: f64,

    /// One-minute moving average rate.
    pub m1_rate: f64,

    /// Five-minute moving average rate.
    pub m5_rate: f64,

    /// Fifteen-minute moving average rate.
    pub m15_rate: f64,
}

/// Measures the rate at which events occur.
///
/// Rates are exponentially-weighted moving averages over one, five and fifteen minutes, updated
/// every five seconds, as well as the mean rate over the lifetime of the meter.
#[derive(Clone)]
pub struct Meter {
    inner: Arc<Inner>,
}

impl Meter {
    /// Creates a new `Meter` using the given clock.
    pub fn new(clock: Clock) -> Self {
        let start = clock.now();
        Self {
            inner: Arc::new(Inner {
                count: AtomicU64::new(0),
                rates: Mutex::new(Rates {
                    m1: Ewma::minutes(1),
                    m5: Ewma::minutes(5),
                    m15: Ewma::minutes(15),
                    uncounted: 0,
                    last_tick: start,
                }),
                start,
                clock,
            }),
        }
    }

    /// Marks the occurrence of `n` events.
    pub fn mark(&self, n: u64) {
        let now = self.inner.clock.now();
        let mut rates = self.inner.rates.lock();
        rates.tick_if_necessary(now);
        rates.uncounted += n;
        self.inner.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Gets the total number of events marked.
    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Gets a consistent view of the count and all rates.
    pub fn snapshot(&self) -> MeterSnapshot {
        let now = self.inner.clock.now();
        let mut rates = self.inner.rates.lock();
        rates.tick_if_necessary(now);

        let count = self.count();
        let elapsed = now.duration_since(self.inner.start).as_secs_f64();
        let mean_rate = if elapsed > 0.0 { count as f64 / elapsed } else { 0.0 };

        MeterSnapshot {
            count,
            mean_rate,
            m1_rate: rates.m1.rate(),
            m5_rate: rates.m5.rate(),
            m15_rate: rates.m15.rate(),
        }
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.inner.clock
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter").field("count", &self.count()).finish()
    }
}

impl PartialEq for Meter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
