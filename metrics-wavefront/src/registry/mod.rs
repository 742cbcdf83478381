//! Kind-partitioned metric storage.
//!
//! [`Registry`] maps encoded keys (see [`encode_key`][crate::encode_key]) to metric instances, with
//! one partition per kind. [`TaggedRegistry`] layers the name-and-tags interface on top of it.
mod shards;
use self::shards::Shards;

mod tagged;
pub use self::tagged::TaggedRegistry;

use std::collections::BTreeMap;

use crate::{
    Counter, DeltaCounter, Entry, Gauge, Histogram, Meter, Metric, MetricKind, MillisClock,
    RegistryError, Timer, WavefrontHistogram,
};

#[derive(Clone)]
enum CounterEntry {
    Plain(Counter),
    Delta(DeltaCounter),
}

impl CounterEntry {
    fn counter(&self) -> Counter {
        match self {
            CounterEntry::Plain(counter) => counter.clone(),
            CounterEntry::Delta(delta) => delta.counter().clone(),
        }
    }

    fn into_metric(self) -> Metric {
        match self {
            CounterEntry::Plain(counter) => Metric::PlainCounter(counter),
            CounterEntry::Delta(delta) => Metric::DeltaCounter(delta),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            CounterEntry::Plain(_) => MetricKind::Counter,
            CounterEntry::Delta(_) => MetricKind::DeltaCounter,
        }
    }
}

#[derive(Clone)]
enum HistogramEntry {
    Plain(Histogram),
    Wavefront(WavefrontHistogram),
}

impl HistogramEntry {
    fn into_metric(self) -> Metric {
        match self {
            HistogramEntry::Plain(histogram) => Metric::PlainHistogram(histogram),
            HistogramEntry::Wavefront(histogram) => Metric::WavefrontHistogram(histogram),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            HistogramEntry::Plain(_) => MetricKind::Histogram,
            HistogramEntry::Wavefront(_) => MetricKind::WavefrontHistogram,
        }
    }
}

/// A concurrent metric registry keyed by encoded metric keys.
///
/// Each kind of metric (counter, gauge, meter, timer, histogram) lives in its own partition, so the
/// same key may be used once per kind. Within a partition, a key holds exactly one metric: the
/// accessor methods get the existing metric or create it, and concurrent callers creating the
/// same key always end up with the same instance.
///
/// Delta counters share the counter partition with plain counters, and Wavefront histograms share
/// the histogram partition with plain histograms.
///
/// ## Performance
///
/// `Registry` is optimized for reads: each partition is split into shards guarded by their own
/// lock, and looking up an existing metric only takes a read lock.
pub struct Registry {
    counters: Shards<CounterEntry>,
    gauges: Shards<Gauge>,
    meters: Shards<Meter>,
    timers: Shards<Timer>,
    histograms: Shards<HistogramEntry>,
    clock: MillisClock,
}

impl Registry {
    /// Creates a new, empty `Registry` using the system clock.
    pub fn new() -> Self {
        Self::with_clock(MillisClock::new())
    }

    /// Creates a new, empty `Registry` whose time-dependent metrics use the given clock.
    pub fn with_clock(clock: MillisClock) -> Self {
        Self {
            counters: Shards::new(),
            gauges: Shards::new(),
            meters: Shards::new(),
            timers: Shards::new(),
            histograms: Shards::new(),
            clock,
        }
    }

    /// Returns the clock used by time-dependent metrics.
    pub fn clock(&self) -> &MillisClock {
        &self.clock
    }

    /// Gets or creates the counter under `key`.
    ///
    /// If a delta counter is registered under `key`, its underlying counter is returned.
    pub fn counter(&self, key: &str) -> Counter {
        self.counters.get_or_create(key, || CounterEntry::Plain(Counter::new())).counter()
    }

    /// Gets or creates the gauge under `key`.
    pub fn gauge(&self, key: &str) -> Gauge {
        self.gauges.get_or_create(key, Gauge::new)
    }

    /// Gets the gauge under `key`, or creates one that computes its value with `f`.
    ///
    /// If a gauge already exists under `key`, it is returned as-is and `f` is dropped.
    pub fn gauge_fn<F>(&self, key: &str, f: F) -> Gauge
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.gauges.get_or_create(key, || Gauge::from_fn(f))
    }

    /// Gets or creates the meter under `key`.
    pub fn meter(&self, key: &str) -> Meter {
        self.meters.get_or_create(key, || Meter::new(self.clock.clock().clone()))
    }

    /// Gets or creates the timer under `key`.
    pub fn timer(&self, key: &str) -> Timer {
        self.timers.get_or_create(key, || Timer::new(self.clock.clock().clone()))
    }

    /// Gets or creates the histogram under `key`.
    ///
    /// # Errors
    ///
    /// If a Wavefront histogram is registered under `key`, an error is returned.
    pub fn histogram(&self, key: &str) -> Result<Histogram, RegistryError> {
        match self.histograms.get_or_create(key, || HistogramEntry::Plain(Histogram::new())) {
            HistogramEntry::Plain(histogram) => Ok(histogram),
            HistogramEntry::Wavefront(_) => Err(RegistryError::DuplicateRegistration {
                key: key.to_string(),
                existing: MetricKind::WavefrontHistogram,
            }),
        }
    }

    /// Registers `metric` under `key`.
    ///
    /// # Errors
    ///
    /// If the partition for the metric's kind already holds a metric under `key`, the registry is
    /// left unchanged and an error naming the kind of the existing metric is returned.
    pub fn add(&self, key: &str, metric: Metric) -> Result<(), RegistryError> {
        let duplicate = |existing: MetricKind| RegistryError::DuplicateRegistration {
            key: key.to_string(),
            existing,
        };

        match metric {
            Metric::PlainCounter(counter) => self
                .counters
                .insert_new(key, CounterEntry::Plain(counter))
                .map_err(|existing| duplicate(existing.kind())),
            Metric::DeltaCounter(delta) => self
                .counters
                .insert_new(key, CounterEntry::Delta(delta))
                .map_err(|existing| duplicate(existing.kind())),
            Metric::Gauge(gauge) => {
                self.gauges.insert_new(key, gauge).map_err(|_| duplicate(MetricKind::Gauge))
            }
            Metric::Meter(meter) => {
                self.meters.insert_new(key, meter).map_err(|_| duplicate(MetricKind::Meter))
            }
            Metric::Timer(timer) => {
                self.timers.insert_new(key, timer).map_err(|_| duplicate(MetricKind::Timer))
            }
            Metric::PlainHistogram(histogram) => self
                .histograms
                .insert_new(key, HistogramEntry::Plain(histogram))
                .map_err(|existing| duplicate(existing.kind())),
            Metric::WavefrontHistogram(histogram) => self
                .histograms
                .insert_new(key, HistogramEntry::Wavefront(histogram))
                .map_err(|existing| duplicate(existing.kind())),
        }
    }

    /// Gets the counter under `key`, if one exists.
    pub fn get_counter(&self, key: &str) -> Option<Counter> {
        self.counters.get(key).map(|entry| entry.counter())
    }

    /// Gets the delta counter under `key`, if one exists.
    pub fn get_delta_counter(&self, key: &str) -> Option<DeltaCounter> {
        match self.counters.get(key)? {
            CounterEntry::Delta(delta) => Some(delta),
            CounterEntry::Plain(_) => None,
        }
    }

    /// Gets the gauge under `key`, if one exists.
    pub fn get_gauge(&self, key: &str) -> Option<Gauge> {
        self.gauges.get(key)
    }

    /// Gets the meter under `key`, if one exists.
    pub fn get_meter(&self, key: &str) -> Option<Meter> {
        self.meters.get(key)
    }

    /// Gets the timer under `key`, if one exists.
    pub fn get_timer(&self, key: &str) -> Option<Timer> {
        self.timers.get(key)
    }

    /// Gets the plain histogram under `key`, if one exists.
    pub fn get_histogram(&self, key: &str) -> Option<Histogram> {
        match self.histograms.get(key)? {
            HistogramEntry::Plain(histogram) => Some(histogram),
            HistogramEntry::Wavefront(_) => None,
        }
    }

    /// Gets the Wavefront histogram under `key`, if one exists.
    pub fn get_wavefront_histogram(&self, key: &str) -> Option<WavefrontHistogram> {
        match self.histograms.get(key)? {
            HistogramEntry::Wavefront(histogram) => Some(histogram),
            HistogramEntry::Plain(_) => None,
        }
    }

    /// Returns `true` if a counter, delta or not, exists under `key`.
    pub fn has_counter(&self, key: &str) -> bool {
        self.counters.contains(key)
    }

    /// Returns `true` if a gauge exists under `key`.
    pub fn has_gauge(&self, key: &str) -> bool {
        self.gauges.contains(key)
    }

    /// Returns `true` if a meter exists under `key`.
    pub fn has_meter(&self, key: &str) -> bool {
        self.meters.contains(key)
    }

    /// Returns `true` if a timer exists under `key`.
    pub fn has_timer(&self, key: &str) -> bool {
        self.timers.contains(key)
    }

    /// Returns `true` if a histogram, Wavefront or not, exists under `key`.
    pub fn has_histogram(&self, key: &str) -> bool {
        self.histograms.contains(key)
    }

    /// Removes the counter under `key`, returning `true` if it existed.
    pub fn remove_counter(&self, key: &str) -> bool {
        self.counters.remove(key)
    }

    /// Removes the gauge under `key`, returning `true` if it existed.
    pub fn remove_gauge(&self, key: &str) -> bool {
        self.gauges.remove(key)
    }

    /// Removes the meter under `key`, returning `true` if it existed.
    pub fn remove_meter(&self, key: &str) -> bool {
        self.meters.remove(key)
    }

    /// Removes the timer under `key`, returning `true` if it existed.
    pub fn remove_timer(&self, key: &str) -> bool {
        self.timers.remove(key)
    }

    /// Removes the histogram under `key`, returning `true` if it existed.
    pub fn remove_histogram(&self, key: &str) -> bool {
        self.histograms.remove(key)
    }

    /// Removes all metrics from the registry.
    ///
    /// This operation is eventually consistent: metrics are removed shard by shard, and this
    /// method does not ensure that callers will see the registry as entirely empty at any point.
    pub fn clear(&self) {
        self.counters.clear();
        self.gauges.clear();
        self.meters.clear();
        self.timers.clear();
        self.histograms.clear();
    }

    /// Gets every registered metric along with its key.
    ///
    /// The returned handles share state with the registered metrics: reading them reads the live
    /// values. A metric added while the snapshot is being taken may or may not be included.
    pub fn snapshot(&self) -> Vec<Entry> {
        let mut entries = Vec::new();
        let mut push = |key: &str, metric: Metric| {
            entries.push(Entry { key: key.to_string(), metric });
        };

        self.counters.visit(|key, entry| push(key, entry.clone().into_metric()));
        self.gauges.visit(|key, gauge| push(key, Metric::Gauge(gauge.clone())));
        self.meters.visit(|key, meter| push(key, Metric::Meter(meter.clone())));
        self.timers.visit(|key, timer| push(key, Metric::Timer(timer.clone())));
        self.histograms.visit(|key, entry| push(key, entry.clone().into_metric()));

        entries
    }

    /// Reads the current values of every registered metric, grouped by key.
    ///
    /// Metrics of different kinds registered under the same key have their fields merged.
    pub fn dump(&self) -> BTreeMap<String, BTreeMap<&'static str, f64>> {
        let mut dump: BTreeMap<String, BTreeMap<&'static str, f64>> = BTreeMap::new();
        for entry in self.snapshot() {
            dump.entry(entry.key).or_default().extend(entry.metric.values());
        }
        dump
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
