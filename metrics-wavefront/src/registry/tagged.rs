use std::collections::BTreeMap;

use super::Registry;
use crate::{
    encode_key, Counter, Entry, Gauge, Histogram, Meter, MillisClock, RegistryError, Tags, Timer,
};

/// A [`Registry`] addressed by metric name and optional tags.
///
/// Every accessor encodes its `name` and `tags` with [`encode_key`] and forwards to the underlying
/// registry. Two calls with equal tag sets reach the same metric regardless of how the sets were
/// built, and `None` is equivalent to an empty tag set.
#[derive(Default)]
pub struct TaggedRegistry {
    registry: Registry,
}

impl TaggedRegistry {
    /// Creates a new, empty `TaggedRegistry` using the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty `TaggedRegistry` whose time-dependent metrics use the given clock.
    pub fn with_clock(clock: MillisClock) -> Self {
        Self { registry: Registry::with_clock(clock) }
    }

    /// Gets the underlying key-addressed registry.
    pub fn base(&self) -> &Registry {
        &self.registry
    }

    /// Returns the clock used by time-dependent metrics.
    pub fn clock(&self) -> &MillisClock {
        self.registry.clock()
    }

    /// Gets or creates a counter.
    pub fn counter(&self, name: &str, tags: Option<&Tags>) -> Counter {
        self.registry.counter(&encode_key(name, tags))
    }

    /// Gets or creates a gauge.
    pub fn gauge(&self, name: &str, tags: Option<&Tags>) -> Gauge {
        self.registry.gauge(&encode_key(name, tags))
    }

    /// Gets or creates a gauge whose value is computed by `f` each time it is read.
    pub fn gauge_fn<F>(&self, name: &str, tags: Option<&Tags>, f: F) -> Gauge
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.registry.gauge_fn(&encode_key(name, tags), f)
    }

    /// Gets or creates a meter.
    pub fn meter(&self, name: &str, tags: Option<&Tags>) -> Meter {
        self.registry.meter(&encode_key(name, tags))
    }

    /// Gets or creates a timer.
    pub fn timer(&self, name: &str, tags: Option<&Tags>) -> Timer {
        self.registry.timer(&encode_key(name, tags))
    }

    /// Gets or creates a histogram.
    ///
    /// # Errors
    ///
    /// If a Wavefront histogram is registered with the same name and tags, an error is returned.
    pub fn histogram(&self, name: &str, tags: Option<&Tags>) -> Result<Histogram, RegistryError> {
        self.registry.histogram(&encode_key(name, tags))
    }

    /// Returns `true` if a counter exists.
    pub fn has_counter(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.has_counter(&encode_key(name, tags))
    }

    /// Returns `true` if a gauge exists.
    pub fn has_gauge(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.has_gauge(&encode_key(name, tags))
    }

    /// Returns `true` if a meter exists.
    pub fn has_meter(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.has_meter(&encode_key(name, tags))
    }

    /// Returns `true` if a timer exists.
    pub fn has_timer(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.has_timer(&encode_key(name, tags))
    }

    /// Returns `true` if a histogram exists.
    pub fn has_histogram(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.has_histogram(&encode_key(name, tags))
    }

    /// Removes a counter, returning `true` if it existed.
    pub fn remove_counter(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.remove_counter(&encode_key(name, tags))
    }

    /// Removes a gauge, returning `true` if it existed.
    pub fn remove_gauge(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.remove_gauge(&encode_key(name, tags))
    }

    /// Removes a meter, returning `true` if it existed.
    pub fn remove_meter(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.remove_meter(&encode_key(name, tags))
    }

    /// Removes a timer, returning `true` if it existed.
    pub fn remove_timer(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.remove_timer(&encode_key(name, tags))
    }

    /// Removes a histogram, returning `true` if it existed.
    pub fn remove_histogram(&self, name: &str, tags: Option<&Tags>) -> bool {
        self.registry.remove_histogram(&encode_key(name, tags))
    }

    /// Gets every registered metric along with its encoded key.
    ///
    /// See [`Registry::snapshot`].
    pub fn snapshot(&self) -> Vec<Entry> {
        self.registry.snapshot()
    }

    /// Reads the current values of every registered metric, grouped by encoded key.
    pub fn dump(&self) -> BTreeMap<String, BTreeMap<&'static str, f64>> {
        self.registry.dump()
    }

    /// Removes all metrics.
    pub fn clear(&self) {
        self.registry.clear()
    }
}
