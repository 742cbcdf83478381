use std::sync::Arc;

use metrics::{CounterFn, GaugeFn, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use tracing::warn;

use crate::{
    delta::{delta_counter, has_delta_prefix},
    get_wavefront_histogram, Counter, Gauge, Histogram, TaggedRegistry, Tags, WavefrontHistogram,
};

/// A [`Recorder`] that stores metrics in a [`TaggedRegistry`].
///
/// Metric labels become tags. Counters whose name starts with a delta marker are registered as
/// delta counters. Histograms are recorded into the Wavefront histogram registered under the same
/// name and tags if there is one, and into a plain histogram otherwise.
#[derive(Clone, Default)]
pub struct WavefrontRecorder {
    registry: Arc<TaggedRegistry>,
}

impl WavefrontRecorder {
    /// Creates a new `WavefrontRecorder` backed by the given registry.
    pub fn new(registry: Arc<TaggedRegistry>) -> Self {
        Self { registry }
    }

    /// Gets the registry metrics are recorded into.
    pub fn registry(&self) -> &Arc<TaggedRegistry> {
        &self.registry
    }
}

fn key_tags(key: &Key) -> Tags {
    key.labels().map(|label| (label.key().to_string(), label.value().to_string())).collect()
}

impl Recorder for WavefrontRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics::Counter {
        let tags = key_tags(key);
        let name = key.name();
        if has_delta_prefix(name) {
            return match delta_counter(&self.registry, name, Some(&tags)) {
                Ok(delta) => metrics::Counter::from_arc(Arc::new(delta.counter().clone())),
                Err(error) => {
                    warn!(%error, metric = name, "Failed to register delta counter.");
                    metrics::Counter::noop()
                }
            };
        }

        metrics::Counter::from_arc(Arc::new(self.registry.counter(name, Some(&tags))))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics::Gauge {
        let gauge = self.registry.gauge(key.name(), Some(&key_tags(key)));
        metrics::Gauge::from_arc(Arc::new(gauge))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics::Histogram {
        let tags = key_tags(key);
        let name = key.name();
        if let Some(histogram) = get_wavefront_histogram(&self.registry, name, Some(&tags)) {
            return metrics::Histogram::from_arc(Arc::new(histogram));
        }

        match self.registry.histogram(name, Some(&tags)) {
            Ok(histogram) => metrics::Histogram::from_arc(Arc::new(histogram)),
            Err(error) => {
                warn!(%error, metric = name, "Failed to register histogram.");
                metrics::Histogram::noop()
            }
        }
    }
}

impl CounterFn for Counter {
    fn increment(&self, value: u64) {
        self.inc(value as i64);
    }

    fn absolute(&self, value: u64) {
        self.set(value as i64);
    }
}

impl GaugeFn for Gauge {
    fn increment(&self, value: f64) {
        Gauge::increment(self, value);
    }

    fn decrement(&self, value: f64) {
        Gauge::decrement(self, value);
    }

    fn set(&self, value: f64) {
        Gauge::set(self, value);
    }
}

impl HistogramFn for Histogram {
    fn record(&self, value: f64) {
        self.add(value);
    }
}

impl HistogramFn for WavefrontHistogram {
    fn record(&self, value: f64) {
        self.add(value);
    }
}
