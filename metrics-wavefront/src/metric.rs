use std::fmt;

use crate::{
    kinds::{HistogramSnapshot, MeterSnapshot},
    Counter, DeltaCounter, Gauge, Histogram, Meter, Timer, WavefrontHistogram,
};

/// The kind of a registered metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A cumulative counter.
    Counter,

    /// A counter reset after every report.
    DeltaCounter,

    /// A point-in-time value.
    Gauge,

    /// A rate meter.
    Meter,

    /// A duration histogram combined with a rate meter.
    Timer,

    /// A histogram summarized by statistics and quantiles.
    Histogram,

    /// A histogram reported as per-minute distributions.
    WavefrontHistogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "a counter",
            MetricKind::DeltaCounter => "a delta counter",
            MetricKind::Gauge => "a gauge",
            MetricKind::Meter => "a meter",
            MetricKind::Timer => "a timer",
            MetricKind::Histogram => "a histogram",
            MetricKind::WavefrontHistogram => "a Wavefront histogram",
        };
        f.write_str(s)
    }
}

/// A registered metric, classified by how it is reported.
#[derive(Clone, Debug, PartialEq)]
pub enum Metric {
    /// A cumulative counter, reported as its current count.
    PlainCounter(Counter),

    /// A delta counter, reported as its count and then decremented by the reported value.
    DeltaCounter(DeltaCounter),

    /// A gauge.
    Gauge(Gauge),

    /// A meter.
    Meter(Meter),

    /// A timer.
    Timer(Timer),

    /// A Wavefront histogram, reported as distributions.
    WavefrontHistogram(WavefrontHistogram),

    /// A histogram, reported as statistics and quantiles.
    PlainHistogram(Histogram),
}

impl Metric {
    /// Gets the kind of this metric.
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::PlainCounter(_) => MetricKind::Counter,
            Metric::DeltaCounter(_) => MetricKind::DeltaCounter,
            Metric::Gauge(_) => MetricKind::Gauge,
            Metric::Meter(_) => MetricKind::Meter,
            Metric::Timer(_) => MetricKind::Timer,
            Metric::WavefrontHistogram(_) => MetricKind::WavefrontHistogram,
            Metric::PlainHistogram(_) => MetricKind::Histogram,
        }
    }

    /// Reads the current values of this metric as `(field, value)` pairs.
    ///
    /// Reading does not modify the metric; in particular, Wavefront histogram bins are not drained.
    pub fn values(&self) -> Vec<(&'static str, f64)> {
        match self {
            Metric::PlainCounter(counter) => vec![("count", counter.count() as f64)],
            Metric::DeltaCounter(delta) => vec![("count", delta.count() as f64)],
            Metric::Gauge(gauge) => vec![("value", gauge.value())],
            Metric::Meter(meter) => meter_values(&meter.snapshot()),
            Metric::Timer(timer) => {
                let mut values = meter_values(&timer.meter_snapshot());
                values.extend(histogram_values(&timer.histogram_snapshot()).into_iter().skip(1));
                values
            }
            Metric::PlainHistogram(histogram) => histogram_values(&histogram.snapshot()),
            Metric::WavefrontHistogram(histogram) => vec![
                ("count", histogram.count() as f64),
                ("sum", histogram.sum()),
                ("avg", histogram.mean()),
                ("min", histogram.min()),
                ("max", histogram.max()),
                ("std_dev", histogram.std_dev()),
            ],
        }
    }
}

fn meter_values(snapshot: &MeterSnapshot) -> Vec<(&'static str, f64)> {
    vec![
        ("count", snapshot.count as f64),
        ("mean_rate", snapshot.mean_rate),
        ("m1_rate", snapshot.m1_rate),
        ("m5_rate", snapshot.m5_rate),
        ("m15_rate", snapshot.m15_rate),
    ]
}

// `count` always comes first.
fn histogram_values(snapshot: &HistogramSnapshot) -> Vec<(&'static str, f64)> {
    let mut values = vec![
        ("count", snapshot.count as f64),
        ("sum", snapshot.sum),
        ("avg", snapshot.mean),
        ("min", snapshot.min),
        ("max", snapshot.max),
        ("std_dev", snapshot.std_dev),
    ];
    values.extend(snapshot.quantiles());
    values
}

/// A metric along with the encoded key it is registered under.
#[derive(Clone, Debug)]
pub struct Entry {
    /// The encoded key, see [`encode_key`][crate::encode_key].
    pub key: String,

    /// The metric.
    pub metric: Metric,
}
