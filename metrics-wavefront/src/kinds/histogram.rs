use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use sketches_ddsketch::{Config, DDSketch};

/// Quantiles reported for every histogram, as `(quantile, field name)`.
pub(crate) const QUANTILES: [(f64, &str); 5] = [
    (0.5, "50_percentile"),
    (0.75, "75_percentile"),
    (0.95, "95_percentile"),
    (0.99, "99_percentile"),
    (0.999, "999_percentile"),
];

struct State {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
    sketch: DDSketch,
}

impl State {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            m2: 0.0,
            sketch: DDSketch::new(Config::defaults()),
        }
    }

    fn add(&mut self, value: f64) {
        // A single NaN or infinity would poison every statistic from here on.
        if !value.is_finite() {
            return;
        }

        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        // Welford's online variance.
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);

        self.sketch.add(value);
    }
}

/// Point-in-time statistics of a [`Histogram`].
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of recorded values.
    pub count: u64,

    /// Sum of all recorded values.
    pub sum: f64,

    /// Smallest recorded value, or zero when empty.
    pub min: f64,

    /// Largest recorded value, or zero when empty.
    pub max: f64,

    /// Arithmetic mean of all recorded values, or zero when empty.
    pub mean: f64,

    /// Sample standard deviation, or zero with fewer than two values.
    pub std_dev: f64,

    quantiles: Vec<f64>,
}

impl HistogramSnapshot {
    /// Gets the estimated value at each reported quantile, paired with its field name.
    pub fn quantiles(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        QUANTILES.iter().zip(self.quantiles.iter()).map(|((_, field), value)| (*field, *value))
    }

    /// Gets the estimated value at the given reported quantile, if it is one of the reported ones.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        QUANTILES.iter().position(|(rq, _)| *rq == q).map(|i| self.quantiles[i])
    }
}

/// Tracks the distribution of recorded values.
///
/// Count, sum, extremes, mean and standard deviation are exact. Quantiles are estimated with a
/// [DDSketch](https://arxiv.org/abs/1908.10693), which provides relative-error guarantees.
#[derive(Clone)]
pub struct Histogram {
    inner: Arc<Mutex<State>>,
}

impl Histogram {
    /// Creates a new, empty `Histogram`.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(State::new())) }
    }

    /// Records a value.
    ///
    /// Non-finite values are ignored.
    pub fn add(&self, value: f64) -> &Self {
        self.inner.lock().add(value);
        self
    }

    /// Gets the number of recorded values.
    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    /// Discards all recorded values.
    pub fn clear(&self) {
        *self.inner.lock() = State::new();
    }

    /// Gets a consistent view of the histogram statistics.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.inner.lock();
        if state.count == 0 {
            return HistogramSnapshot {
                count: 0,
                sum: 0.0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std_dev: 0.0,
                quantiles: vec![0.0; QUANTILES.len()],
            };
        }

        let std_dev = if state.count > 1 {
            (state.m2 / (state.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        let quantiles = QUANTILES
            .iter()
            .map(|(q, _)| state.sketch.quantile(*q).ok().flatten().unwrap_or(0.0))
            .collect();

        HistogramSnapshot {
            count: state.count,
            sum: state.sum,
            min: state.min,
            max: state.max,
            mean: state.mean,
            std_dev,
            quantiles,
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Histogram {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram").field("count", &self.count()).finish()
    }
}
