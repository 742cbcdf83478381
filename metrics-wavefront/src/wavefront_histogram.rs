//! Histograms reported as Wavefront distributions.
//!
//! A [`WavefrontHistogram`] does not summarize values into statistics. Instead, it keeps the
//! distinct values it sees, with their number of occurrences, in a bin for the wall-clock minute the
//! value was added in. Completed bins are handed out, and removed, by
//! [`WavefrontHistogram::get_distribution`], and shipped to Wavefront as-is so it can aggregate them
//! server-side.
//!
//! A bin holds at most [`MAX_CENTROIDS`] centroids. Past that, the two neighbouring centroids
//! closest in value are merged into their weighted mean, so counts are always exact while values
//! become approximate.
use std::{collections::BTreeMap, collections::VecDeque, fmt, sync::Arc};

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use crate::{encode_key, Metric, MetricKind, MillisClock, RegistryError, TaggedRegistry, Tags};

const MINUTE_MILLIS: u64 = 60_000;

/// Maximum number of centroids kept for a single minute.
pub const MAX_CENTROIDS: usize = 100;

/// A value and the number of times it was recorded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    /// The recorded value.
    pub value: f64,

    /// How many times it was recorded.
    pub count: u64,
}

/// The values recorded during one minute.
#[derive(Clone, Debug, PartialEq)]
pub struct Distribution {
    /// Start of the minute, as Unix time in milliseconds.
    pub timestamp: u64,

    /// Recorded values, sorted by value.
    pub centroids: Vec<Centroid>,
}

struct MinuteBin {
    minute: u64,
    centroids: BTreeMap<OrderedFloat<f64>, u64>,
}

impl MinuteBin {
    fn new(minute: u64) -> Self {
        Self { minute, centroids: BTreeMap::new() }
    }

    fn add(&mut self, value: f64) {
        self.insert(value, 1);
        if self.centroids.len() > MAX_CENTROIDS {
            self.merge_closest();
        }
    }

    fn insert(&mut self, value: f64, count: u64) {
        *self.centroids.entry(OrderedFloat(value)).or_default() += count;
    }

    fn merge_closest(&mut self) {
        let closest = self
            .centroids
            .iter()
            .zip(self.centroids.iter().skip(1))
            .map(|((a, a_count), (b, b_count))| (b.0 - a.0, (*a, *a_count), (*b, *b_count)))
            .min_by(|x, y| x.0.total_cmp(&y.0));

        if let Some((_, (a, a_count), (b, b_count))) = closest {
            self.centroids.remove(&a);
            self.centroids.remove(&b);

            let count = a_count + b_count;
            let mean = a.0 + (b.0 - a.0) * (b_count as f64 / count as f64);
            self.insert(mean, count);
        }
    }

    fn into_distribution(self) -> Distribution {
        let centroids = self
            .centroids
            .into_iter()
            .map(|(value, count)| Centroid { value: value.into_inner(), count })
            .collect();
        Distribution { timestamp: self.minute, centroids }
    }
}

/// A histogram that accumulates values into per-minute distributions.
///
/// Clones share the same bins.
#[derive(Clone)]
pub struct WavefrontHistogram {
    bins: Arc<Mutex<VecDeque<MinuteBin>>>,
    clock: MillisClock,
}

impl WavefrontHistogram {
    /// Creates a new, empty `WavefrontHistogram` whose bins follow the given clock.
    pub fn new(clock: MillisClock) -> Self {
        Self { bins: Arc::new(Mutex::new(VecDeque::new())), clock }
    }

    fn current_minute(&self) -> u64 {
        let now = self.clock.now_millis();
        now - now % MINUTE_MILLIS
    }

    /// Records `value` in the bin for the current minute.
    ///
    /// Non-finite values are ignored.
    pub fn add(&self, value: f64) -> &Self {
        if !value.is_finite() {
            return self;
        }

        let minute = self.current_minute();
        let mut bins = self.bins.lock();
        // A caller that read the clock before a concurrent one may arrive after it, so the bin
        // is not necessarily the last one.
        let idx = bins.partition_point(|bin| bin.minute < minute);
        if bins.get(idx).map_or(true, |bin| bin.minute != minute) {
            bins.insert(idx, MinuteBin::new(minute));
        }
        if let Some(bin) = bins.get_mut(idx) {
            bin.add(value);
        }
        self
    }

    /// Discards all recorded values.
    pub fn clear(&self) {
        self.bins.lock().clear();
    }

    /// Removes and returns the distributions of all completed minutes, oldest first.
    ///
    /// Values recorded during the current minute are kept.
    pub fn get_distribution(&self) -> Vec<Distribution> {
        let minute = self.current_minute();
        let mut bins = self.bins.lock();
        let completed = bins.partition_point(|bin| bin.minute < minute);
        bins.drain(..completed).map(MinuteBin::into_distribution).collect()
    }

    /// Removes and returns the distribution of the current, still open, minute.
    ///
    /// Returns `None` if nothing was recorded during the current minute.
    pub fn get_current_minute_distribution(&self) -> Option<Distribution> {
        let minute = self.current_minute();
        let mut bins = self.bins.lock();
        let idx = bins.iter().position(|bin| bin.minute == minute)?;
        bins.remove(idx).map(MinuteBin::into_distribution)
    }

    fn fold<T>(&self, init: T, mut f: impl FnMut(T, f64, u64) -> T) -> T {
        let bins = self.bins.lock();
        bins.iter()
            .flat_map(|bin| bin.centroids.iter())
            .fold(init, |acc, (value, count)| f(acc, value.0, *count))
    }

    /// Gets the number of values held.
    pub fn count(&self) -> u64 {
        self.fold(0, |acc, _, count| acc + count)
    }

    /// Gets the sum of the values held.
    pub fn sum(&self) -> f64 {
        self.fold(0.0, |acc, value, count| acc + value * count as f64)
    }

    /// Gets the smallest value held, or zero if there is none.
    pub fn min(&self) -> f64 {
        let min = self.fold(f64::INFINITY, |acc, value, _| acc.min(value));
        if min.is_finite() {
            min
        } else {
            0.0
        }
    }

    /// Gets the largest value held, or zero if there is none.
    pub fn max(&self) -> f64 {
        let max = self.fold(f64::NEG_INFINITY, |acc, value, _| acc.max(value));
        if max.is_finite() {
            max
        } else {
            0.0
        }
    }

    /// Gets the mean of the values held, or zero if there is none.
    pub fn mean(&self) -> f64 {
        let (count, sum) =
            self.fold((0u64, 0.0), |(n, s), value, count| (n + count, s + value * count as f64));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Gets the sample standard deviation of the values held, or zero with fewer than two values.
    pub fn std_dev(&self) -> f64 {
        let count = self.count();
        if count < 2 {
            return 0.0;
        }

        let mean = self.mean();
        let squares =
            self.fold(0.0, |acc, value, n| acc + (value - mean) * (value - mean) * n as f64);
        (squares / (count - 1) as f64).sqrt()
    }
}

impl PartialEq for WavefrontHistogram {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bins, &other.bins)
    }
}

impl fmt::Debug for WavefrontHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bins = self.bins.lock().len();
        f.debug_struct("WavefrontHistogram").field("bins", &bins).field("count", &self.count()).finish()
    }
}

/// Gets or registers the Wavefront histogram for `name` and `tags`.
///
/// # Errors
///
/// If `name` is empty, [`RegistryError::InvalidArgument`] is returned. If a plain histogram is
/// already registered under the same key, [`RegistryError::DuplicateRegistration`] is returned.
pub fn wavefront_histogram(
    registry: &TaggedRegistry,
    name: &str,
    tags: Option<&Tags>,
) -> Result<WavefrontHistogram, RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::InvalidArgument {
            reason: "histogram name must not be empty".to_string(),
        });
    }

    let key = encode_key(name, tags);
    let registry = registry.base();
    let histogram = WavefrontHistogram::new(registry.clock().clone());
    match registry.add(&key, Metric::WavefrontHistogram(histogram.clone())) {
        Ok(()) => Ok(histogram),
        Err(RegistryError::DuplicateRegistration {
            key,
            existing: MetricKind::WavefrontHistogram,
        }) => registry.get_wavefront_histogram(&key).ok_or(RegistryError::DuplicateRegistration {
            key,
            existing: MetricKind::WavefrontHistogram,
        }),
        Err(e) => Err(e),
    }
}

/// Gets the Wavefront histogram registered for `name` and `tags`, if there is one.
pub fn get_wavefront_histogram(
    registry: &TaggedRegistry,
    name: &str,
    tags: Option<&Tags>,
) -> Option<WavefrontHistogram> {
    registry.base().get_wavefront_histogram(&encode_key(name, tags))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quanta::Clock;

    use super::{
        get_wavefront_histogram, wavefront_histogram, Centroid, WavefrontHistogram, MAX_CENTROIDS,
    };
    use crate::{MillisClock, RegistryError, TaggedRegistry};

    // Thirty seconds into a minute.
    const START: u64 = 1_600_000_000_000 + 30_000 - (1_600_000_000_000 % 60_000);

    fn histogram() -> (WavefrontHistogram, std::sync::Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (WavefrontHistogram::new(MillisClock::from_parts(clock, START)), mock)
    }

    #[test]
    fn open_bin_is_not_drained() {
        let (histogram, _mock) = histogram();
        histogram.add(1.0).add(2.0);

        assert!(histogram.get_distribution().is_empty());
        assert_eq!(histogram.count(), 2);
    }

    #[test]
    fn completed_bins_are_drained_once() {
        let (histogram, mock) = histogram();
        histogram.add(5.0).add(1.0).add(5.0);
        mock.increment(Duration::from_secs(60));

        let distributions = histogram.get_distribution();
        assert_eq!(distributions.len(), 1);
        assert_eq!(distributions[0].timestamp, START - 30_000);
        assert_eq!(
            distributions[0].centroids,
            vec![Centroid { value: 1.0, count: 1 }, Centroid { value: 5.0, count: 2 }]
        );

        assert!(histogram.get_distribution().is_empty());
        assert_eq!(histogram.count(), 0);
    }

    #[test]
    fn values_bin_by_minute() {
        let (histogram, mock) = histogram();
        histogram.add(1.0);
        mock.increment(Duration::from_secs(60));
        histogram.add(2.0);

        let completed = histogram.get_distribution();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].centroids, vec![Centroid { value: 1.0, count: 1 }]);

        let current = histogram.get_current_minute_distribution().unwrap();
        assert_eq!(current.timestamp, START + 30_000);
        assert_eq!(current.centroids, vec![Centroid { value: 2.0, count: 1 }]);
        assert!(histogram.get_current_minute_distribution().is_none());
    }

    #[test]
    fn centroids_per_minute_are_bounded() {
        let (histogram, mock) = histogram();
        for i in 0..200_000u32 {
            histogram.add(f64::from(i));
        }
        assert_eq!(histogram.count(), 200_000);

        mock.increment(Duration::from_secs(60));
        let distributions = histogram.get_distribution();
        assert_eq!(distributions.len(), 1);

        let centroids = &distributions[0].centroids;
        assert!(centroids.len() <= MAX_CENTROIDS, "kept {} centroids", centroids.len());
        assert_eq!(centroids.iter().map(|c| c.count).sum::<u64>(), 200_000);
        assert!(centroids.windows(2).all(|pair| pair[0].value < pair[1].value));

        let sum: f64 = centroids.iter().map(|c| c.value * c.count as f64).sum();
        let exact = 199_999.0 * 200_000.0 / 2.0;
        assert!((sum - exact).abs() / exact < 1e-9);
    }

    #[test]
    fn repeated_values_share_a_centroid() {
        let (histogram, mock) = histogram();
        for i in 0..10_000u32 {
            histogram.add(f64::from(i % 10));
        }
        mock.increment(Duration::from_secs(60));

        let centroids = &histogram.get_distribution()[0].centroids;
        assert_eq!(centroids.len(), 10);
        assert!(centroids.iter().all(|c| c.count == 1_000));
    }

    #[test]
    fn aggregates() {
        let (histogram, _mock) = histogram();
        assert_eq!(histogram.min(), 0.0);
        assert_eq!(histogram.mean(), 0.0);
        assert_eq!(histogram.std_dev(), 0.0);

        histogram.add(2.0).add(4.0).add(4.0).add(4.0).add(5.0).add(5.0).add(7.0).add(9.0);
        assert_eq!(histogram.count(), 8);
        assert_eq!(histogram.sum(), 40.0);
        assert_eq!(histogram.min(), 2.0);
        assert_eq!(histogram.max(), 9.0);
        assert_eq!(histogram.mean(), 5.0);
        assert!((histogram.std_dev() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);

        histogram.add(f64::NAN);
        assert_eq!(histogram.count(), 8);

        histogram.clear();
        assert_eq!(histogram.count(), 0);
    }

    #[test]
    fn registration() {
        let registry = TaggedRegistry::new();
        assert!(get_wavefront_histogram(&registry, "latency", None).is_none());

        let first = wavefront_histogram(&registry, "latency", None).unwrap();
        let second = wavefront_histogram(&registry, "latency", None).unwrap();
        assert_eq!(first, second);
        assert_eq!(get_wavefront_histogram(&registry, "latency", None), Some(first));

        assert!(matches!(
            registry.histogram("latency", None),
            Err(RegistryError::DuplicateRegistration { .. })
        ));
        assert!(matches!(
            wavefront_histogram(&registry, "", None),
            Err(RegistryError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn plain_histogram_conflicts() {
        let registry = TaggedRegistry::new();
        registry.histogram("latency", None).unwrap().add(1.0);

        assert!(matches!(
            wavefront_histogram(&registry, "latency", None),
            Err(RegistryError::DuplicateRegistration { .. })
        ));
        assert!(get_wavefront_histogram(&registry, "latency", None).is_none());
    }
}
