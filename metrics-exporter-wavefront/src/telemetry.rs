use metrics_wavefront::{Counter, Gauge, MillisClock, TaggedRegistry, Tags};

/// Prefix of every telemetry metric name.
pub const TELEMETRY_PREFIX: &str = "~sdk.rust.wavefront.";

/// Outcome counts of a single reporting cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub metric_points: u64,
    pub delta_points: u64,
    pub distribution_points: u64,
    pub send_failures: u64,
    pub decode_failures: u64,
}

impl CycleStats {
    pub fn points(&self) -> u64 {
        self.metric_points + self.delta_points + self.distribution_points
    }
}

/// Reporter telemetry.
///
/// `Telemetry` keeps counters about the reporter's own behavior in a private registry, which the
/// reporter drains after the application metrics using [`TELEMETRY_PREFIX`].
pub struct Telemetry {
    registry: TaggedRegistry,
    cycles: Counter,
    metric_points: Counter,
    delta_points: Counter,
    distribution_points: Counter,
    send_failures: Counter,
    decode_failures: Counter,
    sender_failures: Gauge,
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl Telemetry {
    /// Creates a `Telemetry` instance for a reporter of the given mode.
    pub fn new(mode: &'static str, clock: MillisClock) -> Self {
        let registry = TaggedRegistry::with_clock(clock);
        let base = tags(&[("reporter_mode", mode)]);
        let metric = tags(&[("reporter_mode", mode), ("point_type", "metric")]);
        let delta = tags(&[("reporter_mode", mode), ("point_type", "delta_counter")]);
        let distribution = tags(&[("reporter_mode", mode), ("point_type", "distribution")]);

        Self {
            cycles: registry.counter("reporter.cycles", Some(&base)),
            metric_points: registry.counter("points.sent", Some(&metric)),
            delta_points: registry.counter("points.sent", Some(&delta)),
            distribution_points: registry.counter("points.sent", Some(&distribution)),
            send_failures: registry.counter("points.failed", Some(&base)),
            decode_failures: registry.counter("keys.invalid", Some(&base)),
            sender_failures: registry.gauge("sender.failures", Some(&base)),
            registry,
        }
    }

    /// Gets the registry holding the telemetry metrics.
    pub fn registry(&self) -> &TaggedRegistry {
        &self.registry
    }

    /// Applies the outcome of a reporting cycle.
    pub fn apply(&self, stats: &CycleStats, sender_failures: u64) {
        self.cycles.inc(1);
        self.metric_points.inc(stats.metric_points as i64);
        self.delta_points.inc(stats.delta_points as i64);
        self.distribution_points.inc(stats.distribution_points as i64);
        self.send_failures.inc(stats.send_failures as i64);
        self.decode_failures.inc(stats.decode_failures as i64);
        self.sender_failures.set(sender_failures as f64);
    }

    /// Removes every telemetry metric.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use metrics_wavefront::{encode_key, MillisClock};

    use super::{CycleStats, Telemetry};

    #[test]
    fn apply_accumulates() {
        let telemetry = Telemetry::new("proxy", MillisClock::new());
        let stats = CycleStats { metric_points: 3, delta_points: 1, send_failures: 2, ..Default::default() };
        telemetry.apply(&stats, 2);
        telemetry.apply(&stats, 5);

        let dump = telemetry.registry().dump();
        let cycles = encode_key("reporter.cycles", Some(&super::tags(&[("reporter_mode", "proxy")])));
        assert_eq!(dump[&cycles]["count"], 2.0);

        let failures = encode_key("points.failed", Some(&super::tags(&[("reporter_mode", "proxy")])));
        assert_eq!(dump[&failures]["count"], 4.0);

        let metric_points = encode_key(
            "points.sent",
            Some(&super::tags(&[("reporter_mode", "proxy"), ("point_type", "metric")])),
        );
        assert_eq!(dump[&metric_points]["count"], 6.0);

        let sender = encode_key("sender.failures", Some(&super::tags(&[("reporter_mode", "proxy")])));
        assert_eq!(dump[&sender]["value"], 5.0);
        assert_eq!(stats.points(), 4);

        telemetry.clear();
        assert!(telemetry.registry().dump().is_empty());
    }
}
