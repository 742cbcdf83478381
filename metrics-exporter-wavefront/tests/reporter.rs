use std::{sync::Arc, thread, time::Duration};

use metrics_exporter_wavefront::{
    Granularity, ReportingMode, SendError, WavefrontBuilder, WavefrontSender, TELEMETRY_PREFIX,
};
use metrics_wavefront::{
    delta_counter, wavefront_histogram, Centroid, MillisClock, TaggedRegistry, Tags,
};
use mockall::{mock, predicate::eq};
use parking_lot::Mutex;
use quanta::Clock;

// 2020-09-13T12:26:30Z, thirty seconds before a minute boundary.
const START_MILLIS: u64 = 1_600_000_000_000 - 10_000;
const LONG_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq)]
enum Sent {
    Metric { name: String, value: f64, timestamp: Option<u64>, tags: Tags },
    Delta { name: String, value: f64, tags: Tags },
    Distribution {
        name: String,
        centroids: Vec<Centroid>,
        granularities: Vec<Granularity>,
        timestamp: Option<u64>,
    },
}

#[derive(Clone, Default)]
struct RecordingSender {
    sent: Arc<Mutex<Vec<Sent>>>,
    flushes: Arc<Mutex<usize>>,
    closed: Arc<Mutex<bool>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl RecordingSender {
    fn fail_on(&self, name: &str) {
        self.failing.lock().push(name.to_string());
    }

    fn check(&self, name: &str) -> Result<(), SendError> {
        if *self.closed.lock() {
            return Err(SendError::Closed);
        }
        if self.failing.lock().iter().any(|failing| failing == name) {
            return Err(SendError::Http { reason: "connection refused".to_string() });
        }
        Ok(())
    }

    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl WavefrontSender for RecordingSender {
    fn send_metric(
        &mut self,
        name: &str,
        value: f64,
        timestamp: Option<u64>,
        _source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        self.check(name)?;
        self.sent.lock().push(Sent::Metric {
            name: name.to_string(),
            value,
            timestamp,
            tags: tags.clone(),
        });
        Ok(())
    }

    fn send_delta_counter(
        &mut self,
        name: &str,
        value: f64,
        _source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        self.check(name)?;
        self.sent.lock().push(Sent::Delta { name: name.to_string(), value, tags: tags.clone() });
        Ok(())
    }

    fn send_distribution(
        &mut self,
        name: &str,
        centroids: &[Centroid],
        granularities: &[Granularity],
        timestamp: Option<u64>,
        _source: &str,
        _tags: &Tags,
    ) -> Result<(), SendError> {
        self.check(name)?;
        self.sent.lock().push(Sent::Distribution {
            name: name.to_string(),
            centroids: centroids.to_vec(),
            granularities: granularities.to_vec(),
            timestamp,
        });
        Ok(())
    }

    fn flush_now(&mut self) -> Result<(), SendError> {
        *self.flushes.lock() += 1;
        Ok(())
    }

    fn close(&mut self) {
        *self.closed.lock() = true;
    }

    fn failure_count(&self) -> u64 {
        0
    }
}

mock! {
    Sender {}

    impl WavefrontSender for Sender {
        fn send_metric(
            &mut self,
            name: &str,
            value: f64,
            timestamp: Option<u64>,
            source: &str,
            tags: &Tags,
        ) -> Result<(), SendError>;
        fn send_delta_counter(
            &mut self,
            name: &str,
            value: f64,
            source: &str,
            tags: &Tags,
        ) -> Result<(), SendError>;
        fn send_distribution(
            &mut self,
            name: &str,
            centroids: &[Centroid],
            granularities: &[Granularity],
            timestamp: Option<u64>,
            source: &str,
            tags: &Tags,
        ) -> Result<(), SendError>;
        fn flush_now(&mut self) -> Result<(), SendError>;
        fn close(&mut self);
        fn failure_count(&self) -> u64;
    }
}

fn mock_registry() -> (Arc<TaggedRegistry>, Arc<quanta::Mock>) {
    let (clock, mock) = Clock::mock();
    let registry = TaggedRegistry::with_clock(MillisClock::from_parts(clock, START_MILLIS));
    (Arc::new(registry), mock)
}

fn builder(registry: &Arc<TaggedRegistry>) -> WavefrontBuilder {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    WavefrontBuilder::default()
        .with_registry(Arc::clone(registry))
        .with_reporting_interval(LONG_INTERVAL)
        .with_telemetry(false)
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn plain_and_delta_counters_end_to_end() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = builder(&registry)
        .with_prefix("p.")
        .build_with_sender(sender.clone(), ReportingMode::Direct)
        .unwrap();

    let foo_count = registry.counter("foo_count", None);
    foo_count.inc(1);
    foo_count.inc(1);
    reporter.report_now();

    assert_eq!(
        sender.take(),
        vec![Sent::Metric {
            name: "p.foo_count.count".to_string(),
            value: 2.0,
            timestamp: None,
            tags: Tags::new(),
        }]
    );

    let foo_delta = delta_counter(&registry, "foo_delta", None).unwrap();
    foo_delta.inc(1);
    foo_delta.inc(1);
    reporter.report_now();

    let sent = sender.take();
    assert!(sent.contains(&Sent::Delta {
        name: "\u{2206}p.foo_delta.count".to_string(),
        value: 2.0,
        tags: Tags::new(),
    }));
    assert_eq!(foo_delta.count(), 0);
    assert_eq!(*sender.flushes.lock(), 2);

    reporter.stop();
}

#[test]
fn proxy_mode_stamps_points() {
    let (registry, mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = builder(&registry)
        .with_prefix("")
        .build_with_sender(sender.clone(), ReportingMode::Proxy)
        .unwrap();

    registry.gauge("queue.depth", None).set(7.0);
    mock.increment(Duration::from_secs(5));
    reporter.report_now();
    reporter.report_now_at(1_234);

    let sent = sender.take();
    assert_eq!(
        sent,
        vec![
            Sent::Metric {
                name: "queue.depth.value".to_string(),
                value: 7.0,
                timestamp: Some(START_MILLIS / 1000 + 5),
                tags: Tags::new(),
            },
            Sent::Metric {
                name: "queue.depth.value".to_string(),
                value: 7.0,
                timestamp: Some(1_234),
                tags: Tags::new(),
            },
        ]
    );

    // Proxy senders write as they go.
    assert_eq!(*sender.flushes.lock(), 0);
    reporter.stop();
}

#[test]
fn static_tags_are_merged_under_metric_tags() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = builder(&registry)
        .with_prefix("")
        .with_tag("env", "prod")
        .with_tag("region", "us-west")
        .build_with_sender(sender.clone(), ReportingMode::Direct)
        .unwrap();

    registry.counter("requests", Some(&tags(&[("region", "eu-central")]))).inc(3);
    reporter.report_now();

    assert_eq!(
        sender.take(),
        vec![Sent::Metric {
            name: "requests.count".to_string(),
            value: 3.0,
            timestamp: None,
            tags: tags(&[("env", "prod"), ("region", "eu-central")]),
        }]
    );
    reporter.stop();
}

#[test]
fn delta_increments_racing_a_report_are_kept() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter =
        builder(&registry).build_with_sender(sender.clone(), ReportingMode::Direct).unwrap();

    let delta = delta_counter(&registry, "events", None).unwrap();
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let delta = delta.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    delta.inc(1);
                }
            })
        })
        .collect();

    for _ in 0..10 {
        reporter.report_now();
    }
    for writer in writers {
        writer.join().unwrap();
    }
    reporter.report_now();

    let reported: f64 = sender
        .take()
        .into_iter()
        .filter_map(|sent| match sent {
            Sent::Delta { value, .. } => Some(value),
            _ => None,
        })
        .sum();
    assert_eq!(reported, 4_000.0);
    assert_eq!(delta.count(), 0);
}

#[test]
fn increment_during_delta_send_is_carried_over() {
    let (registry, _mock) = mock_registry();
    let uploads = delta_counter(&registry, "uploads", None).unwrap();
    uploads.inc(5);

    let racing = uploads.clone();
    let mut sender = MockSender::new();
    sender
        .expect_send_delta_counter()
        .with(eq("\u{2206}uploads.count"), eq(5.0), eq("wavefront-rust"), eq(Tags::new()))
        .times(1)
        .returning(move |_, _, _, _| {
            racing.inc(7);
            Ok(())
        });
    sender
        .expect_send_delta_counter()
        .with(eq("\u{2206}uploads.count"), eq(7.0), eq("wavefront-rust"), eq(Tags::new()))
        .times(1)
        .returning(|_, _, _, _| Ok(()));
    sender.expect_flush_now().returning(|| Ok(()));
    sender.expect_failure_count().return_const(0u64);
    sender.expect_close().times(1).return_const(());

    let reporter = builder(&registry)
        .with_prefix("")
        .build_with_sender(sender, ReportingMode::Direct)
        .unwrap();

    // Only the value that was sent is subtracted.
    reporter.report_now();
    assert_eq!(uploads.count(), 7);

    reporter.stop();
    assert_eq!(uploads.count(), 0);
}

#[test]
fn failed_sends_do_not_stop_the_cycle() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    sender.fail_on("a.count");
    sender.fail_on("\u{2206}b.count");
    let reporter = builder(&registry)
        .with_prefix("")
        .build_with_sender(sender.clone(), ReportingMode::Direct)
        .unwrap();

    registry.counter("a", None).inc(1);
    let b = delta_counter(&registry, "b", None).unwrap();
    b.inc(5);
    registry.counter("c", None).inc(2);
    reporter.report_now();

    assert_eq!(
        sender.take(),
        vec![Sent::Metric {
            name: "c.count".to_string(),
            value: 2.0,
            timestamp: None,
            tags: Tags::new(),
        }]
    );

    // Unsent deltas are carried over to the next cycle.
    assert_eq!(b.count(), 5);
    reporter.stop();
}

#[test]
fn delta_is_not_decremented_when_send_fails() {
    let (registry, _mock) = mock_registry();

    let mut sender = MockSender::new();
    sender
        .expect_send_delta_counter()
        .with(eq("\u{2206}retries.count"), eq(3.0), eq("wavefront-rust"), eq(Tags::new()))
        .times(2)
        .returning(|_, _, _, _| Err(SendError::Timeout));
    sender.expect_flush_now().returning(|| Ok(()));
    sender.expect_failure_count().return_const(2u64);
    sender.expect_close().times(1).return_const(());

    let reporter = builder(&registry)
        .with_prefix("")
        .build_with_sender(sender, ReportingMode::Direct)
        .unwrap();

    let retries = delta_counter(&registry, "retries", None).unwrap();
    retries.inc(3);
    reporter.report_now();
    assert_eq!(retries.count(), 3);
    assert_eq!(reporter.failure_count(), 2);

    // The final cycle on stop tries again.
    reporter.stop();
    assert_eq!(retries.count(), 3);
}

#[test]
fn wavefront_histograms_report_completed_minutes() {
    let (registry, mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = builder(&registry)
        .with_prefix("")
        .report_minute_distribution()
        .report_hour_distribution()
        .build_with_sender(sender.clone(), ReportingMode::Proxy)
        .unwrap();

    let latency = wavefront_histogram(&registry, "latency", None).unwrap();
    latency.add(1.0).add(1.0).add(5.0);

    // Nothing is handed out while the minute is open.
    reporter.report_now();
    assert!(sender.take().is_empty());

    mock.increment(Duration::from_secs(60));
    reporter.report_now();
    assert_eq!(
        sender.take(),
        vec![Sent::Distribution {
            name: "latency".to_string(),
            centroids: vec![Centroid { value: 1.0, count: 2 }, Centroid { value: 5.0, count: 1 }],
            granularities: vec![Granularity::Minute, Granularity::Hour],
            timestamp: Some(1_599_999_960),
        }]
    );

    reporter.report_now();
    assert!(sender.take().is_empty());
    reporter.stop();
}

#[test]
fn stop_reports_the_open_minute_and_closes() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = builder(&registry)
        .with_prefix("")
        .report_minute_distribution()
        .build_with_sender(sender.clone(), ReportingMode::Proxy)
        .unwrap();

    let latency = wavefront_histogram(&registry, "latency", None).unwrap();
    latency.add(2.5);
    reporter.stop();

    assert_eq!(
        sender.take(),
        vec![Sent::Distribution {
            name: "latency".to_string(),
            centroids: vec![Centroid { value: 2.5, count: 1 }],
            granularities: vec![Granularity::Minute],
            timestamp: Some(1_599_999_960),
        }]
    );
    assert!(*sender.closed.lock());
    assert_eq!(latency.count(), 0);
}

#[test]
fn dropping_the_reporter_stops_it() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = builder(&registry)
        .with_prefix("")
        .build_with_sender(sender.clone(), ReportingMode::Direct)
        .unwrap();

    let pending = delta_counter(&registry, "pending", None).unwrap();
    pending.inc(4);
    drop(reporter);

    assert_eq!(
        sender.take(),
        vec![Sent::Delta { name: "\u{2206}pending.count".to_string(), value: 4.0, tags: Tags::new() }]
    );
    assert!(*sender.closed.lock());
}

#[test]
fn scheduled_cycles_run_in_the_background() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = WavefrontBuilder::default()
        .with_registry(Arc::clone(&registry))
        .with_reporting_interval(Duration::from_millis(20))
        .with_telemetry(false)
        .with_prefix("")
        .build_with_sender(sender.clone(), ReportingMode::Direct)
        .unwrap();

    registry.counter("ticks", None).inc(1);
    thread::sleep(Duration::from_millis(200));
    reporter.stop();

    let cycles = sender
        .take()
        .into_iter()
        .filter(|sent| matches!(sent, Sent::Metric { name, .. } if name == "ticks.count"))
        .count();
    // Scheduled cycles plus the final one.
    assert!(cycles >= 2, "only {cycles} cycles ran");
}

#[test]
fn telemetry_is_reported_under_its_own_prefix() {
    let (registry, _mock) = mock_registry();
    let sender = RecordingSender::default();
    let reporter = builder(&registry)
        .with_prefix("app.")
        .with_telemetry(true)
        .build_with_sender(sender.clone(), ReportingMode::Direct)
        .unwrap();

    registry.counter("requests", None).inc(1);
    reporter.report_now();

    let sent = sender.take();
    let names: Vec<_> = sent
        .iter()
        .filter_map(|sent| match sent {
            Sent::Metric { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert!(names.contains(&"app.requests.count"));
    assert!(names.iter().any(|name| name.starts_with(TELEMETRY_PREFIX)));
    assert!(!names.iter().any(|name| name.starts_with("app.") && name.contains("reporter.cycles")));

    let cycles = format!("{TELEMETRY_PREFIX}reporter.cycles.count");
    assert!(sent.iter().any(|sent| matches!(
        sent,
        Sent::Metric { name, value, tags, .. }
            if *name == cycles && *value == 1.0 && tags["reporter_mode"] == "direct"
    )));

    reporter.stop();
}
