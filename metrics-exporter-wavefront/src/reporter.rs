//! Periodic drain-and-translate reporting.
use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use metrics_wavefront::{
    decode_key, delta::delta_name, Metric, TaggedRegistry, Tags, WavefrontRecorder,
};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::{
    telemetry::{CycleStats, Telemetry, TELEMETRY_PREFIX},
    BuildError, Granularity, RuntimeCollector, WavefrontSender,
};

/// How points reach Wavefront.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportingMode {
    /// Through a Wavefront proxy.
    ///
    /// Every cycle stamps its metric points with the current time.
    Proxy,

    /// Straight to a Wavefront server.
    ///
    /// Metric points carry no timestamp unless one is given to
    /// [`report_now_at`][WavefrontReporter::report_now_at], and the sender is flushed after every
    /// cycle.
    Direct,
}

impl ReportingMode {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            ReportingMode::Proxy => "proxy",
            ReportingMode::Direct => "direct",
        }
    }
}

/// Static reporter configuration.
pub(crate) struct ReporterConfiguration {
    pub source: String,
    pub prefix: String,
    pub tags: Tags,
    pub granularities: Vec<Granularity>,
    pub mode: ReportingMode,
    pub interval: Duration,
}

pub(crate) struct ReporterState {
    pub registry: Arc<TaggedRegistry>,
    pub sender: Box<dyn WavefrontSender>,
    pub config: ReporterConfiguration,
    pub runtime: Option<RuntimeCollector>,
    pub telemetry: Option<Telemetry>,
}

impl ReporterState {
    /// Runs one reporting cycle.
    ///
    /// When `forced`, Wavefront histograms also hand out the minute that is still in progress.
    fn report(&mut self, timestamp: Option<u64>, forced: bool) {
        let timestamp = match self.config.mode {
            ReportingMode::Proxy => {
                Some(timestamp.unwrap_or_else(|| self.registry.clock().now_millis() / 1000))
            }
            ReportingMode::Direct => timestamp,
        };

        if let Some(runtime) = &self.runtime {
            runtime.collect(&self.registry);
        }

        let mut stats = CycleStats::default();
        drain(
            self.sender.as_mut(),
            &self.registry,
            &self.config.prefix,
            &self.config,
            timestamp,
            forced,
            &mut stats,
        );

        if let Some(telemetry) = &self.telemetry {
            telemetry.apply(&stats, self.sender.failure_count());

            // Telemetry about telemetry is not tracked.
            let mut own = CycleStats::default();
            drain(
                self.sender.as_mut(),
                telemetry.registry(),
                TELEMETRY_PREFIX,
                &self.config,
                timestamp,
                forced,
                &mut own,
            );
        }

        if self.config.mode == ReportingMode::Direct {
            if let Err(e) = self.sender.flush_now() {
                error!(error = %e, "Failed to flush points to Wavefront.");
            }
        }

        debug!(
            points = stats.points(),
            send_failures = stats.send_failures,
            decode_failures = stats.decode_failures,
            forced,
            "Finished reporting cycle."
        );
    }

    fn shutdown(&mut self) {
        self.report(None, true);
        if let Some(telemetry) = &self.telemetry {
            telemetry.clear();
        }
        self.sender.close();
    }
}

/// Sends every metric in `registry` through `sender`.
///
/// Failures are logged and counted, and never stop the drain.
fn drain(
    sender: &mut dyn WavefrontSender,
    registry: &TaggedRegistry,
    prefix: &str,
    config: &ReporterConfiguration,
    timestamp: Option<u64>,
    forced: bool,
    stats: &mut CycleStats,
) {
    let source = config.source.as_str();

    for entry in registry.snapshot() {
        let (name, decoded) = match decode_key(&entry.key) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Skipping metric with an undecodable key.");
                stats.decode_failures += 1;
                continue;
            }
        };

        let mut tags = config.tags.clone();
        tags.extend(decoded.unwrap_or_default());

        match entry.metric {
            Metric::WavefrontHistogram(histogram) => {
                let mut distributions = histogram.get_distribution();
                if forced {
                    distributions.extend(histogram.get_current_minute_distribution());
                }

                let name = format!("{prefix}{name}");
                for distribution in distributions {
                    let result = sender.send_distribution(
                        &name,
                        &distribution.centroids,
                        &config.granularities,
                        Some(distribution.timestamp / 1000),
                        source,
                        &tags,
                    );
                    match result {
                        Ok(()) => stats.distribution_points += 1,
                        Err(e) => {
                            warn!(error = %e, metric = %name, "Failed to send distribution.");
                            stats.send_failures += 1;
                        }
                    }
                }
            }
            Metric::DeltaCounter(delta) => {
                let value = delta.count();
                let name = delta_name(prefix, &name, "count");
                match sender.send_delta_counter(&name, value as f64, source, &tags) {
                    Ok(()) => {
                        // Increments made since the read stay in the counter.
                        delta.dec(value);
                        stats.delta_points += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, metric = %name, "Failed to send delta counter.");
                        stats.send_failures += 1;
                    }
                }
            }
            metric => {
                for (field, value) in metric.values() {
                    if !value.is_finite() {
                        trace!(metric = %name, field, "Skipping non-finite value.");
                        continue;
                    }

                    let name = format!("{prefix}{name}.{field}");
                    match sender.send_metric(&name, value, timestamp, source, &tags) {
                        Ok(()) => stats.metric_points += 1,
                        Err(e) => {
                            warn!(error = %e, metric = %name, "Failed to send metric.");
                            stats.send_failures += 1;
                        }
                    }
                }
            }
        }
    }
}

/// A running Wavefront reporter.
///
/// A background thread reports the registry at the configured interval. Call [`stop`] to shut the
/// reporter down: the schedule is stopped, one final cycle reports everything left (including the
/// current minute of Wavefront histograms), and the sender is closed. Dropping the reporter does the
/// same.
///
/// [`stop`]: WavefrontReporter::stop
pub struct WavefrontReporter {
    registry: Arc<TaggedRegistry>,
    state: Arc<Mutex<ReporterState>>,
    handle: Option<(Sender<()>, JoinHandle<()>)>,
}

impl WavefrontReporter {
    /// Spawns the reporting thread.
    pub(crate) fn start(state: ReporterState) -> Result<Self, BuildError> {
        let registry = Arc::clone(&state.registry);
        let interval = state.config.interval;
        let thread_name = format!("metrics-exporter-wavefront-{}", state.config.mode.as_str());
        let state = Arc::new(Mutex::new(state));

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_state = Arc::clone(&state);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut next_report = Instant::now() + interval;
                loop {
                    match shutdown_rx.recv_deadline(next_report) {
                        Err(RecvTimeoutError::Timeout) => {
                            // Schedule from the start of the cycle so that slow cycles do not drift.
                            next_report += interval;
                            thread_state.lock().report(None, false);

                            let now = Instant::now();
                            if next_report < now {
                                next_report = now + interval;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                trace!("Reporting thread stopped.");
            })
            .map_err(|e| BuildError::Backend {
                reason: format!("failed to spawn reporting thread: {e}"),
            })?;

        Ok(Self { registry, state, handle: Some((shutdown_tx, handle)) })
    }

    /// Gets the registry being reported.
    pub fn registry(&self) -> &Arc<TaggedRegistry> {
        &self.registry
    }

    /// Creates a [`metrics::Recorder`] that records into the reported registry.
    pub fn recorder(&self) -> WavefrontRecorder {
        WavefrontRecorder::new(Arc::clone(&self.registry))
    }

    /// Installs a recorder for the reported registry as the global recorder.
    ///
    /// # Errors
    ///
    /// If a global recorder is already installed, an error is returned.
    pub fn install_recorder(&self) -> Result<(), BuildError> {
        metrics::set_global_recorder(self.recorder()).map_err(|_| BuildError::FailedToInstall)
    }

    /// Runs a reporting cycle right away.
    ///
    /// In proxy mode, points are stamped with the current time; in direct mode they carry no
    /// timestamp.
    pub fn report_now(&self) {
        self.state.lock().report(None, false);
    }

    /// Runs a reporting cycle right away, stamping metric points with `timestamp`, in Unix seconds.
    pub fn report_now_at(&self, timestamp: u64) {
        self.state.lock().report(Some(timestamp), false);
    }

    /// Gets the number of failed deliveries reported by the sender.
    pub fn failure_count(&self) -> u64 {
        self.state.lock().sender.failure_count()
    }

    /// Stops the reporter.
    ///
    /// A cycle already in progress completes first. Then a final cycle runs, which also reports the
    /// current minute of Wavefront histograms, and the sender is closed.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some((shutdown_tx, handle)) = self.handle.take() else {
            return;
        };

        drop(shutdown_tx);
        if handle.join().is_err() {
            error!("Reporting thread panicked.");
        }

        self.state.lock().shutdown();
    }
}

impl Drop for WavefrontReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
