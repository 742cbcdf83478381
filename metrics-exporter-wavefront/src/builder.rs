use std::{net::ToSocketAddrs as _, sync::Arc, time::Duration};

use hyper::Uri;
use metrics_wavefront::{TaggedRegistry, Tags};
use thiserror::Error;

use crate::{
    reporter::{ReporterConfiguration, ReporterState},
    sender::parse_server_url,
    telemetry::Telemetry,
    DirectConfiguration, DirectSender, Granularity, ProxyConfiguration, ProxySender,
    ReportingMode, RuntimeCollector, WavefrontReporter, WavefrontSender,
};

const DEFAULT_SOURCE: &str = "wavefront-rust";
const DEFAULT_PROXY_HOST: &str = "localhost";
const DEFAULT_PROXY_PORT: u16 = 2878;
const DEFAULT_PROXY_PREFIX: &str = "proxy.";
const DEFAULT_DIRECT_PREFIX: &str = "direct.";
const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_BATCH_SIZE: usize = 10_000;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that could occur while building a Wavefront reporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configuration is incomplete or invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid setting.
        reason: String,
    },

    /// Failed to resolve the proxy address.
    #[error("invalid proxy address: {reason}")]
    InvalidProxyAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// Failed to set up the reporting backend.
    #[error("failed to set up reporter backend: {reason}")]
    Backend {
        /// Details about the failure.
        reason: String,
    },

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install recorder as global recorder")]
    FailedToInstall,
}

/// Builder for a Wavefront reporter.
///
/// The same builder can produce a reporter that sends through a Wavefront proxy
/// ([`build_proxy`][Self::build_proxy]) or straight to a Wavefront server
/// ([`build_direct`][Self::build_direct]).
pub struct WavefrontBuilder {
    registry: Option<Arc<TaggedRegistry>>,
    proxy_host: String,
    metrics_port: u16,
    distribution_port: u16,
    server: Option<Uri>,
    token: Option<String>,
    source: String,
    prefix: Option<String>,
    tags: Tags,
    reporting_interval: Duration,
    batch_size: usize,
    write_timeout: Duration,
    request_timeout: Duration,
    granularities: Vec<Granularity>,
    telemetry: bool,
    runtime_metrics: bool,
}

impl WavefrontBuilder {
    /// Sets the registry to report.
    ///
    /// Defaults to a new, empty registry, available through [`WavefrontReporter::registry`].
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TaggedRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the host name of the Wavefront proxy.
    ///
    /// Defaults to `localhost`.
    #[must_use]
    pub fn with_proxy_host<H: Into<String>>(mut self, host: H) -> Self {
        self.proxy_host = host.into();
        self
    }

    /// Sets the proxy port that metric points are sent to.
    ///
    /// Defaults to 2878.
    #[must_use]
    pub fn with_metrics_port(mut self, port: u16) -> Self {
        self.metrics_port = port;
        self
    }

    /// Sets the proxy port that distributions are sent to.
    ///
    /// Defaults to 2878.
    #[must_use]
    pub fn with_distribution_port(mut self, port: u16) -> Self {
        self.distribution_port = port;
        self
    }

    /// Sets the URL of the Wavefront server for direct ingestion, such as
    /// `https://<instance>.wavefront.com`.
    ///
    /// # Errors
    ///
    /// If the URL lacks a scheme or a host, an error is returned.
    pub fn with_server<S: AsRef<str>>(mut self, server: S) -> Result<Self, BuildError> {
        self.server = Some(parse_server_url(server.as_ref())?);
        Ok(self)
    }

    /// Sets the API token used for direct ingestion.
    #[must_use]
    pub fn with_token<T: Into<String>>(mut self, token: T) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the source attached to every point.
    ///
    /// Defaults to `wavefront-rust`.
    #[must_use]
    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the prefix prepended to every metric name.
    ///
    /// Defaults to `proxy.` for proxy reporters and `direct.` for direct reporters.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Adds a tag to every point.
    ///
    /// Tags of a metric take precedence over these when both have the same key.
    #[must_use]
    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds tags to every point.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Sets the interval between reporting cycles.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_reporting_interval(mut self, interval: Duration) -> Self {
        self.reporting_interval = interval;
        self
    }

    /// Sets how many lines the direct sender buffers, per format, before posting them.
    ///
    /// Defaults to 10,000.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the timeout for connecting and writing to the proxy.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the timeout of each direct ingestion request.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn add_granularity(mut self, granularity: Granularity) -> Self {
        if !self.granularities.contains(&granularity) {
            self.granularities.push(granularity);
        }
        self
    }

    /// Reports Wavefront histograms with per-minute aggregation.
    #[must_use]
    pub fn report_minute_distribution(self) -> Self {
        self.add_granularity(Granularity::Minute)
    }

    /// Reports Wavefront histograms with per-hour aggregation.
    #[must_use]
    pub fn report_hour_distribution(self) -> Self {
        self.add_granularity(Granularity::Hour)
    }

    /// Reports Wavefront histograms with per-day aggregation.
    #[must_use]
    pub fn report_day_distribution(self) -> Self {
        self.add_granularity(Granularity::Day)
    }

    /// Sets whether or not to report telemetry about the reporter itself.
    ///
    /// Telemetry metrics are named under `~sdk.rust.wavefront.` and count reporting cycles, points
    /// sent per type, and failures.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Sets whether or not to collect process runtime metrics before every cycle.
    ///
    /// See [`RuntimeCollector`] for the metrics collected.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_runtime_metrics(mut self, runtime_metrics: bool) -> Self {
        self.runtime_metrics = runtime_metrics;
        self
    }

    /// Builds a reporter that sends through a Wavefront proxy.
    ///
    /// # Errors
    ///
    /// If the proxy address cannot be resolved, or the reporting thread cannot be spawned, an error
    /// is returned.
    pub fn build_proxy(self) -> Result<WavefrontReporter, BuildError> {
        let resolve = |port: u16| {
            let addrs: Vec<_> = (self.proxy_host.as_str(), port)
                .to_socket_addrs()
                .map_err(|e| BuildError::InvalidProxyAddress {
                    reason: format!("{}:{port}: {e}", self.proxy_host),
                })?
                .collect();
            if addrs.is_empty() {
                return Err(BuildError::InvalidProxyAddress {
                    reason: format!("{}:{port} did not resolve to any address", self.proxy_host),
                });
            }
            Ok(addrs)
        };

        let config = ProxyConfiguration {
            metrics_addrs: resolve(self.metrics_port)?,
            distribution_addrs: resolve(self.distribution_port)?,
            write_timeout: self.write_timeout,
        };
        self.build_with_sender(ProxySender::new(config), ReportingMode::Proxy)
    }

    /// Builds a reporter that sends straight to a Wavefront server.
    ///
    /// # Errors
    ///
    /// If the server or the token was not set, the HTTP client cannot be set up, or the reporting
    /// thread cannot be spawned, an error is returned.
    pub fn build_direct(mut self) -> Result<WavefrontReporter, BuildError> {
        let server = self.server.take().ok_or_else(|| BuildError::InvalidConfiguration {
            reason: "a server url is required for direct ingestion".to_string(),
        })?;
        let token = match self.token.take() {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(BuildError::InvalidConfiguration {
                    reason: "an API token is required for direct ingestion".to_string(),
                })
            }
        };

        let config = DirectConfiguration {
            server,
            token,
            batch_size: self.batch_size,
            request_timeout: self.request_timeout,
        };
        let sender = DirectSender::new(config)?;
        self.build_with_sender(sender, ReportingMode::Direct)
    }

    /// Builds a reporter that uses the given sender.
    ///
    /// `mode` selects the timestamp and flushing behavior, and the default prefix.
    ///
    /// # Errors
    ///
    /// If the reporting interval is zero, or the reporting thread cannot be spawned, an error is
    /// returned.
    pub fn build_with_sender<S>(self, sender: S, mode: ReportingMode) -> Result<WavefrontReporter, BuildError>
    where
        S: WavefrontSender + 'static,
    {
        if self.reporting_interval.is_zero() {
            return Err(BuildError::InvalidConfiguration {
                reason: "reporting interval must be greater than zero".to_string(),
            });
        }

        let registry = self.registry.unwrap_or_default();
        let prefix = self.prefix.unwrap_or_else(|| {
            match mode {
                ReportingMode::Proxy => DEFAULT_PROXY_PREFIX,
                ReportingMode::Direct => DEFAULT_DIRECT_PREFIX,
            }
            .to_string()
        });
        let runtime = self.runtime_metrics.then(RuntimeCollector::new);
        let telemetry =
            self.telemetry.then(|| Telemetry::new(mode.as_str(), registry.clock().clone()));

        let state = ReporterState {
            registry,
            sender: Box::new(sender),
            config: ReporterConfiguration {
                source: self.source,
                prefix,
                tags: self.tags,
                granularities: self.granularities,
                mode,
                interval: self.reporting_interval,
            },
            runtime,
            telemetry,
        };

        WavefrontReporter::start(state)
    }
}

impl Default for WavefrontBuilder {
    fn default() -> Self {
        WavefrontBuilder {
            registry: None,
            proxy_host: DEFAULT_PROXY_HOST.to_string(),
            metrics_port: DEFAULT_PROXY_PORT,
            distribution_port: DEFAULT_PROXY_PORT,
            server: None,
            token: None,
            source: DEFAULT_SOURCE.to_string(),
            prefix: None,
            tags: Tags::new(),
            reporting_interval: DEFAULT_REPORTING_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            granularities: Vec::new(),
            telemetry: true,
            runtime_metrics: false,
        }
    }
}
