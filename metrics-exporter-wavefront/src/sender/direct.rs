use std::time::Duration;

use http_body_util::{BodyExt, Collected, Full};
use hyper::{
    body::Bytes,
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method, Request, Uri,
};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};
use metrics_wavefront::{Centroid, Tags};
use tokio::runtime::Runtime;
use tracing::{debug, error};

use super::{Granularity, SendError, WavefrontSender};
use crate::{formatting::LineWriter, BuildError};

/// Direct ingestion sender configuration.
#[derive(Clone, Debug)]
pub struct DirectConfiguration {
    /// Base URL of the Wavefront server.
    pub server: Uri,

    /// API token sent as a bearer token.
    pub token: String,

    /// Number of buffered lines, per format, that triggers an immediate flush.
    pub batch_size: usize,

    /// Timeout for each report request.
    pub request_timeout: Duration,
}

/// Parses and validates the base URL of a Wavefront server.
///
/// # Errors
///
/// If `server` is not a URL with both a scheme and an authority, an error is returned.
pub(crate) fn parse_server_url(server: &str) -> Result<Uri, BuildError> {
    let invalid = |reason: String| BuildError::InvalidConfiguration { reason };

    let uri: Uri = server.parse().map_err(|e| invalid(format!("invalid server url '{server}': {e}")))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(invalid(format!("invalid server url '{server}': scheme and host are required")));
    }
    Ok(uri)
}

#[derive(Clone, Copy)]
enum Format {
    Wavefront,
    Histogram,
}

impl Format {
    const fn as_str(self) -> &'static str {
        match self {
            Format::Wavefront => "wavefront",
            Format::Histogram => "histogram",
        }
    }
}

/// Sends points straight to a Wavefront server over HTTP(S).
///
/// Points are buffered and posted in batches, either when [`flush_now`][WavefrontSender::flush_now]
/// is called or when a buffer reaches the configured batch size. Requests run on a private
/// single-threaded runtime, so this sender can be driven from plain threads.
pub struct DirectSender {
    runtime: Runtime,
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    metrics_endpoint: Uri,
    histograms_endpoint: Uri,
    authorization: String,
    batch_size: usize,
    request_timeout: Duration,
    metrics: LineWriter,
    histograms: LineWriter,
    failures: u64,
    closed: bool,
}

impl DirectSender {
    /// Creates a new `DirectSender`.
    ///
    /// # Errors
    ///
    /// If the runtime cannot be created, or no native root certificates can be loaded, an error is
    /// returned.
    pub fn new(config: DirectConfiguration) -> Result<Self, BuildError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BuildError::Backend { reason: format!("failed to create runtime: {e}") })?;

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| BuildError::Backend {
                reason: format!("no native root CA certificates found: {e}"),
            })?
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_timer(TokioTimer::new())
            .build(https);

        let base = config.server.to_string();
        let base = base.trim_end_matches('/');
        let endpoint = |format: Format| {
            format!("{base}/report?f={}", format.as_str()).parse::<Uri>().map_err(|e| {
                BuildError::InvalidConfiguration { reason: format!("invalid report url: {e}") }
            })
        };

        Ok(Self {
            metrics_endpoint: endpoint(Format::Wavefront)?,
            histograms_endpoint: endpoint(Format::Histogram)?,
            runtime,
            client,
            authorization: format!("Bearer {}", config.token),
            batch_size: config.batch_size.max(1),
            request_timeout: config.request_timeout,
            metrics: LineWriter::new(),
            histograms: LineWriter::new(),
            failures: 0,
            closed: false,
        })
    }

    fn flush_format(&mut self, format: Format) -> Result<(), SendError> {
        let (writer, endpoint) = match format {
            Format::Wavefront => (&mut self.metrics, &self.metrics_endpoint),
            Format::Histogram => (&mut self.histograms, &self.histograms_endpoint),
        };
        if writer.is_empty() {
            return Ok(());
        }

        let lines = writer.lines();
        let body = writer.take();
        debug!(lines, format = format.as_str(), "Posting batch to Wavefront.");

        let request = Request::builder()
            .method(Method::POST)
            .uri(endpoint.clone())
            .header(AUTHORIZATION, self.authorization.as_str())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Full::from(body))
            .map_err(|e| SendError::Http { reason: e.to_string() })?;

        let result = self.runtime.block_on(post(&self.client, request, self.request_timeout));
        if let Err(e) = &result {
            self.failures += 1;
            error!(error = %e, lines, format = format.as_str(), "Failed to post batch to Wavefront.");
        }
        result
    }

    fn flush_if_full(&mut self, format: Format) -> Result<(), SendError> {
        let lines = match format {
            Format::Wavefront => self.metrics.lines(),
            Format::Histogram => self.histograms.lines(),
        };
        if lines >= self.batch_size {
            self.flush_format(format)
        } else {
            Ok(())
        }
    }
}

async fn post(
    client: &Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request: Request<Full<Bytes>>,
    timeout: Duration,
) -> Result<(), SendError> {
    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| SendError::Timeout)?
        .map_err(|e| SendError::Http { reason: e.to_string() })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map(Collected::to_bytes)
        .map_err(|_| ())
        .and_then(|b| String::from_utf8(b[..].to_vec()).map_err(|_| ()))
        .unwrap_or_else(|()| String::from("<failed to read response body>"));
    Err(SendError::Status { status: status.as_u16(), body })
}

impl WavefrontSender for DirectSender {
    fn send_metric(
        &mut self,
        name: &str,
        value: f64,
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        self.metrics.write_metric(name, value, timestamp, source, tags)?;
        self.flush_if_full(Format::Wavefront)
    }

    fn send_delta_counter(
        &mut self,
        name: &str,
        value: f64,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        self.send_metric(name, value, None, source, tags)
    }

    fn send_distribution(
        &mut self,
        name: &str,
        centroids: &[Centroid],
        granularities: &[Granularity],
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        self.histograms.write_distribution(name, centroids, granularities, timestamp, source, tags)?;
        self.flush_if_full(Format::Histogram)
    }

    fn flush_now(&mut self) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        let metrics = self.flush_format(Format::Wavefront);
        let histograms = self.flush_format(Format::Histogram);
        metrics.and(histograms)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }

        // Failures are already logged and counted by the flush itself.
        let _ = self.flush_now();
        self.closed = true;
    }

    fn failure_count(&self) -> u64 {
        self.failures
    }
}
