//! Transports that deliver points to Wavefront.
use std::io;

use metrics_wavefront::{Centroid, Tags};
use thiserror::Error;

mod direct;
pub(crate) use self::direct::parse_server_url;
pub use self::direct::{DirectConfiguration, DirectSender};

mod proxy;
pub use self::proxy::{ProxyConfiguration, ProxySender};

/// Errors that could occur while sending points.
#[derive(Debug, Error)]
pub enum SendError {
    /// The point could not be represented in the Wavefront data format.
    #[error("invalid point: {reason}")]
    InvalidPoint {
        /// Details about why the point was rejected.
        reason: String,
    },

    /// Writing to the proxy failed.
    #[error("failed to write to proxy: {0}")]
    Io(#[from] io::Error),

    /// The HTTP request to the Wavefront server could not be completed.
    #[error("request to Wavefront server failed: {reason}")]
    Http {
        /// Details about the failure.
        reason: String,
    },

    /// The Wavefront server answered with a non-success status.
    #[error("Wavefront server responded with status {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,

        /// The response body, if it could be read.
        body: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request to Wavefront server timed out")]
    Timeout,

    /// The sender was already closed.
    #[error("sender is closed")]
    Closed,
}

/// Time span that a distribution is aggregated over by Wavefront.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    /// Per-minute aggregation.
    Minute,

    /// Per-hour aggregation.
    Hour,

    /// Per-day aggregation.
    Day,
}

impl Granularity {
    /// Returns the line prefix for this granularity.
    pub const fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "!M",
            Granularity::Hour => "!H",
            Granularity::Day => "!D",
        }
    }
}

/// A client able to deliver points to Wavefront.
///
/// Timestamps are Unix time in seconds. A sender may buffer points until [`flush_now`] is called.
///
/// [`flush_now`]: WavefrontSender::flush_now
pub trait WavefrontSender: Send {
    /// Sends a single metric point.
    fn send_metric(
        &mut self,
        name: &str,
        value: f64,
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError>;

    /// Sends a delta counter point.
    ///
    /// `name` must already carry the delta marker. Delta points never carry a timestamp.
    fn send_delta_counter(
        &mut self,
        name: &str,
        value: f64,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError>;

    /// Sends a distribution, once per granularity.
    fn send_distribution(
        &mut self,
        name: &str,
        centroids: &[Centroid],
        granularities: &[Granularity],
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError>;

    /// Delivers any buffered points.
    fn flush_now(&mut self) -> Result<(), SendError>;

    /// Delivers any buffered points and releases the connection.
    ///
    /// Sends after closing fail with [`SendError::Closed`].
    fn close(&mut self);

    /// Gets the number of points or batches that failed to be delivered so far.
    fn failure_count(&self) -> u64;
}

impl<S: WavefrontSender + ?Sized> WavefrontSender for Box<S> {
    fn send_metric(
        &mut self,
        name: &str,
        value: f64,
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        (**self).send_metric(name, value, timestamp, source, tags)
    }

    fn send_delta_counter(
        &mut self,
        name: &str,
        value: f64,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        (**self).send_delta_counter(name, value, source, tags)
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
        (**self).send_distribution(name, centroids, granularities, timestamp, source, tags)
    }

    fn flush_now(&mut self) -> Result<(), SendError> {
        (**self).flush_now()
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn failure_count(&self) -> u64 {
        (**self).failure_count()
    }
}
