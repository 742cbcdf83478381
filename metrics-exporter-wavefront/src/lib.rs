//! A reporter that periodically ships a [`TaggedRegistry`] to [Wavefront][wf].
//!
//! [wf]: https://docs.wavefront.com/wavefront_data_format.html
//! [`TaggedRegistry`]: metrics_wavefront::TaggedRegistry
//!
//! # Usage
//!
//! ```no_run
//! # use std::time::Duration;
//! # use metrics_exporter_wavefront::WavefrontBuilder;
//! # use metrics_wavefront::delta_counter;
//! // Report through a local Wavefront proxy every 30 seconds.
//! let reporter = WavefrontBuilder::default()
//!     .with_proxy_host("localhost")
//!     .with_source("my-app")
//!     .with_tag("env", "production")
//!     .with_reporting_interval(Duration::from_secs(30))
//!     .report_minute_distribution()
//!     .build_proxy()
//!     .expect("failed to build reporter");
//!
//! let requests = reporter.registry().counter("requests", None);
//! requests.inc(1);
//!
//! let errors = delta_counter(reporter.registry(), "errors", None).expect("valid name");
//! errors.inc(1);
//!
//! // Reports everything that is left, including the current minute of Wavefront histograms.
//! reporter.stop();
//! ```
//!
//! Reporting straight to a Wavefront server needs a server URL and an API token instead:
//!
//! ```no_run
//! # use metrics_exporter_wavefront::WavefrontBuilder;
//! let reporter = WavefrontBuilder::default()
//!     .with_server("https://example.wavefront.com")
//!     .expect("invalid server url")
//!     .with_token("api-token")
//!     .build_direct()
//!     .expect("failed to build reporter");
//!
//! // Metrics recorded through the `metrics` macros land in the same registry.
//! reporter.install_recorder().expect("failed to install recorder");
//! metrics::counter!("logins", "provider" => "github").increment(1);
//! ```
//!
//! # Reporting cycle
//!
//! Every cycle takes a snapshot of the registry and translates each entry into Wavefront points:
//!
//! - counters, gauges, meters, timers and plain histograms become one metric point per field, named
//!   `<prefix><name>.<field>`
//! - delta counters become a single delta point named `∆<prefix><name>.count`, and the counter is
//!   decremented by exactly the value that was sent
//! - Wavefront histograms hand out every completed minute as a distribution, sent once per
//!   configured granularity
//!
//! Tags set on the builder are attached to every point, and a metric's own tags win over them. A
//! metric that fails to send is logged and counted, and the cycle moves on to the next one.
//!
//! In proxy mode, metric points are stamped with the time of the cycle. In direct mode, they carry
//! no timestamp and the server assigns one on ingestion.
//!
//! # Telemetry
//!
//! Unless disabled, the reporter tracks its own cycles, points sent per type, and failures, and
//! reports them under the [`TELEMETRY_PREFIX`] namespace.
//!
//! # Runtime metrics
//!
//! When enabled, process metrics such as CPU time, resident memory, page faults and context
//! switches are collected into gauges before every cycle. See [`RuntimeCollector`].

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, WavefrontBuilder};

mod formatting;

pub mod reporter;
pub use self::reporter::{ReportingMode, WavefrontReporter};

mod runtime;
pub use self::runtime::RuntimeCollector;

mod sender;
pub use self::sender::{
    DirectConfiguration, DirectSender, Granularity, ProxyConfiguration, ProxySender, SendError,
    WavefrontSender,
};

mod telemetry;
pub use self::telemetry::TELEMETRY_PREFIX;
