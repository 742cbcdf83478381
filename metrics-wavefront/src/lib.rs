//! A tag-aware metrics registry for reporting to [Wavefront][wf].
//!
//! [wf]: https://docs.wavefront.com/wavefront_data_format.html
//!
//! # Overview
//!
//! [`TaggedRegistry`] stores counters, gauges, meters, timers and histograms keyed by a metric name
//! and an optional set of tags. The name and tags are folded into a single string key (see
//! [`encode_key`]) so that two identical tag sets always resolve to the same metric, no matter what
//! order the tags were inserted in, while two different tag sets never collide.
//!
//! ```
//! # use metrics_wavefront::{Tags, TaggedRegistry};
//! let registry = TaggedRegistry::new();
//!
//! let mut tags = Tags::new();
//! tags.insert("region".to_string(), "us-west".to_string());
//!
//! let requests = registry.counter("requests", Some(&tags));
//! requests.inc(1);
//!
//! assert!(registry.has_counter("requests", Some(&tags)));
//! assert!(!registry.has_counter("requests", None));
//! ```
//!
//! # Delta counters
//!
//! A [`DeltaCounter`] reports the change since the last report rather than a cumulative value. The
//! reporter resets it after each successful emission by subtracting exactly the value it sent, so
//! increments that race a report are carried into the next one. See [`delta_counter`].
//!
//! # Wavefront histograms
//!
//! A [`WavefrontHistogram`] buckets values into minute-wide bins and hands out completed bins as
//! [`Distribution`]s, each made of `(value, count)` [`Centroid`]s. See [`wavefront_histogram`].
//!
//! # Using the `metrics` facade
//!
//! [`WavefrontRecorder`] implements [`metrics::Recorder`] on top of a [`TaggedRegistry`], mapping
//! labels to tags, so the `counter!`/`gauge!`/`histogram!` macros feed the same registry.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod clock;
pub use self::clock::MillisClock;

pub mod delta;
pub use self::delta::{delta_counter, is_delta_counter, DeltaCounter};

mod error;
pub use self::error::{KeyError, RegistryError};

mod key;
pub use self::key::{decode_key, encode_key, Tags, TAGS_SEPARATOR};

pub mod kinds;
pub use self::kinds::{Counter, Gauge, Histogram, Meter, Timer, TimerContext};

mod metric;
pub use self::metric::{Entry, Metric, MetricKind};

mod recorder;
pub use self::recorder::WavefrontRecorder;

pub mod registry;
pub use self::registry::{Registry, TaggedRegistry};

pub mod wavefront_histogram;
pub use self::wavefront_histogram::{
    get_wavefront_histogram, wavefront_histogram, Centroid, Distribution, WavefrontHistogram,
};
