//! Delta counters.
//!
//! A delta counter reports how much it changed since the previous report instead of its cumulative
//! value. Wavefront recognizes them by a leading `∆` (U+2206) in the metric name; `Δ` (U+0394) is
//! accepted as well since the two are easily confused.
//!
//! After each report, the reporter decrements the counter by exactly the value it emitted. Any
//! increment that lands between reading and decrementing is left in the counter and emitted on the
//! next report, so no increment is lost or counted twice.
use std::ops::Deref;

use crate::{encode_key, Counter, Metric, MetricKind, Registry, RegistryError, TaggedRegistry, Tags};

/// Marker prepended to delta counter names.
pub const DELTA_PREFIX: char = '\u{2206}';

/// Alternative marker accepted as a delta counter prefix.
pub const ALT_DELTA_PREFIX: char = '\u{0394}';

/// A counter whose count is reset, by subtraction, every time it is reported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaCounter {
    counter: Counter,
}

impl DeltaCounter {
    /// Creates a new `DeltaCounter` with a count of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the underlying counter.
    pub fn counter(&self) -> &Counter {
        &self.counter
    }
}

impl Deref for DeltaCounter {
    type Target = Counter;

    fn deref(&self) -> &Counter {
        &self.counter
    }
}

/// Returns `true` if `name` starts with a delta counter marker.
pub fn has_delta_prefix(name: &str) -> bool {
    name.starts_with(DELTA_PREFIX) || name.starts_with(ALT_DELTA_PREFIX)
}

/// Gets or registers the delta counter for `name` and `tags`.
///
/// The delta marker is prepended to `name` unless it already carries one. Calling this repeatedly
/// with the same arguments returns the same counter.
///
/// # Errors
///
/// If `name` is empty, [`RegistryError::InvalidArgument`] is returned. If a plain counter is
/// already registered under the resulting key, [`RegistryError::DuplicateRegistration`] is returned.
pub fn delta_counter(
    registry: &TaggedRegistry,
    name: &str,
    tags: Option<&Tags>,
) -> Result<DeltaCounter, RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::InvalidArgument {
            reason: "delta counter name must not be empty".to_string(),
        });
    }

    let key = if has_delta_prefix(name) {
        encode_key(name, tags)
    } else {
        encode_key(&format!("{DELTA_PREFIX}{name}"), tags)
    };

    let registry = registry.base();
    let delta = DeltaCounter::new();
    match registry.add(&key, Metric::DeltaCounter(delta.clone())) {
        Ok(()) => Ok(delta),
        Err(RegistryError::DuplicateRegistration { key, existing: MetricKind::DeltaCounter }) => {
            // Removed between `add` and here: surface the original conflict.
            registry.get_delta_counter(&key).ok_or(RegistryError::DuplicateRegistration {
                key,
                existing: MetricKind::DeltaCounter,
            })
        }
        Err(e) => Err(e),
    }
}

/// Returns `true` if the counter registered under the encoded `key` is a delta counter.
pub fn is_delta_counter(key: &str, registry: &Registry) -> bool {
    registry.get_delta_counter(key).is_some()
}

/// Builds the reported name of a delta counter field.
///
/// `name` is the decoded name of a registered delta counter, which starts with its marker. The
/// marker is moved in front of the prefix: `("app.", "∆requests", "count")` gives
/// `∆app.requests.count`.
pub fn delta_name(prefix: &str, name: &str, suffix: &str) -> String {
    let mut chars = name.chars();
    chars.next();
    format!("{DELTA_PREFIX}{prefix}{}.{suffix}", chars.as_str())
}
