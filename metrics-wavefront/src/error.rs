use thiserror::Error;

use crate::MetricKind;

/// Errors that could occur while decoding a tag-encoded metric key.
///
/// Keys produced by [`encode_key`][crate::encode_key] always decode, so any of these errors points
/// at a key that was built by hand or corrupted.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The text after the tag separator was not a JSON object.
    #[error("malformed tags in metric key '{key}': {source}")]
    MalformedTags {
        /// The offending key.
        key: String,

        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A tag value was not a string, number or boolean.
    #[error("tag '{tag}' in metric key '{key}' has a non-scalar value")]
    InvalidTagValue {
        /// The offending key.
        key: String,

        /// The tag whose value could not be represented.
        tag: String,
    },
}

/// Errors that could occur while registering metrics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The metric name was empty.
    #[error("invalid metric name: {reason}")]
    InvalidArgument {
        /// Details about why the name was rejected.
        reason: String,
    },

    /// A metric of a different type is already registered under the same key.
    #[error("metric '{key}' is already registered as {existing}")]
    DuplicateRegistration {
        /// The encoded key that was already taken.
        key: String,

        /// The kind of the metric that already holds the key.
        existing: MetricKind,
    },
}
