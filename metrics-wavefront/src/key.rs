//! Encoding of metric names and tags into registry keys.
use std::collections::BTreeMap;

use serde_json::Value;

use crate::KeyError;

/// Separator placed between the metric name and its JSON-encoded tags.
///
/// Metric names must not contain this sequence themselves; it is not checked.
pub const TAGS_SEPARATOR: &str = "-tags=";

/// A set of point tags.
///
/// Tags are kept sorted by key, which makes their JSON encoding deterministic.
pub type Tags = BTreeMap<String, String>;

/// Encodes a metric name and optional tags into a single registry key.
///
/// Without tags, or with an empty tag set, the key is the name itself. Otherwise the key is
/// `<name>-tags=<json>`, where the JSON object has its keys sorted.
pub fn encode_key(name: &str, tags: Option<&Tags>) -> String {
    match tags {
        Some(tags) if !tags.is_empty() => {
            let mut key = String::with_capacity(name.len() + TAGS_SEPARATOR.len() + 16 * tags.len());
            key.push_str(name);
            key.push_str(TAGS_SEPARATOR);
            // Serializing a map of strings cannot fail.
            key.push_str(&serde_json::to_string(tags).unwrap_or_default());
            key
        }
        _ => name.to_string(),
    }
}

/// Decodes a registry key back into a metric name and its tags.
///
/// The key is split at the first occurrence of [`TAGS_SEPARATOR`]. Keys without the separator
/// decode to the key itself and no tags.
///
/// Numeric and boolean tag values are accepted and stored in their textual form.
///
/// # Errors
///
/// If the text after the separator is not a JSON object of scalar values, an error is returned.
pub fn decode_key(key: &str) -> Result<(String, Option<Tags>), KeyError> {
    let Some((name, encoded)) = key.split_once(TAGS_SEPARATOR) else {
        return Ok((key.to_string(), None));
    };

    let raw: BTreeMap<String, Value> = serde_json::from_str(encoded)
        .map_err(|source| KeyError::MalformedTags { key: key.to_string(), source })?;

    let mut tags = Tags::new();
    for (tag, value) in raw {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => {
                return Err(KeyError::InvalidTagValue { key: key.to_string(), tag })
            }
        };
        tags.insert(tag, value);
    }

    Ok((name.to_string(), Some(tags)))
}
