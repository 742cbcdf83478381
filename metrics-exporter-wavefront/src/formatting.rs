//! Wavefront data format.
//!
//! Metric points are written as:
//!
//! ```text
//! "<name>" <value> [<timestamp>] source="<source>" ["<tag key>"="<tag value>" ...]
//! ```
//!
//! and distributions, once per granularity, as:
//!
//! ```text
//! !M [<timestamp>] #<count> <value> [#<count> <value> ...] "<name>" source="<source>" [...]
//! ```
//!
//! Timestamps are Unix time in seconds.
use metrics_wavefront::{Centroid, Tags};

use crate::{Granularity, SendError};

/// Formats numbers without allocating.
struct ValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl ValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format_u64(&mut self, value: u64) -> &str {
        self.int_writer.format(value)
    }

    // Integral values are written without a fractional part.
    fn format_f64(&mut self, value: f64) -> &str {
        const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

        if value.fract() == 0.0 && value.abs() < MAX_EXACT_INT {
            self.int_writer.format(value as i64)
        } else {
            self.float_writer.format(value)
        }
    }
}

/// Accumulates newline-terminated lines in the Wavefront data format.
pub(crate) struct LineWriter {
    buf: String,
    lines: usize,
    values: ValueFormatter,
}

impl LineWriter {
    pub fn new() -> Self {
        Self { buf: String::new(), lines: 0, values: ValueFormatter::new() }
    }

    /// Returns the number of lines written since the last clear.
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.lines = 0;
    }

    /// Takes the buffered lines, leaving the writer empty.
    pub fn take(&mut self) -> String {
        self.lines = 0;
        std::mem::take(&mut self.buf)
    }

    /// Writes a single metric point.
    ///
    /// # Errors
    ///
    /// If the name or source is empty, a tag has an empty key or value, or the value is not finite,
    /// an error is returned and nothing is written.
    pub fn write_metric(
        &mut self,
        name: &str,
        value: f64,
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        validate(name, source, tags)?;
        if !value.is_finite() {
            return Err(invalid(format!("metric '{name}' has a non-finite value")));
        }

        write_name(&mut self.buf, name);
        self.buf.push(' ');
        self.buf.push_str(self.values.format_f64(value));
        if let Some(timestamp) = timestamp {
            self.buf.push(' ');
            self.buf.push_str(self.values.format_u64(timestamp));
        }
        write_source_and_tags(&mut self.buf, source, tags);
        self.buf.push('\n');
        self.lines += 1;

        Ok(())
    }

    /// Writes a distribution, one line per granularity.
    ///
    /// Nothing is written when `granularities` or `centroids` is empty.
    ///
    /// # Errors
    ///
    /// If the name or source is empty, a tag has an empty key or value, or a centroid value is not
    /// finite, an error is returned and nothing is written.
    pub fn write_distribution(
        &mut self,
        name: &str,
        centroids: &[Centroid],
        granularities: &[Granularity],
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        validate(name, source, tags)?;
        if centroids.iter().any(|centroid| !centroid.value.is_finite()) {
            return Err(invalid(format!("distribution '{name}' has a non-finite centroid")));
        }
        if centroids.is_empty() {
            return Ok(());
        }

        for granularity in granularities {
            self.buf.push_str(granularity.as_str());
            if let Some(timestamp) = timestamp {
                self.buf.push(' ');
                self.buf.push_str(self.values.format_u64(timestamp));
            }
            for centroid in centroids {
                self.buf.push_str(" #");
                self.buf.push_str(self.values.format_u64(centroid.count));
                self.buf.push(' ');
                self.buf.push_str(self.values.format_f64(centroid.value));
            }
            self.buf.push(' ');
            write_name(&mut self.buf, name);
            write_source_and_tags(&mut self.buf, source, tags);
            self.buf.push('\n');
            self.lines += 1;
        }

        Ok(())
    }
}

fn invalid(reason: String) -> SendError {
    SendError::InvalidPoint { reason }
}

fn validate(name: &str, source: &str, tags: &Tags) -> Result<(), SendError> {
    if name.is_empty() {
        return Err(invalid("metric name must not be empty".to_string()));
    }
    if source.is_empty() {
        return Err(invalid(format!("source of metric '{name}' must not be empty")));
    }
    for (key, value) in tags {
        if key.is_empty() || value.is_empty() {
            return Err(invalid(format!("metric '{name}' has an empty tag key or value")));
        }
    }
    Ok(())
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn write_name(buf: &mut String, name: &str) {
    buf.push('"');
    for (i, c) in name.chars().enumerate() {
        let keep = is_allowed(c) || (i == 0 && c == '~') || c == '\u{2206}' || c == '\u{0394}';
        buf.push(if keep { c } else { '-' });
    }
    buf.push('"');
}

fn write_tag_key(buf: &mut String, key: &str) {
    buf.push('"');
    buf.extend(key.chars().map(|c| if is_allowed(c) { c } else { '-' }));
    buf.push('"');
}

fn write_quoted_value(buf: &mut String, value: &str) {
    buf.push('"');
    for c in value.chars() {
        match c {
            '"' => buf.push_str("\\\""),
            '\n' | '\r' => {}
            c => buf.push(c),
        }
    }
    buf.push('"');
}

fn write_source_and_tags(buf: &mut String, source: &str, tags: &Tags) {
    buf.push_str(" source=");
    write_quoted_value(buf, source);
    for (key, value) in tags {
        buf.push(' ');
        write_tag_key(buf, key);
        buf.push('=');
        write_quoted_value(buf, value);
    }
}
