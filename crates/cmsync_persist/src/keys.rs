//! Local storage key layout and backup-name timestamps.

use chrono::{DateTime, SecondsFormat, Utc};

/// Length of a normalized timestamp, e.g. `2026-10-15T08-30-00-123Z`.
const NORMALIZED_LEN: usize = 24;

/// Positions of the characters replaced by `-` during normalization.
const COLON_POSITIONS: [usize; 2] = [13, 16];
const DOT_POSITION: usize = 19;

/// Names of every key the persistence layer owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    namespace: String,
}

impl KeyLayout {
    /// Creates a layout rooted at `namespace` (`cmsync` by default).
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace all keys share.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the current snapshot slot.
    pub fn current_snapshot(&self) -> String {
        format!("{}.snapshot.current", self.namespace)
    }

    /// Key of the config record.
    pub fn config(&self) -> String {
        format!("{}.config", self.namespace)
    }

    /// Key of the metrics record.
    pub fn metrics(&self) -> String {
        format!("{}.metrics", self.namespace)
    }

    /// Key of the data-format version marker.
    pub fn format_version(&self) -> String {
        format!("{}.format_version", self.namespace)
    }

    /// Prefix shared by backup ring entries.
    pub fn backup_prefix(&self) -> String {
        format!("{}.backup.", self.namespace)
    }

    /// Prefix shared by archived corrupt snapshots.
    pub fn corrupt_prefix(&self) -> String {
        format!("{}.corrupt.", self.namespace)
    }

    /// Returns true if `key` is one of the keys or key families this
    /// layout writes. Other keys under the namespace are not owned.
    pub fn owns(&self, key: &str) -> bool {
        key == self.current_snapshot()
            || key == self.config()
            || key == self.metrics()
            || key == self.format_version()
            || key.starts_with(&self.backup_prefix())
            || key.starts_with(&self.corrupt_prefix())
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("cmsync")
    }
}

/// Renders `at` as an ISO-8601 UTC timestamp safe for use in a key.
///
/// Millisecond precision; `:` and `.` become `-`. The output has a fixed
/// width, so lexical order matches chronological order.
pub fn normalize_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Parses a normalized timestamp, optionally followed by a `-N` collision
/// suffix. Returns the timestamp and the suffix (0 when absent).
pub fn parse_normalized_timestamp(s: &str) -> Option<(DateTime<Utc>, u32)> {
    let base = s.get(..NORMALIZED_LEN)?;
    let sequence = match &s[NORMALIZED_LEN..] {
        "" => 0,
        rest => rest.strip_prefix('-')?.parse().ok()?,
    };

    let mut iso = base.as_bytes().to_vec();
    for pos in COLON_POSITIONS {
        if iso[pos] != b'-' {
            return None;
        }
        iso[pos] = b':';
    }
    if iso[DOT_POSITION] != b'-' {
        return None;
    }
    iso[DOT_POSITION] = b'.';

    let iso = String::from_utf8(iso).ok()?;
    let parsed = DateTime::parse_from_rfc3339(&iso).ok()?;
    Some((parsed.with_timezone(&Utc), sequence))
}
