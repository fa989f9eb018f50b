//! Storage key scheme.
//!
//! Every backup lives under `<prefix>/<hostname>/<timestamp>`. The prefix and
//! hostname form the root key that is scanned when listing a host's backups;
//! the timestamp segment is both the sort key and the deletion identifier.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::cmp::Ordering;

/// Separator between key segments
pub const KEY_SEPARATOR: char = '/';

/// Derives backup keys for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    prefix: String,
    hostname: String,
    layout: String,
}

impl KeyScheme {
    /// Create a new key scheme. `layout` uses chrono's strftime syntax.
    pub fn new(
        prefix: impl Into<String>,
        hostname: impl Into<String>,
        layout: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            hostname: hostname.into(),
            layout: layout.into(),
        }
    }

    /// Datetime layout used for the timestamp segment
    pub fn layout(&self) -> &str {
        &self.layout
    }

    /// Key without a timestamp, the scan root for all of this host's backups
    pub fn root_key(&self) -> String {
        build_key(&[&self.prefix, &self.hostname])
    }

    /// Key for a backup taken at `now`
    pub fn timestamped_key(&self, now: DateTime<Utc>) -> String {
        let timestamp = now.format(&self.layout).to_string();
        build_key(&[&self.prefix, &self.hostname, &timestamp])
    }

    /// Re-attach a timestamp segment to the root key
    pub fn join(&self, timestamp: &str) -> String {
        build_key(&[&self.root_key(), timestamp])
    }

    /// Strip the root key from each key, leaving the timestamp segments.
    ///
    /// Keys that do not live under the root key are returned unchanged.
    pub fn strip_prefix(&self, keys: &[String]) -> Vec<String> {
        let root = self.root_key();
        keys.iter()
            .map(|key| {
                let key = key.trim_end_matches(KEY_SEPARATOR);
                if root.is_empty() {
                    return key.trim_start_matches(KEY_SEPARATOR).to_string();
                }
                key.strip_prefix(root.as_str())
                    .and_then(|rest| rest.strip_prefix(KEY_SEPARATOR))
                    .unwrap_or(key)
                    .to_string()
            })
            .collect()
    }

    /// Sort timestamp segments newest first.
    ///
    /// Segments are compared chronologically when they parse with the layout.
    /// Anything that does not parse sorts after the parseable segments, in
    /// descending lexical order.
    pub fn sort_descending(&self, timestamps: Vec<String>) -> Vec<String> {
        let mut parsed: Vec<(Option<NaiveDateTime>, String)> = timestamps
            .into_iter()
            .map(|ts| (parse_timestamp(&ts, &self.layout), ts))
            .collect();

        parsed.sort_by(|(a_time, a), (b_time, b)| match (a_time, b_time) {
            (Some(a_time), Some(b_time)) => b_time.cmp(a_time).then_with(|| b.cmp(a)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.cmp(a),
        });

        parsed.into_iter().map(|(_, ts)| ts).collect()
    }

    /// Check that a layout renders without errors and never emits a separator
    pub fn is_valid_layout(layout: &str) -> bool {
        if layout.trim().is_empty() || layout.contains(KEY_SEPARATOR) {
            return false;
        }
        !StrftimeItems::new(layout).any(|item| matches!(item, Item::Error))
    }
}

fn parse_timestamp(value: &str, layout: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, layout)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, layout)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn build_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches(KEY_SEPARATOR))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
