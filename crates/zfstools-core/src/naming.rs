//! Snapshot naming: `<dataset><separator><formatted timestamp>`.
//!
//! The separator and the chrono format pattern are configuration values. A
//! name that does not split on the separator or whose suffix does not parse is
//! not an error: it is simply left out of every decision (manually created
//! snapshots with foreign naming are common).

use crate::error::{Result, ToolsError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Wall-clock timestamp embedded in a snapshot name.
pub type Timestamp = NaiveDateTime;

/// Default separator between dataset and timestamp (`tank/data@...`).
pub const DEFAULT_SEPARATOR: &str = "@";

/// Default timestamp pattern, e.g. `20220805-000000`.
pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d-%H%M%S";

/// A parsed snapshot. Equality and hashing use `name` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Full identifier as reported by `zfs list`.
    pub name: String,
    /// Dataset owning the snapshot (everything before the last separator).
    pub dataset: String,
    /// Timestamp parsed from the name.
    pub timestamp: Timestamp,
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Snapshot {}

impl Hash for Snapshot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Snapshot {
    /// Ordering used everywhere a "most recent first" list is needed:
    /// timestamp descending, then name ascending.
    pub fn cmp_newest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.name.cmp(&b.name))
    }

    /// Ordering for send queues: timestamp ascending, then name ascending.
    pub fn cmp_oldest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.name.cmp(&b.name))
    }
}

/// Separator plus date pattern used to build and parse snapshot names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNaming {
    /// Separator between dataset and timestamp.
    pub separator: String,
    /// chrono strftime pattern for the timestamp.
    pub date_format: String,
}

impl Default for SnapshotNaming {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

impl SnapshotNaming {
    /// Create a naming scheme from a separator and a date pattern.
    pub fn new(separator: impl Into<String>, date_format: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            date_format: date_format.into(),
        }
    }

    /// Render a timestamp with the configured pattern.
    pub fn format_timestamp(&self, timestamp: &Timestamp) -> String {
        timestamp.format(&self.date_format).to_string()
    }

    /// Build the full snapshot name for a dataset.
    pub fn format_name(&self, dataset: &str, timestamp: &Timestamp) -> String {
        format!(
            "{}{}{}",
            dataset,
            self.separator,
            self.format_timestamp(timestamp)
        )
    }

    /// Parse a bare timestamp (e.g. a schedule anchor).
    ///
    /// Date-only patterns are accepted and resolve to midnight.
    pub fn parse_timestamp(&self, input: &str) -> Result<Timestamp> {
        if let Ok(ts) = NaiveDateTime::parse_from_str(input, &self.date_format) {
            return Ok(ts);
        }
        NaiveDate::parse_from_str(input, &self.date_format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| ToolsError::DateParse {
                input: input.to_string(),
                format: self.date_format.clone(),
            })
    }

    /// Parse a full snapshot name, splitting on the last separator.
    /// Returns `None` for names that do not follow the convention.
    pub fn parse(&self, name: &str) -> Option<Snapshot> {
        if self.separator.is_empty() {
            return None;
        }
        let (dataset, stamp) = name.rsplit_once(self.separator.as_str())?;
        if dataset.is_empty() {
            return None;
        }
        let timestamp = self.parse_timestamp(stamp).ok()?;
        Some(Snapshot {
            name: name.to_string(),
            dataset: dataset.to_string(),
            timestamp,
        })
    }

    /// Parse every name, dropping the ones that do not parse.
    pub fn parse_all<'a, I>(&self, names: I) -> Vec<Snapshot>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(|name| {
                let parsed = self.parse(name);
                if parsed.is_none() {
                    tracing::debug!(snapshot = %name, "skipping snapshot with foreign naming");
                }
                parsed
            })
            .collect()
    }

    /// Snapshots belonging to exactly `dataset`, most recent first.
    pub fn for_dataset(&self, snapshots: &[Snapshot], dataset: &str) -> Vec<Snapshot> {
        let mut owned: Vec<Snapshot> = snapshots
            .iter()
            .filter(|s| s.dataset == dataset)
            .cloned()
            .collect();
        owned.sort_by(Snapshot::cmp_newest_first);
        owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_format_name_default() {
        let naming = SnapshotNaming::default();
        let name = naming.format_name("nas_12tb/nas/documents", &ts("2022-08-05 00:00:00"));
        assert_eq!(name, "nas_12tb/nas/documents@20220805-000000");
    }

    #[test]
    fn test_parse_splits_on_last_separator() {
        let naming = SnapshotNaming::new("-at-", "%Y%m%d%H%M");
        let snap = naming.parse("tank-at-home-at-202208051230").unwrap();
        assert_eq!(snap.dataset, "tank-at-home");
        assert_eq!(snap.timestamp, ts("2022-08-05 12:30:00"));
    }

    #[test]
    fn test_foreign_names_are_skipped() {
        let naming = SnapshotNaming::default();
        assert!(naming.parse("tank/data@manual-before-upgrade").is_none());
        assert!(naming.parse("tank/data").is_none());
        assert!(naming.parse("@20220805-000000").is_none());

        let parsed = naming.parse_all([
            "tank/data@20220805-000000",
            "tank/data@pre-upgrade",
            "tank/data@20220801-000000",
        ]);
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_date_only_pattern_parses_to_midnight() {
        let naming = SnapshotNaming::new("@", "%Y-%m-%d");
        let snap = naming.parse("tank@2022-08-05").unwrap();
        assert_eq!(snap.timestamp, ts("2022-08-05 00:00:00"));
    }

    #[test]
    fn test_parse_timestamp_error() {
        let naming = SnapshotNaming::default();
        let err = naming.parse_timestamp("yesterday").unwrap_err();
        assert!(matches!(err, ToolsError::DateParse { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_equality_by_name() {
        let a = Snapshot {
            name: "tank@20220805-000000".to_string(),
            dataset: "tank".to_string(),
            timestamp: ts("2022-08-05 00:00:00"),
        };
        let mut b = a.clone();
        b.timestamp = ts("2000-01-01 00:00:00");
        assert_eq!(a, b);
    }

    #[test]
    fn test_for_dataset_excludes_prefix_siblings() {
        let naming = SnapshotNaming::default();
        let all = naming.parse_all([
            "nas/documents@20220801-000000",
            "nas/documents-alt@20220805-000000",
            "nas/documents@20220805-000000",
            "nas/documents/child@20220805-000000",
        ]);
        let docs = naming.for_dataset(&all, "nas/documents");
        let names: Vec<&str> = docs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["nas/documents@20220805-000000", "nas/documents@20220801-000000"]
        );
    }
}
