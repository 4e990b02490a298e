//! Per-partition metadata.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two upstream tables. Each source yields exactly one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Quest,
    Vendor,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [Self::Quest, Self::Vendor];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quest => "quest",
            Self::Vendor => "vendor",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one source within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Stale,
    Failed,
    #[default]
    NeverFetched,
}

/// Where a source's records came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub url: String,
    pub schema: String,
}

/// Metadata stored alongside the records of one language partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DataMetadata {
    /// Last refresh that applied at least one source
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub source_status: BTreeMap<SourceKind, SourceStatus>,

    #[serde(default)]
    pub record_counts: BTreeMap<SourceKind, usize>,

    #[serde(default)]
    pub sources: BTreeMap<SourceKind, SourceIdentity>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_error: BTreeMap<SourceKind, String>,
}

impl DataMetadata {
    /// Fresh metadata for a partition that has never been fetched.
    pub fn never_fetched(kinds: impl IntoIterator<Item = SourceKind>) -> Self {
        let mut meta = Self::default();
        for kind in kinds {
            meta.source_status.insert(kind, SourceStatus::NeverFetched);
            meta.record_counts.insert(kind, 0);
        }
        meta
    }

    pub fn status(&self, kind: SourceKind) -> SourceStatus {
        self.source_status.get(&kind).copied().unwrap_or_default()
    }

    pub fn count(&self, kind: SourceKind) -> usize {
        self.record_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Whether the partition was refreshed successfully within `window`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_updated
            .map(|updated| now.signed_duration_since(updated) < window)
            .unwrap_or(false)
    }

    /// Hours since the last successful refresh, if any.
    pub fn age_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_updated
            .map(|updated| now.signed_duration_since(updated).num_seconds() as f64 / 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_fetched_defaults() {
        let meta = DataMetadata::never_fetched(SourceKind::ALL);
        assert_eq!(meta.status(SourceKind::Quest), SourceStatus::NeverFetched);
        assert_eq!(meta.count(SourceKind::Vendor), 0);
        assert!(meta.last_updated.is_none());
        assert!(!meta.is_fresh(Utc::now(), chrono::Duration::hours(1)));
    }

    #[test]
    fn freshness_window() {
        let now = Utc::now();
        let meta = DataMetadata {
            last_updated: Some(now - chrono::Duration::hours(2)),
            ..DataMetadata::default()
        };
        assert!(meta.is_fresh(now, chrono::Duration::hours(3)));
        assert!(!meta.is_fresh(now, chrono::Duration::hours(1)));
    }
}
