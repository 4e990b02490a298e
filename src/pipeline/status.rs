//! Reports returned by the data manager.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ErrorKind, RefreshError};
use crate::models::{Language, SourceKind, SourceStatus};

/// What happened to one source during a refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    /// Status of the source after the refresh
    pub status: SourceStatus,
    /// Records of this kind now served
    pub records: usize,
    /// Whether new records replaced the cached ones
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of `DataManager::refresh`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshStatus {
    pub language: Language,
    pub sources: BTreeMap<SourceKind, SourceReport>,
    /// A new snapshot was persisted and swapped in
    pub applied: bool,
    /// This caller joined a refresh another caller started
    pub coalesced: bool,
    /// The cache was fresh and the network was not touched
    pub skipped: bool,
    /// Refresh-wide failure (persistence, cancellation, unknown language)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RefreshStatus {
    pub(crate) fn new(language: &Language) -> Self {
        Self {
            language: language.clone(),
            sources: BTreeMap::new(),
            applied: false,
            coalesced: false,
            skipped: false,
            detail: None,
        }
    }

    /// Whether every source ended up `ok`.
    pub fn is_ok(&self) -> bool {
        self.detail.is_none()
            && !self.sources.is_empty()
            && self.sources.values().all(|s| s.status == SourceStatus::Ok)
    }
}

/// Availability report of one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataStatus {
    pub language: Language,
    /// Records from at least one successful refresh are being served
    pub available: bool,
    /// Nothing has ever been applied for this language
    pub first_run: bool,
    pub age_hours: Option<f64>,
    /// Outside the freshness window or a source is not `ok`
    pub update_due: bool,
    pub sources: BTreeMap<SourceKind, SourceStatus>,
    pub record_counts: BTreeMap<SourceKind, usize>,
}

/// Source status recorded for a failed source.
///
/// Network trouble and suspect counts mark the source stale; a broken page
/// marks it failed. An empty result on a first fetch is a failure too, since
/// there is nothing cached that could be stale.
pub(crate) fn status_for(error: &RefreshError) -> SourceStatus {
    match (error, error.kind()) {
        (RefreshError::NoRecords { .. }, _) => SourceStatus::Failed,
        (_, ErrorKind::Network | ErrorKind::Validation) => SourceStatus::Stale,
        (_, ErrorKind::Schema | ErrorKind::Persistence) => SourceStatus::Failed,
    }
}
