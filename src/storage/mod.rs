//! Storage abstractions for partition snapshots.
//!
//! Each language partition is one JSON document holding every record and the
//! partition's metadata, so a reader always sees records and metadata from
//! the same refresh.
//!
//! ## Directory Structure
//!
//! ```text
//! {cache_dir}/
//! ├── rewards_en_US.json
//! └── rewards_pt_BR.json
//! ```

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{DataMetadata, Language, Records, SourceKind};

pub use local::{LocalStorage, StagedSnapshot};

/// Version of the on-disk snapshot document.
pub const FORMAT_VERSION: u32 = 1;

/// Records and metadata of one partition at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub records: Records,
    pub metadata: DataMetadata,
}

impl Snapshot {
    /// Snapshot of a partition nothing has been fetched for yet.
    pub fn never_fetched(kinds: impl IntoIterator<Item = SourceKind>) -> Self {
        Self {
            records: Records::default(),
            metadata: DataMetadata::never_fetched(kinds),
        }
    }
}

/// On-disk form of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub format_version: u32,
    pub language: Language,
    /// Hex SHA-256 of the compact JSON of `records`
    pub checksum: String,
    pub records: Records,
    pub metadata: DataMetadata,
}

impl SnapshotDocument {
    pub fn new(language: &Language, snapshot: &Snapshot) -> Result<Self> {
        Ok(Self {
            format_version: FORMAT_VERSION,
            language: language.clone(),
            checksum: checksum(&snapshot.records)?,
            records: snapshot.records.clone(),
            metadata: snapshot.metadata.clone(),
        })
    }

    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            records: self.records,
            metadata: self.metadata,
        }
    }
}

/// Checksum of a record set.
pub fn checksum(records: &Records) -> Result<String> {
    let bytes = serde_json::to_vec(records)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Load a partition. `Ok(None)` when it was never saved.
    async fn load(&self, language: &Language) -> Result<Option<Snapshot>>;

    /// Replace a partition atomically. On error the previous snapshot is intact.
    async fn save(&self, language: &Language, snapshot: &Snapshot) -> Result<()>;

    /// Delete a partition. Removing a missing partition is not an error.
    async fn remove(&self, language: &Language) -> Result<()>;
}
