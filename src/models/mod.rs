// src/models/mod.rs

//! Domain models for the reward cache.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod language;
mod metadata;
mod records;
mod schema;

// Re-export all public types
pub use config::{CacheConfig, Config, FetchConfig, GemColorRules, SourceConfig};
pub use language::Language;
pub use metadata::{DataMetadata, SourceIdentity, SourceKind, SourceStatus};
pub use records::{
    CharacterClass, ClassSet, GemColor, QuestRewardRecord, Requirements, RewardItem,
    VendorRewardRecord,
};
pub use schema::{ColumnMap, ColumnRole, ColumnSpec, CompiledSchema, TableSchema};

/// Records of one language partition.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Records {
    #[serde(default)]
    pub quests: Vec<QuestRewardRecord>,
    #[serde(default)]
    pub vendors: Vec<VendorRewardRecord>,
}

impl Records {
    pub fn count(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Quest => self.quests.len(),
            SourceKind::Vendor => self.vendors.len(),
        }
    }
}
