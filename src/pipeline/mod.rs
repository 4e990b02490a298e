//! Refresh orchestration.
//!
//! - `DataManager`: owns the in-memory partitions, serves reads and runs
//!   Fetch -> Parse -> Normalize -> Guard -> Persist per language
//! - `MergeGuard`: rejects refreshes whose record count collapsed

pub mod guard;
pub mod manager;
mod status;

pub use guard::{GuardResult, MergeGuard, MergeGuardConfig};
pub use manager::DataManager;
pub use status::{DataStatus, RefreshStatus, SourceReport};

/// How a refresh treats the cache it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Skip the network while the partition is fresh; guard against collapses
    #[default]
    Incremental,
    /// Always fetch; only an empty result is rejected
    ForceFull,
}
