//! Merge guard.
//!
//! Rejects a refresh whose record count collapsed compared to the cached
//! partition, which almost always means the upstream page broke rather than
//! that the game lost most of its quests.
//!
//! - New count below `min_viable_percent` of the previous count is suspect,
//!   unless the refresh was forced.
//! - Zero records where previous data existed is always suspect.
//! - Previous counts below `min_baseline` skip the check.

use crate::error::RefreshError;
use crate::models::CacheConfig;
use crate::pipeline::RefreshMode;

/// Merge guard configuration.
#[derive(Debug, Clone)]
pub struct MergeGuardConfig {
    /// Minimum share (0-100) of the previous count a refresh must keep. Default: 50%
    pub min_viable_percent: u8,
    /// Previous counts below this are not checked
    pub min_baseline: usize,
}

impl Default for MergeGuardConfig {
    fn default() -> Self {
        Self {
            min_viable_percent: 50,
            min_baseline: 5,
        }
    }
}

impl From<&CacheConfig> for MergeGuardConfig {
    fn from(cache: &CacheConfig) -> Self {
        Self {
            min_viable_percent: cache.min_viable_percent,
            min_baseline: cache.min_baseline,
        }
    }
}

/// Result of a guard check.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardResult {
    /// Safe to apply
    Safe { current: usize, previous: usize },
    /// Nothing (or too little) cached to compare against
    ColdStart { current: usize },
    /// Count collapsed, keep the cached records
    Suspect {
        current: usize,
        previous: usize,
        kept_percent: f64,
    },
    /// Refresh produced nothing where records existed
    Empty { previous: usize },
}

/// Count-collapse guard applied per record kind.
#[derive(Debug, Clone, Default)]
pub struct MergeGuard {
    config: MergeGuardConfig,
}

impl MergeGuard {
    pub fn new(config: MergeGuardConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, current: usize, previous: usize, mode: RefreshMode) -> GuardResult {
        if current == 0 {
            if previous == 0 {
                return GuardResult::ColdStart { current };
            }
            return GuardResult::Empty { previous };
        }

        if previous < self.config.min_baseline {
            return GuardResult::ColdStart { current };
        }

        if mode == RefreshMode::Incremental
            && current * 100 < previous * usize::from(self.config.min_viable_percent)
        {
            return GuardResult::Suspect {
                current,
                previous,
                kept_percent: current as f64 / previous as f64 * 100.0,
            };
        }

        GuardResult::Safe { current, previous }
    }

    /// Ok when the new records may replace the cached ones.
    pub fn validate(
        &self,
        current: usize,
        previous: usize,
        mode: RefreshMode,
    ) -> Result<(), RefreshError> {
        match self.check(current, previous, mode) {
            GuardResult::Safe { current, previous } => {
                log::debug!("Merge guard: safe ({} records, was {})", current, previous);
                Ok(())
            }
            GuardResult::ColdStart { current } => {
                log::debug!("Merge guard: cold start ({} records)", current);
                Ok(())
            }
            GuardResult::Suspect {
                current,
                previous,
                kept_percent,
            } => {
                log::warn!(
                    "Merge guard: suspect refresh, {} -> {} records ({:.1}% kept < {}% required)",
                    previous,
                    current,
                    kept_percent,
                    self.config.min_viable_percent
                );
                Err(RefreshError::Suspect { current, previous })
            }
            GuardResult::Empty { previous } => {
                log::warn!(
                    "Merge guard: refresh produced no records where {} existed",
                    previous
                );
                Err(RefreshError::Suspect {
                    current: 0,
                    previous,
                })
            }
        }
    }
}
