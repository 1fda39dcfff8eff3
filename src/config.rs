//! Tuning options for sparse facet counting
//!
//! A `SparseConfig` is built once from the host's request parameters and
//! passed to the pool on every acquire/release. Everything except
//! `cache_token` is expected to be stable across requests against the same
//! field; changing a structural option (fraction, packed, limits) makes the
//! pool discard its cached counters on the next acquire.

use crate::error::{Error, Result};

/// Options recognized by the sparse counting engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SparseConfig {
    /// Enable sparse tracking of updated ordinals.
    pub sparse: bool,
    /// Minimum number of unique values below which sparse tracking is
    /// disabled (tiny fields are cheap to scan exhaustively).
    pub min_tags: usize,
    /// Capacity of the updated-ordinal tracker, as a fraction of the number
    /// of unique values. 0.0 disables tracking.
    pub fraction: f64,
    /// Estimator threshold: sparse counting is only attempted when the
    /// expected number of touched ordinals stays below `fraction *
    /// unique_values * cut_off`.
    pub cut_off: f64,
    /// Prefer the n-plane counter over a plain packed vector.
    pub packed: bool,
    /// Maximum counter bit-width for which the n-plane counter is chosen.
    pub packed_limit: u32,
    /// Optional cap on stored counts. Counts saturate at this value and the
    /// counter reports itself as possibly truncated. Trades accuracy for
    /// smaller counters and faster clears.
    pub max_counts_tracked: Option<u64>,
    /// Maximum number of counters kept per field pool.
    pub pool_size: usize,
    /// Target minimum of empty (ready-for-use) counters in the pool.
    pub pool_min_empty: usize,
    /// Worker threads for background counter clearing. 0 clears inline on
    /// release.
    pub cleaning_threads: usize,
    /// If present, tags the filled counter so a later request carrying the
    /// same token re-acquires it with its contents intact (two-phase
    /// distributed faceting).
    pub cache_token: Option<String>,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            sparse: true,
            min_tags: 10_000,
            fraction: 0.08,
            cut_off: 0.90,
            packed: true,
            packed_limit: 24,
            max_counts_tracked: None,
            pool_size: 2,
            pool_min_empty: 1,
            cleaning_threads: 1,
            cache_token: None,
        }
    }
}

impl SparseConfig {
    /// Check option ranges. A fraction of exactly 0.0 is accepted and
    /// disables sparse tracking.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fraction) {
            return Err(Error::Config(format!(
                "fraction must lie in [0, 1], got {}",
                self.fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.cut_off) {
            return Err(Error::Config(format!(
                "cut_off must lie in [0, 1], got {}",
                self.cut_off
            )));
        }
        if self.packed_limit == 0 || self.packed_limit > 64 {
            return Err(Error::Config(format!(
                "packed_limit must lie in 1..=64, got {}",
                self.packed_limit
            )));
        }
        if self.max_counts_tracked == Some(0) {
            return Err(Error::Config(
                "max_counts_tracked must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}
