//! Sparseness estimation
//!
//! Decides up front whether a faceting call is likely to stay within the
//! sparse tracker. The estimate assumes references from documents to
//! ordinals are distributed randomly: a result set of `hits` documents out
//! of `max_doc`, over a field with `references` total document→ordinal
//! references, is expected to touch about `hits / max_doc * references`
//! distinct ordinals.

use crate::config::SparseConfig;

/// True when a fill over `hit_count` documents is expected to stay within
/// the sparse tracker's capacity, with `cut_off` headroom.
///
/// A known-empty outcome (no hits, no docs or no references) reports true;
/// either counting strategy is trivially fine there.
pub fn probably_sparse(
    hit_count: u64,
    max_doc: u64,
    references: u64,
    unique_values: u64,
    config: &SparseConfig,
) -> bool {
    if hit_count == 0 || max_doc == 0 || references == 0 {
        return true;
    }
    let expected_touched = hit_count as f64 / max_doc as f64 * references as f64;
    let tracker_capacity = config.fraction * unique_values as f64;
    unique_values >= config.min_tags as u64
        && expected_touched < tracker_capacity * config.cut_off
}
