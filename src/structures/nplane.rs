//! N-plane counter vector
//!
//! A counter vector where each slot has a known maximum, optimised for
//! long-tail maxima distributions: most slots can only ever reach a tiny
//! count, a few can reach millions. Picture the counters as vertical bit
//! pillars; the structure stores horizontal slices of them instead:
//!
//! ```text
//! bit 4        #
//! bit 3        #  #     #
//! bit 2     #  #  #     #
//! bit 1     #  #  #  #  #
//! slot      A  B  C  D  E
//! ```
//!
//! Plane 0 holds bit 1 for all five slots; plane 1 holds the bits above it
//! for the four slots whose maxima need them (A, B, C, E) — D never leaves
//! plane 0 and pays for exactly one bit. Each plane except the topmost
//! carries one overflow bit per participating slot, marking that the slot
//! continues in the next plane. A slot's position in plane p+1 is the rank (set-bit
//! prefix count) of its overflow bit in plane p, so no per-slot pointers
//! are stored anywhere.
//!
//! Increments touch plane 0 and walk upward only on carry, making `inc`
//! proportional to the number of planes whose bits actually change.
//! Clearing zeroes the value storage and leaves the overflow structures
//! alone — they are a function of the maxima, not of the counts.

use crate::error::{Error, Result};
use crate::structures::bitset::{Bitset, RankBitset};
use crate::structures::layout::{bit_histogram, plan_layout, PlaneSpec};
use crate::structures::packed::{bits_required, low_mask, PackedVector};
use crate::structures::{CounterStore, Incrementable, Maxima};

/// Storage variant for the planes of an [`NPlaneMutable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaneKind {
    /// Value bits and overflow bits in separate structures; overflow rank
    /// answered from a bucketed running popcount plus a short scan.
    #[default]
    Split,
    /// As `Split`, but with a full rank cache on the overflow bits for O(1)
    /// rank at ~12% extra space.
    SplitRank,
    /// Overflow bit interleaved as the LSB of each packed slot. Better
    /// locality on the inc path, slower clear.
    Shift,
}

/// Construction options for [`NPlaneMutable`].
#[derive(Debug, Clone, Copy)]
pub struct NPlaneConfig {
    /// Slots per overflow-rank cache bucket (`Split` and `Shift`).
    pub overflow_bucket_size: usize,
    /// Upper bound on the number of planes.
    pub max_planes: usize,
    /// Once fewer than this fraction of slots remain, the rest of the bits
    /// are folded into a single final plane.
    pub collapse_fraction: f64,
    pub kind: PlaneKind,
}

impl Default for NPlaneConfig {
    fn default() -> Self {
        Self {
            overflow_bucket_size: 1000,
            max_planes: 64,
            collapse_fraction: 0.01,
            kind: PlaneKind::Split,
        }
    }
}

impl NPlaneConfig {
    fn validate(&self) -> Result<()> {
        if self.max_planes < 2 {
            return Err(Error::Config(format!(
                "max_planes must be at least 2, got {}",
                self.max_planes
            )));
        }
        if self.overflow_bucket_size == 0 {
            return Err(Error::Config(
                "overflow_bucket_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.collapse_fraction) {
            return Err(Error::Config(format!(
                "collapse_fraction must lie in [0, 1], got {}",
                self.collapse_fraction
            )));
        }
        Ok(())
    }
}

/// Does `value` have any bits set at position `bit` (0-based) or above?
#[inline]
fn needs_bits_above(value: u64, bit: u32) -> bool {
    if bit >= 64 {
        false
    } else {
        value >> bit != 0
    }
}

enum PlaneStore {
    Split {
        values: PackedVector,
        overflow: Bitset,
        /// Cumulative set-overflow counts at bucket ends.
        cache: PackedVector,
        bucket_size: usize,
    },
    SplitRank {
        values: PackedVector,
        overflow: RankBitset,
    },
    Shift {
        /// Slot layout: value bits above the overflow LSB when the plane
        /// overflows, plain value bits otherwise.
        values: PackedVector,
        cache: PackedVector,
        bucket_size: usize,
    },
}

struct Plane {
    value_count: usize,
    bits_per_value: u32,
    /// Highest counter bit covered once this plane is applied.
    max_bit: u32,
    has_overflow: bool,
    mask: u64,
    store: PlaneStore,
}

impl Plane {
    fn new(spec: &PlaneSpec, config: &NPlaneConfig) -> Result<Self> {
        let value_count = spec.value_count;
        let bits = spec.bits_per_value;
        let cache_entries = value_count / config.overflow_bucket_size + 1;
        let cache_bits = bits_required(value_count as u64);
        let store = match config.kind {
            PlaneKind::Split => PlaneStore::Split {
                values: PackedVector::new(value_count, bits)?,
                overflow: Bitset::new(if spec.has_overflow { value_count } else { 0 }),
                cache: PackedVector::new(cache_entries, cache_bits)?,
                bucket_size: config.overflow_bucket_size,
            },
            PlaneKind::SplitRank => PlaneStore::SplitRank {
                values: PackedVector::new(value_count, bits)?,
                overflow: RankBitset::new(if spec.has_overflow { value_count } else { 0 }),
            },
            PlaneKind::Shift => PlaneStore::Shift {
                values: PackedVector::new(
                    value_count,
                    if spec.has_overflow { bits + 1 } else { bits },
                )?,
                cache: PackedVector::new(cache_entries, cache_bits)?,
                bucket_size: config.overflow_bucket_size,
            },
        };
        Ok(Self {
            value_count,
            bits_per_value: bits,
            max_bit: spec.max_bit,
            has_overflow: spec.has_overflow,
            mask: low_mask(bits),
            store,
        })
    }

    #[inline]
    fn get(&self, index: usize) -> u64 {
        match &self.store {
            PlaneStore::Split { values, .. } | PlaneStore::SplitRank { values, .. } => {
                values.get(index)
            }
            PlaneStore::Shift { values, .. } => {
                if self.has_overflow {
                    values.get(index) >> 1
                } else {
                    values.get(index)
                }
            }
        }
    }

    #[inline]
    fn set(&mut self, index: usize, value: u64) {
        let value = value & self.mask;
        match &mut self.store {
            PlaneStore::Split { values, .. } | PlaneStore::SplitRank { values, .. } => {
                values.set(index, value)
            }
            PlaneStore::Shift { values, .. } => {
                if self.has_overflow {
                    let overflow_bit = values.get(index) & 1;
                    values.set(index, (value << 1) | overflow_bit);
                } else {
                    values.set(index, value);
                }
            }
        }
    }

    /// Increment the slot at `index`, wrapping at the plane width.
    /// Returns true when the slot wrapped and the carry continues in the
    /// next plane.
    #[inline]
    fn inc(&mut self, index: usize) -> bool {
        match &mut self.store {
            PlaneStore::Split { values, .. } | PlaneStore::SplitRank { values, .. } => {
                let old = values.get(index);
                values.set(index, old.wrapping_add(1));
                old == self.mask
            }
            PlaneStore::Shift { values, .. } => {
                if self.has_overflow {
                    let raw = values.get(index);
                    let old = raw >> 1;
                    values.set(index, (old.wrapping_add(1) & self.mask) << 1 | (raw & 1));
                    old == self.mask
                } else {
                    let old = values.get(index);
                    values.set(index, old.wrapping_add(1));
                    old == self.mask
                }
            }
        }
    }

    #[inline]
    fn is_overflow(&self, index: usize) -> bool {
        if !self.has_overflow {
            return false;
        }
        match &self.store {
            PlaneStore::Split { overflow, .. } => overflow.get(index),
            PlaneStore::SplitRank { overflow, .. } => overflow.get(index),
            PlaneStore::Shift { values, .. } => values.get(index) & 1 == 1,
        }
    }

    /// Flag the slot as continuing into the next plane. Only used during
    /// construction, before any counts exist.
    fn set_overflow(&mut self, index: usize) {
        debug_assert!(self.has_overflow);
        match &mut self.store {
            PlaneStore::Split { overflow, .. } => overflow.set(index),
            PlaneStore::SplitRank { overflow, .. } => overflow.set(index),
            PlaneStore::Shift { values, .. } => values.set(index, 1),
        }
    }

    /// Build the rank acceleration structure once all overflow bits are in
    /// place.
    fn finalize_overflow(&mut self) {
        if !self.has_overflow {
            return;
        }
        match &mut self.store {
            PlaneStore::Split {
                overflow,
                cache,
                bucket_size,
                ..
            } => {
                build_bucket_cache(cache, *bucket_size, self.value_count, |i| overflow.get(i));
            }
            PlaneStore::SplitRank { overflow, .. } => overflow.build_rank_cache(),
            PlaneStore::Shift {
                values,
                cache,
                bucket_size,
            } => {
                build_bucket_cache(cache, *bucket_size, self.value_count, |i| {
                    values.get(i) & 1 == 1
                });
            }
        }
    }

    /// Number of set overflow bits in `[0, index)`: the slot's position in
    /// the next plane.
    #[inline]
    fn overflow_rank(&self, index: usize) -> usize {
        match &self.store {
            PlaneStore::Split {
                overflow,
                cache,
                bucket_size,
                ..
            } => {
                let mut rank = 0usize;
                let mut start = 0usize;
                if index >= *bucket_size {
                    rank = cache.get(index / bucket_size - 1) as usize;
                    start = index / bucket_size * bucket_size;
                }
                rank + overflow.count_range(start, index)
            }
            PlaneStore::SplitRank { overflow, .. } => overflow.rank(index),
            PlaneStore::Shift {
                values,
                cache,
                bucket_size,
            } => {
                let mut rank = 0usize;
                let mut start = 0usize;
                if index >= *bucket_size {
                    rank = cache.get(index / bucket_size - 1) as usize;
                    start = index / bucket_size * bucket_size;
                }
                for i in start..index {
                    rank += (values.get(i) & 1) as usize;
                }
                rank
            }
        }
    }

    fn clear(&mut self) {
        match &mut self.store {
            PlaneStore::Split { values, .. } | PlaneStore::SplitRank { values, .. } => {
                values.clear()
            }
            PlaneStore::Shift { values, .. } => {
                if self.has_overflow {
                    // The overflow bit lives inside the slot; strip the value
                    // bits one slot at a time.
                    for i in 0..self.value_count {
                        let raw = values.get(i);
                        values.set(i, raw & 1);
                    }
                } else {
                    values.clear();
                }
            }
        }
    }
}

/// Running popcount at bucket ends, packed. `cache[j]` ends up holding the
/// number of flagged slots in `[0, min((j+1)*bucket, len))`.
fn build_bucket_cache(
    cache: &mut PackedVector,
    bucket_size: usize,
    len: usize,
    flagged: impl Fn(usize) -> bool,
) {
    for i in 0..len {
        let bucket = i / bucket_size;
        if bucket > 0 && i % bucket_size == 0 {
            cache.set(bucket, cache.get(bucket - 1));
        }
        if flagged(i) {
            cache.set(bucket, cache.get(bucket) + 1);
        }
    }
}

/// Counter vector with per-slot maxima, stored as bit-planes.
pub struct NPlaneMutable {
    planes: Vec<Plane>,
}

impl NPlaneMutable {
    /// Build a zeroed counter vector shaped by `maxima`.
    pub fn new(maxima: &dyn Maxima, config: NPlaneConfig) -> Result<Self> {
        config.validate()?;
        let histogram = bit_histogram(maxima);
        let specs = plan_layout(&histogram, config.max_planes, config.collapse_fraction);
        let mut planes = specs
            .iter()
            .map(|spec| Plane::new(spec, &config))
            .collect::<Result<Vec<_>>>()?;
        Self::populate_overflow(&mut planes, maxima);
        for plane in &mut planes {
            plane.finalize_overflow();
        }
        Ok(Self { planes })
    }

    /// Flag, for every plane except the topmost, the slots whose maxima
    /// continue past the plane. One pass over the maxima per plane.
    fn populate_overflow(planes: &mut [Plane], maxima: &dyn Maxima) {
        let plane_count = planes.len();
        for p in 0..plane_count.saturating_sub(1) {
            let prev_max_bit = if p == 0 { 0 } else { planes[p - 1].max_bit };
            let plane_max_bit = planes[p].max_bit;
            let mut position = 0usize;
            for i in 0..maxima.len() {
                let max = maxima.get(i);
                if p == 0 || needs_bits_above(max, prev_max_bit) {
                    if needs_bits_above(max, plane_max_bit) {
                        planes[p].set_overflow(position);
                    }
                    position += 1;
                }
            }
        }
    }

    /// Number of planes the layout produced.
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    fn value(&self, index: usize) -> u64 {
        let mut value = 0u64;
        let mut shift = 0u32;
        let mut idx = index;
        for (p, plane) in self.planes.iter().enumerate() {
            value |= plane.get(idx) << shift;
            if p + 1 == self.planes.len() || !plane.is_overflow(idx) {
                break;
            }
            shift += plane.bits_per_value;
            idx = plane.overflow_rank(idx);
        }
        value
    }

    fn store(&mut self, index: usize, value: u64) {
        let mut v = value;
        let mut idx = index;
        for p in 0..self.planes.len() {
            let is_last = p + 1 == self.planes.len();
            let plane = &mut self.planes[p];
            plane.set(idx, v);
            if is_last || !plane.is_overflow(idx) {
                break;
            }
            // Walk up even when the remaining value is zero so stale high
            // bits get overwritten.
            v >>= plane.bits_per_value;
            idx = self.planes[p].overflow_rank(idx);
        }
    }

    fn increment(&mut self, index: usize) {
        let mut idx = index;
        for p in 0..self.planes.len() {
            let overflowed = self.planes[p].inc(idx);
            if !overflowed || p + 1 == self.planes.len() {
                break;
            }
            // The carry is always exactly 1; the rank points at the slot's
            // position in the plane above.
            idx = self.planes[p].overflow_rank(idx);
        }
    }
}

impl CounterStore for NPlaneMutable {
    fn len(&self) -> usize {
        self.planes.first().map(|p| p.value_count).unwrap_or(0)
    }

    #[inline]
    fn get(&self, index: usize) -> u64 {
        self.value(index)
    }

    #[inline]
    fn set(&mut self, index: usize, value: u64) {
        self.store(index, value)
    }

    fn bits_per_value(&self) -> u32 {
        self.planes.last().map(|p| p.max_bit).unwrap_or(0)
    }

    fn clear(&mut self) {
        for plane in &mut self.planes {
            plane.clear();
        }
    }
}

impl Incrementable for NPlaneMutable {
    #[inline]
    fn inc(&mut self, index: usize) {
        self.increment(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    const KINDS: [PlaneKind; 3] = [PlaneKind::Split, PlaneKind::SplitRank, PlaneKind::Shift];

    fn nplane(maxima: &[u64], kind: PlaneKind) -> NPlaneMutable {
        let maxima: Vec<u64> = maxima.to_vec();
        NPlaneMutable::new(
            &maxima,
            NPlaneConfig {
                kind,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_set_get_linear() {
        let maxima: Vec<u64> = vec![10, 1, 16, 2, 3, 2, 3, 100, 140];
        for kind in KINDS {
            let mut counters = nplane(&maxima, kind);
            for (i, &max) in maxima.iter().enumerate() {
                counters.set(i, max);
            }
            for (i, &max) in maxima.iter().enumerate() {
                assert_eq!(counters.get(i), max, "{:?} index {}", kind, i);
            }
            for (i, &max) in maxima.iter().enumerate() {
                counters.set(i, max - 1);
                counters.inc(i);
            }
            for (i, &max) in maxima.iter().enumerate() {
                assert_eq!(counters.get(i), max, "{:?} after inc, index {}", kind, i);
            }
        }
    }

    #[test]
    fn test_inc_carries_across_planes() {
        // One narrow and one wide counter; small bucket size so the rank
        // cache is actually consulted.
        let maxima: Vec<u64> = vec![1, 255, 1, 255, 1];
        for kind in KINDS {
            let mut counters = NPlaneMutable::new(
                &maxima,
                NPlaneConfig {
                    kind,
                    overflow_bucket_size: 2,
                    ..Default::default()
                },
            )
            .unwrap();
            for _ in 0..255 {
                counters.inc(1);
                counters.inc(3);
            }
            counters.inc(0);
            counters.inc(4);
            assert_eq!(counters.get(0), 1, "{:?}", kind);
            assert_eq!(counters.get(1), 255, "{:?}", kind);
            assert_eq!(counters.get(2), 0, "{:?}", kind);
            assert_eq!(counters.get(3), 255, "{:?}", kind);
            assert_eq!(counters.get(4), 1, "{:?}", kind);
        }
    }

    #[test]
    fn test_equivalence_with_packed_reference() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        let size = 1000usize;
        let maxima: Vec<u64> = (0..size)
            .map(|_| {
                // Long-tail: mostly small maxima, occasionally large.
                if rng.gen_bool(0.05) {
                    rng.gen_range(1..100_000)
                } else {
                    rng.gen_range(1..8)
                }
            })
            .collect();
        let max_bits = bits_required(maxima.iter().copied().max().unwrap());

        for kind in KINDS {
            let mut counters = nplane(&maxima, kind);
            let mut reference = PackedVector::new(size, max_bits).unwrap();
            let mut remaining: Vec<u64> = maxima.clone();
            for _ in 0..20_000 {
                let i = rng.gen_range(0..size);
                if remaining[i] == 0 {
                    continue;
                }
                remaining[i] -= 1;
                counters.inc(i);
                reference.inc(i);
            }
            for i in 0..size {
                assert_eq!(counters.get(i), reference.get(i), "{:?} index {}", kind, i);
            }
        }
    }

    #[test]
    fn test_set_equivalence_with_packed_reference() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xD1CE);
        let size = 500usize;
        let maxima: Vec<u64> = (0..size).map(|_| rng.gen_range(1..1u64 << 24)).collect();
        let max_bits = bits_required(maxima.iter().copied().max().unwrap());

        for kind in KINDS {
            let mut counters = nplane(&maxima, kind);
            let mut reference = PackedVector::new(size, max_bits).unwrap();
            // Two rounds so every second write overwrites an earlier value.
            for _ in 0..2 {
                for _ in 0..2000 {
                    let i = rng.gen_range(0..size);
                    let v = rng.gen_range(0..=maxima[i]);
                    counters.set(i, v);
                    reference.set(i, v);
                }
            }
            for i in 0..size {
                assert_eq!(counters.get(i), reference.get(i), "{:?} index {}", kind, i);
            }
        }
    }

    #[test]
    fn test_plane_population_matches_maxima() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let maxima: Vec<u64> = (0..2000).map(|_| rng.gen_range(1..1u64 << 20)).collect();
        let counters = nplane(&maxima, PlaneKind::Split);
        // Each plane past the first carries exactly the slots whose maxima
        // need bits beyond the previous plane.
        for p in 1..counters.planes.len() {
            let prev_top = counters.planes[p - 1].max_bit;
            let expected = maxima
                .iter()
                .filter(|&&m| bits_required(m) > prev_top)
                .count();
            assert_eq!(counters.planes[p].value_count, expected, "plane {}", p);
        }
    }

    #[test]
    fn test_clear_keeps_overflow_structures() {
        let maxima: Vec<u64> = vec![3, 1000, 2, 70000, 1];
        for kind in KINDS {
            let mut counters = nplane(&maxima, kind);
            for (i, &max) in maxima.iter().enumerate() {
                counters.set(i, max);
            }
            counters.clear();
            for i in 0..maxima.len() {
                assert_eq!(counters.get(i), 0, "{:?}", kind);
            }
            // Counting still works after clear.
            for (i, &max) in maxima.iter().enumerate() {
                for _ in 0..max {
                    counters.inc(i);
                }
            }
            for (i, &max) in maxima.iter().enumerate() {
                assert_eq!(counters.get(i), max, "{:?} refill index {}", kind, i);
            }
        }
    }

    #[test]
    fn test_single_bit_everywhere() {
        let maxima = vec![1u64; 100];
        for kind in KINDS {
            let mut counters = nplane(&maxima, kind);
            assert_eq!(counters.plane_count(), 1);
            for i in (0..100).step_by(7) {
                counters.inc(i);
            }
            for i in 0..100 {
                assert_eq!(counters.get(i), if i % 7 == 0 { 1 } else { 0 }, "{:?}", kind);
            }
        }
    }

    #[test]
    fn test_widest_counter() {
        let maxima = vec![u64::MAX >> 1]; // 2^63 - 1
        for kind in KINDS {
            let mut counters = nplane(&maxima, kind);
            counters.set(0, u64::MAX >> 1);
            assert_eq!(counters.get(0), u64::MAX >> 1, "{:?}", kind);
            counters.set(0, (u64::MAX >> 1) - 1);
            counters.inc(0);
            assert_eq!(counters.get(0), u64::MAX >> 1, "{:?}", kind);
        }
    }

    #[test]
    fn test_empty_and_single() {
        for kind in KINDS {
            let empty = nplane(&[], kind);
            assert_eq!(empty.len(), 0);
            assert_eq!(empty.plane_count(), 0);

            let mut single = nplane(&[5u64], kind);
            assert_eq!(single.len(), 1);
            single.inc(0);
            single.inc(0);
            assert_eq!(single.get(0), 2);
        }
    }

    #[test]
    fn test_set_walks_up_even_for_small_values() {
        // Writing a small value over a large one must reset the high plane
        // bits, not leave them dangling.
        let maxima: Vec<u64> = vec![100_000, 1];
        for kind in KINDS {
            let mut counters = nplane(&maxima, kind);
            counters.set(0, 99_999);
            counters.set(0, 1);
            assert_eq!(counters.get(0), 1, "{:?}", kind);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let maxima = vec![1u64];
        assert!(NPlaneMutable::new(
            &maxima,
            NPlaneConfig {
                max_planes: 1,
                ..Default::default()
            }
        )
        .is_err());
        assert!(NPlaneMutable::new(
            &maxima,
            NPlaneConfig {
                overflow_bucket_size: 0,
                ..Default::default()
            }
        )
        .is_err());
        assert!(NPlaneMutable::new(
            &maxima,
            NPlaneConfig {
                collapse_fraction: 1.5,
                ..Default::default()
            }
        )
        .is_err());
    }
}
