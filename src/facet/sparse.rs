//! Sparse counter
//!
//! Wraps a counter backing (packed vector or n-plane vector) and tracks
//! which ordinals have been touched, up to a bounded capacity. While the
//! touched set stays within capacity, iteration and clearing cost is
//! proportional to the number of touched ordinals rather than the field's
//! cardinality — the difference between microseconds and tens of
//! milliseconds on a hundred-million-term field. Once the tracker fills up
//! the counter degrades gracefully to plain dense behaviour for the rest of
//! its fill.
//!
//! A counter also carries two identities for pooling: a *structure key*
//! (hash of everything that decides memory layout — two counters with equal
//! keys are interchangeable) and a *content state* (empty, filled under a
//! host-supplied token, or dirty and awaiting a clear).

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::structures::{CounterStore, Incrementable, NPlaneMutable, PackedVector};
use crate::Ordinal;

/// Storage behind a [`SparseCounter`].
pub enum CounterBacking {
    /// Plain packed vector, one fixed-width slot per ordinal.
    Packed(PackedVector),
    /// Bit-plane vector for long-tail maxima.
    Planes(NPlaneMutable),
}

impl CounterStore for CounterBacking {
    fn len(&self) -> usize {
        match self {
            CounterBacking::Packed(v) => CounterStore::len(v),
            CounterBacking::Planes(v) => CounterStore::len(v),
        }
    }

    #[inline]
    fn get(&self, index: usize) -> u64 {
        match self {
            CounterBacking::Packed(v) => CounterStore::get(v, index),
            CounterBacking::Planes(v) => CounterStore::get(v, index),
        }
    }

    #[inline]
    fn set(&mut self, index: usize, value: u64) {
        match self {
            CounterBacking::Packed(v) => CounterStore::set(v, index, value),
            CounterBacking::Planes(v) => CounterStore::set(v, index, value),
        }
    }

    fn bits_per_value(&self) -> u32 {
        match self {
            CounterBacking::Packed(v) => CounterStore::bits_per_value(v),
            CounterBacking::Planes(v) => CounterStore::bits_per_value(v),
        }
    }

    fn clear(&mut self) {
        match self {
            CounterBacking::Packed(v) => CounterStore::clear(v),
            CounterBacking::Planes(v) => CounterStore::clear(v),
        }
    }
}

impl Incrementable for CounterBacking {
    #[inline]
    fn inc(&mut self, index: usize) {
        match self {
            CounterBacking::Packed(v) => v.inc(index),
            CounterBacking::Planes(v) => v.inc(index),
        }
    }
}

/// Pooling state of a counter's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentState {
    /// All zeroes, ready for any use.
    Empty,
    /// Holds the counts of a finished fill, cached under a token for
    /// re-acquisition by a follow-up request.
    Filled(String),
    /// Holds stale counts and needs a clear before reuse.
    Dirty,
}

/// Fingerprint of the construction parameters that decide a counter's
/// memory layout. Counters with equal keys are interchangeable in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructureKey(u64);

impl StructureKey {
    pub fn compute(
        unique_values: usize,
        max_count: u64,
        packed: bool,
        min_tags: usize,
        fraction: f64,
        max_tracked: Option<u64>,
    ) -> Self {
        let mut hasher = FxHasher::default();
        unique_values.hash(&mut hasher);
        max_count.hash(&mut hasher);
        packed.hash(&mut hasher);
        min_tags.hash(&mut hasher);
        fraction.to_bits().hash(&mut hasher);
        max_tracked.hash(&mut hasher);
        StructureKey(hasher.finish())
    }
}

/// Counter vector with bounded tracking of touched ordinals.
pub struct SparseCounter {
    backing: CounterBacking,
    /// Ordinals incremented from zero, valid while `exceeded` is false.
    updated: Vec<Ordinal>,
    capacity: usize,
    /// Whether tracking is enabled at all for this counter's geometry.
    tracking: bool,
    /// Tracker overflowed (or tracking disabled); dense behaviour from
    /// here until the next clear.
    exceeded: bool,
    /// At least one increment was dropped by the count cap; reported
    /// counts may be lower than the true ones.
    truncated: bool,
    max_tracked: Option<u64>,
    structure_key: StructureKey,
    content: ContentState,
}

impl SparseCounter {
    /// Wrap a backing. `fraction` of the backing length bounds the tracker;
    /// tracking is disabled outright when the capacity comes out zero or
    /// the field has fewer than `min_tags` ordinals.
    pub fn new(
        backing: CounterBacking,
        fraction: f64,
        min_tags: usize,
        max_tracked: Option<u64>,
        structure_key: StructureKey,
    ) -> Self {
        let len = backing.len();
        let capacity = (fraction * len as f64) as usize;
        let tracking = capacity > 0 && len >= min_tags;
        Self {
            backing,
            updated: Vec::with_capacity(if tracking { capacity } else { 0 }),
            capacity,
            tracking,
            exceeded: !tracking,
            truncated: false,
            max_tracked,
            structure_key,
            content: ContentState::Empty,
        }
    }

    /// Number of ordinals.
    pub fn len(&self) -> usize {
        self.backing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backing.is_empty()
    }

    /// Count for an ordinal.
    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        self.backing.get(index)
    }

    /// Overwrite a count. Bypasses the count cap; used by hosts replaying
    /// exact counts (e.g. refinement lookups), not by the fill loop.
    pub fn set(&mut self, index: usize, value: u64) {
        if !self.exceeded {
            let old = self.backing.get(index);
            if old == 0 && value != 0 {
                if self.updated.len() < self.capacity {
                    self.updated.push(index as Ordinal);
                } else {
                    self.exceeded = true;
                }
            }
        }
        self.backing.set(index, value);
    }

    /// Count one reference to the ordinal at `index`.
    #[inline]
    pub fn inc(&mut self, index: usize) {
        if self.exceeded {
            if let Some(cap) = self.max_tracked {
                if self.backing.get(index) >= cap {
                    self.truncated = true;
                    return;
                }
            }
            self.backing.inc(index);
            return;
        }
        let old = self.backing.get(index);
        if let Some(cap) = self.max_tracked {
            if old >= cap {
                self.truncated = true;
                return;
            }
        }
        self.backing.set(index, old + 1);
        if old == 0 {
            if self.updated.len() < self.capacity {
                self.updated.push(index as Ordinal);
            } else {
                self.exceeded = true;
            }
        }
    }

    /// Visit every ordinal in `[from, to)` whose count is at least
    /// `min_count`. Returns true when the bounded tracker served the
    /// iteration, false when the whole range had to be scanned.
    pub fn iterate<F: FnMut(Ordinal, u64)>(
        &self,
        from: usize,
        to: usize,
        min_count: u64,
        mut callback: F,
    ) -> bool {
        if !self.exceeded {
            for &ord in &self.updated {
                let index = ord as usize;
                if index >= from && index < to {
                    let count = self.backing.get(index);
                    if count >= min_count {
                        callback(ord, count);
                    }
                }
            }
            true
        } else {
            for index in from..to {
                let count = self.backing.get(index);
                if count >= min_count {
                    callback(index as Ordinal, count);
                }
            }
            false
        }
    }

    /// Zero the counter. Sparse fills clear in O(touched ordinals).
    pub fn clear(&mut self) {
        if !self.exceeded {
            for &ord in &self.updated {
                self.backing.set(ord as usize, 0);
            }
        } else {
            self.backing.clear();
        }
        self.updated.clear();
        self.exceeded = !self.tracking;
        self.truncated = false;
        self.content = ContentState::Empty;
    }

    /// The tracker overflowed (or tracking is disabled).
    pub fn exceeded(&self) -> bool {
        self.exceeded
    }

    /// Some counts may be lower than the true values because the count cap
    /// kicked in.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn structure_key(&self) -> StructureKey {
        self.structure_key
    }

    /// Token under which the filled contents are cached, if any.
    pub fn content_key(&self) -> Option<&str> {
        match &self.content {
            ContentState::Filled(token) => Some(token),
            _ => None,
        }
    }

    /// Tag the counter's contents for later re-acquisition, or reset the
    /// tag with `None`.
    pub fn set_content_key(&mut self, token: Option<String>) {
        self.content = match token {
            Some(token) => ContentState::Filled(token),
            None => ContentState::Empty,
        };
    }

    pub fn content_state(&self) -> &ContentState {
        &self.content
    }

    /// The storage variant behind this counter.
    pub fn backing(&self) -> &CounterBacking {
        &self.backing
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.content = ContentState::Dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::bits_required;

    fn packed_counter(len: usize, max: u64, fraction: f64) -> SparseCounter {
        let backing =
            CounterBacking::Packed(PackedVector::new(len, bits_required(max)).unwrap());
        let key = StructureKey::compute(len, max, false, 0, fraction, None);
        SparseCounter::new(backing, fraction, 0, None, key)
    }

    #[test]
    fn test_sparse_to_dense_transition() {
        // Capacity 5; touching a sixth distinct ordinal flips to dense.
        let mut counter = packed_counter(100, 1000, 0.05);
        for ord in 0..=6usize {
            counter.inc(ord);
            if ord <= 4 {
                assert!(!counter.exceeded(), "still sparse after ordinal {}", ord);
            }
        }
        assert!(counter.exceeded());
        for ord in 0..=6usize {
            assert_eq!(counter.get(ord), 1);
        }
        assert_eq!(counter.get(7), 0);
    }

    #[test]
    fn test_iterate_sparse_path() {
        let mut counter = packed_counter(1000, 1000, 0.05);
        counter.inc(10);
        counter.inc(10);
        counter.inc(500);
        counter.inc(999);

        let mut seen = Vec::new();
        let sparse = counter.iterate(0, 1000, 1, |ord, count| seen.push((ord, count)));
        assert!(sparse);
        seen.sort_unstable();
        assert_eq!(seen, vec![(10, 2), (500, 1), (999, 1)]);

        // Range and min-count filters apply on the sparse path too.
        let mut seen = Vec::new();
        counter.iterate(0, 500, 2, |ord, count| seen.push((ord, count)));
        assert_eq!(seen, vec![(10, 2)]);
    }

    #[test]
    fn test_iterate_dense_path() {
        let mut counter = packed_counter(50, 1000, 0.0); // tracking disabled
        counter.inc(3);
        counter.inc(3);
        counter.inc(7);
        let mut seen = Vec::new();
        let sparse = counter.iterate(0, 50, 1, |ord, count| seen.push((ord, count)));
        assert!(!sparse);
        assert_eq!(seen, vec![(3, 2), (7, 1)]);
    }

    #[test]
    fn test_counts_sum_over_iterate() {
        let mut counter = packed_counter(200, 1000, 0.5);
        let increments = [5usize, 5, 5, 17, 17, 100, 5, 100, 42];
        for &ord in &increments {
            counter.inc(ord);
        }
        let mut total = 0u64;
        counter.iterate(0, 200, 1, |_, count| total += count);
        assert_eq!(total, increments.len() as u64);
    }

    #[test]
    fn test_min_tags_disables_tracking() {
        let backing = CounterBacking::Packed(PackedVector::new(100, 10).unwrap());
        let key = StructureKey::compute(100, 1000, false, 10_000, 0.5, None);
        let counter = SparseCounter::new(backing, 0.5, 10_000, None, key);
        assert!(counter.exceeded());
    }

    #[test]
    fn test_clear_sparse_only_touches_updated() {
        let mut counter = packed_counter(1000, 1000, 0.05);
        counter.inc(1);
        counter.inc(999);
        counter.clear();
        assert!(!counter.exceeded());
        assert_eq!(counter.get(1), 0);
        assert_eq!(counter.get(999), 0);
        assert_eq!(counter.content_state(), &ContentState::Empty);

        // Refill after clear behaves like a fresh counter.
        counter.inc(1);
        assert_eq!(counter.get(1), 1);
        let mut seen = 0;
        assert!(counter.iterate(0, 1000, 1, |_, _| seen += 1));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_clear_resets_exceeded() {
        let mut counter = packed_counter(10, 1000, 0.2); // capacity 2
        counter.inc(0);
        counter.inc(1);
        counter.inc(2);
        assert!(counter.exceeded());
        counter.clear();
        assert!(!counter.exceeded());
        for i in 0..10 {
            assert_eq!(counter.get(i), 0);
        }
    }

    #[test]
    fn test_count_cap_saturates_and_flags() {
        let backing = CounterBacking::Packed(PackedVector::new(10, 10).unwrap());
        let key = StructureKey::compute(10, 1000, false, 0, 0.5, Some(3));
        let mut counter = SparseCounter::new(backing, 0.5, 0, Some(3), key);
        for _ in 0..5 {
            counter.inc(4);
        }
        assert_eq!(counter.get(4), 3);
        assert!(counter.truncated());
        counter.clear();
        assert!(!counter.truncated());
    }

    #[test]
    fn test_content_key_lifecycle() {
        let mut counter = packed_counter(10, 10, 0.5);
        assert_eq!(counter.content_key(), None);
        counter.set_content_key(Some("q1".to_string()));
        assert_eq!(counter.content_key(), Some("q1"));
        assert_eq!(
            counter.content_state(),
            &ContentState::Filled("q1".to_string())
        );
        counter.mark_dirty();
        assert_eq!(counter.content_key(), None);
        assert_eq!(counter.content_state(), &ContentState::Dirty);
        counter.clear();
        assert_eq!(counter.content_state(), &ContentState::Empty);
    }

    #[test]
    fn test_set_tracks_new_nonzero_slots() {
        let mut counter = packed_counter(100, 1000, 0.05);
        counter.set(9, 42);
        let mut seen = Vec::new();
        assert!(counter.iterate(0, 100, 1, |ord, count| seen.push((ord, count))));
        assert_eq!(seen, vec![(9, 42)]);
    }

    #[test]
    fn test_structure_keys_differ_on_layout_inputs() {
        let a = StructureKey::compute(100, 1000, true, 10, 0.08, None);
        let b = StructureKey::compute(100, 1000, false, 10, 0.08, None);
        let c = StructureKey::compute(101, 1000, true, 10, 0.08, None);
        let a2 = StructureKey::compute(100, 1000, true, 10, 0.08, None);
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
