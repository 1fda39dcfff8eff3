//! Counter storage structures
//!
//! The leaves of the counting engine: fixed-width packed vectors, bitsets
//! with rank, the n-plane compressed counter vector and the b-heap used to
//! extract top-K ordinals. The traits below are the seams between them —
//! counters are filled through [`Incrementable`] regardless of which
//! storage variant backs them, and sized from a read-only [`Maxima`]
//! provider owned by the host.

pub mod bheap;
pub mod bitset;
pub mod layout;
pub mod nplane;
pub mod packed;

pub use bheap::BHeap;
pub use bitset::{Bitset, RankBitset};
pub use layout::{bit_histogram, max_bit, plan_layout, PlaneSpec};
pub use nplane::{NPlaneConfig, NPlaneMutable, PlaneKind};
pub use packed::{bits_required, PackedVector};

/// A mutable fixed-length vector of unsigned integers.
pub trait CounterStore {
    /// Number of slots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index`.
    fn get(&self, index: usize) -> u64;

    /// Store `value` at `index`. Values wider than the store's bit-width
    /// are truncated to it.
    fn set(&mut self, index: usize, value: u64);

    /// Logical bit-width of a slot (the widest representable value is
    /// `2^bits_per_value - 1`).
    fn bits_per_value(&self) -> u32;

    /// Reset every slot to zero.
    fn clear(&mut self);
}

/// Increment-by-one capability on top of [`CounterStore`].
///
/// Kept separate from the basic store so backings can specialise: a packed
/// vector falls back to get+set, while the n-plane counter runs a dedicated
/// cascade that touches only the planes whose bits change.
pub trait Incrementable: CounterStore {
    /// Increment the value at `index` by one. Incrementing past the slot's
    /// maximum silently wraps inside the backing bit-width; callers keep
    /// counts within the maxima the store was built for.
    fn inc(&mut self, index: usize);
}

/// Read-only per-slot maxima, supplied by the host once per index
/// generation and shared by every counter built for the field.
pub trait Maxima {
    /// Number of slots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound for the counter at `index`.
    fn get(&self, index: usize) -> u64;

    /// Largest maximum across all slots.
    fn max_value(&self) -> u64 {
        (0..self.len()).map(|i| self.get(i)).max().unwrap_or(0)
    }
}

impl Maxima for [u64] {
    #[inline]
    fn len(&self) -> usize {
        <[u64]>::len(self)
    }

    #[inline]
    fn get(&self, index: usize) -> u64 {
        self[index]
    }
}

impl Maxima for Vec<u64> {
    #[inline]
    fn len(&self) -> usize {
        <[u64]>::len(self)
    }

    #[inline]
    fn get(&self, index: usize) -> u64 {
        self[index]
    }
}

impl Maxima for PackedVector {
    #[inline]
    fn len(&self) -> usize {
        PackedVector::len(self)
    }

    #[inline]
    fn get(&self, index: usize) -> u64 {
        PackedVector::get(self, index)
    }
}

/// A view over a maxima provider with every value capped.
///
/// Used when counts are only tracked up to a configured bound: the counter
/// planes are sized for the capped maxima, which keeps wide outliers from
/// inflating the layout.
pub struct ClampedMaxima<'a> {
    inner: &'a dyn Maxima,
    cap: u64,
}

impl<'a> ClampedMaxima<'a> {
    pub fn new(inner: &'a dyn Maxima, cap: u64) -> Self {
        Self { inner, cap }
    }
}

impl Maxima for ClampedMaxima<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    fn get(&self, index: usize) -> u64 {
        self.inner.get(index).min(self.cap)
    }

    fn max_value(&self) -> u64 {
        self.inner.max_value().min(self.cap)
    }
}
