//! Cache-line-aware bounded min-heap
//!
//! A min-priority queue over packed u64 elements, laid out as a tree of
//! fixed-size mini-heaps of `2^e - 1` elements. With `e = 4` a mini-heap is
//! 15 slots — one or two cache lines — so the first levels of every sift
//! stay inside a single line instead of striding across the array the way a
//! flat binary heap does.
//!
//! Addressing: mini-heap `m` (1-based) occupies array block `m << e`, with
//! 1-based offsets inside the block; offset 0 of every block is unused so
//! parent/child offsets stay the classic `off/2` and `2*off`. The bottom
//! row of a mini-heap has `2^(e-1)` slots and each of them parents two
//! child mini-heaps, giving every mini-heap `2^e` children. Cross mini-heap
//! movement always happens between a bottom-row slot and a child mini-heap
//! root.
//!
//! The heap is size-bounded: once full, an element not exceeding the
//! current minimum is dropped, anything larger replaces the root. That is
//! exactly the discipline a top-K collector wants.

use crate::error::{Error, Result};

/// Bounded min-heap of mini-heaps over u64 elements.
pub struct BHeap {
    elements: Vec<u64>,
    max_size: usize,
    /// log2 of the mini-heap block size; a mini-heap holds `2^e - 1`.
    exponent: u32,
    /// Elements per mini-heap.
    mini_max: usize,
    /// Child mini-heaps per mini-heap.
    children: usize,
    /// Write cursor: mini-heap of the next free slot.
    mh_index: usize,
    /// Write cursor: offset of the next free slot.
    mh_offset: usize,
    size: usize,
}

impl BHeap {
    /// Create a heap holding at most `max_size` elements, with mini-heaps
    /// of `2^exponent - 1` slots. `exponent` must be at least 2.
    pub fn new(max_size: usize, exponent: u32) -> Result<Self> {
        if !(2..=16).contains(&exponent) {
            return Err(Error::Config(format!(
                "mini-heap exponent must lie in 2..=16, got {}",
                exponent
            )));
        }
        let mini_max = (1usize << exponent) - 1;
        let mini_heaps = max_size.div_ceil(mini_max);
        Ok(Self {
            elements: vec![0u64; (mini_heaps + 1) << exponent],
            max_size,
            exponent,
            mini_max,
            children: 1 << exponent,
            mh_index: 1,
            mh_offset: 1,
            size: 0,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Smallest element, if any.
    #[inline]
    pub fn peek(&self) -> Option<u64> {
        if self.size == 0 {
            None
        } else {
            Some(self.get(1, 1))
        }
    }

    /// Insert an element. When the heap is full, an element not exceeding
    /// the current minimum is silently dropped; a larger one replaces the
    /// minimum.
    pub fn insert(&mut self, element: u64) {
        if self.size < self.max_size {
            self.set(self.mh_index, self.mh_offset, element);
            self.sift_up(self.mh_index, self.mh_offset);
            self.mh_offset += 1;
            if self.mh_offset > self.mini_max {
                self.mh_index += 1;
                self.mh_offset = 1;
            }
            self.size += 1;
        } else if self.size > 0 && element > self.get(1, 1) {
            self.set(1, 1, element);
            self.sift_down(1, 1);
        }
    }

    /// Remove and return the smallest element.
    pub fn pop(&mut self) -> Option<u64> {
        if self.size == 0 {
            return None;
        }
        if self.mh_offset == 1 {
            self.mh_index -= 1;
            self.mh_offset = self.mini_max;
        } else {
            self.mh_offset -= 1;
        }
        self.size -= 1;
        let least = self.get(1, 1);
        let last = self.get(self.mh_index, self.mh_offset);
        self.set(1, 1, last);
        self.sift_down(1, 1);
        Some(least)
    }

    /// Drop all elements; storage is reused.
    pub fn clear(&mut self) {
        self.size = 0;
        self.mh_index = 1;
        self.mh_offset = 1;
    }

    #[inline]
    fn get(&self, mh: usize, off: usize) -> u64 {
        self.elements[(mh << self.exponent) + off]
    }

    #[inline]
    fn set(&mut self, mh: usize, off: usize, element: u64) {
        self.elements[(mh << self.exponent) + off] = element;
    }

    /// Mini-heaps currently holding at least one element.
    #[inline]
    fn active_mini_heaps(&self) -> usize {
        self.size.div_ceil(self.mini_max)
    }

    /// Number of occupied slots in mini-heap `mh`; only the last active
    /// mini-heap is partial.
    #[inline]
    fn mini_len(&self, mh: usize) -> usize {
        let active = self.active_mini_heaps();
        if mh > active {
            0
        } else if mh == active {
            self.size - (mh - 1) * self.mini_max
        } else {
            self.mini_max
        }
    }

    /// First bottom-row offset of a mini-heap.
    #[inline]
    fn bottom_row(&self) -> usize {
        1 << (self.exponent - 1)
    }

    /// Mini-heap index of the left child hanging off `(mh, off)`; `off`
    /// must be a bottom-row offset.
    #[inline]
    fn left_child_mh(&self, mh: usize, off: usize) -> usize {
        (mh * self.children - self.children + 2) + ((off - self.bottom_row()) << 1)
    }

    #[inline]
    fn parent_mh(&self, mh: usize) -> usize {
        (mh + self.children - 2) / self.children
    }

    /// Bottom-row offset inside the parent mini-heap that `mh` hangs off.
    #[inline]
    fn parent_offset(&self, mh: usize) -> usize {
        self.bottom_row() + (((mh + self.children - 2) & (self.children - 1)) >> 1)
    }

    /// Restore order after placing a new element at `(mh, off)`; bubbles
    /// within the mini-heap, then across mini-heap boundaries through the
    /// parent's designated bottom-row slot.
    fn sift_up(&mut self, mut mh: usize, mut off: usize) {
        let element = self.get(mh, off);
        loop {
            off = self.sift_up_mini(mh, off);
            if off != 1 || mh == 1 {
                break;
            }
            let parent_mh = self.parent_mh(mh);
            let parent_off = self.parent_offset(mh);
            let parent = self.get(parent_mh, parent_off);
            if parent <= element {
                break;
            }
            self.set(mh, 1, parent);
            self.set(parent_mh, parent_off, element);
            mh = parent_mh;
            off = parent_off;
        }
    }

    /// Classic in-mini-heap sift up; returns the resting offset.
    fn sift_up_mini(&mut self, mh: usize, mut off: usize) -> usize {
        let element = self.get(mh, off);
        while off > 1 {
            let parent = off >> 1;
            let above = self.get(mh, parent);
            if above <= element {
                break;
            }
            self.set(mh, off, above);
            off = parent;
        }
        self.set(mh, off, element);
        off
    }

    /// Restore order after replacing the element at `(mh, off)`; sinks
    /// within the mini-heap, then into the smaller child mini-heap's root.
    fn sift_down(&mut self, mut mh: usize, mut off: usize) {
        loop {
            off = self.sift_down_mini(mh, off);
            if off < self.bottom_row() {
                break;
            }
            let active = self.active_mini_heaps();
            let mut child = self.left_child_mh(mh, off);
            if child > active {
                break;
            }
            if child + 1 <= active && self.get(child + 1, 1) < self.get(child, 1) {
                child += 1;
            }
            let below = self.get(child, 1);
            let element = self.get(mh, off);
            if element <= below {
                break;
            }
            self.set(mh, off, below);
            self.set(child, 1, element);
            mh = child;
            off = 1;
        }
    }

    /// Classic in-mini-heap sift down, bounded by the mini-heap's occupied
    /// length; returns the resting offset.
    fn sift_down_mini(&mut self, mh: usize, mut off: usize) -> usize {
        let max_off = self.mini_len(mh);
        let element = self.get(mh, off);
        loop {
            let mut child = off << 1;
            if child > max_off {
                break;
            }
            if child + 1 <= max_off && self.get(mh, child + 1) < self.get(mh, child) {
                child += 1;
            }
            let below = self.get(mh, child);
            if below >= element {
                break;
            }
            self.set(mh, off, below);
            off = child;
        }
        self.set(mh, off, element);
        off
    }
}
