//! Per-field counter pools
//!
//! Counter structures for large fields run to hundreds of megabytes;
//! allocating one per request taxes the allocator and clearing one on the
//! request path taxes latency. A `CounterPool` amortizes both: released
//! counters are kept and recycled, and the expensive clears run on a shared
//! janitor executor off the request path.
//!
//! The pool holds a mix of empty counters (ready for any use), filled
//! counters (cached under a content token for the second phase of
//! distributed faceting) and dirty counters awaiting a clear. A single
//! mutex guards the queue and the pool's structure key; critical sections
//! are O(pool size) and never include a clear.
//!
//! **Ownership:** `acquire` hands the counter out by value — the acquiring
//! request is the sole owner and counts without any locking. `release`
//! takes it back and decides its pooled fate.

pub mod janitor;
pub mod registry;

pub use janitor::JanitorExecutor;
pub use registry::PoolRegistry;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::config::SparseConfig;
use crate::error::Result;
use crate::facet::estimator::probably_sparse;
use crate::facet::sparse::{ContentState, CounterBacking, SparseCounter, StructureKey};
use crate::structures::{
    bits_required, ClampedMaxima, Maxima, NPlaneConfig, NPlaneMutable, PackedVector,
};

struct PoolInner {
    /// Released counters; empties gravitate to the tail.
    pool: VecDeque<SparseCounter>,
    /// Layout fingerprint every pooled counter must match.
    structure_key: Option<StructureKey>,
}

/// Pool of reusable counters for one facet field.
pub struct CounterPool {
    field: String,
    maxima: Arc<dyn Maxima + Send + Sync>,
    unique_values: usize,
    max_count_for_any: u64,
    max_doc: u64,
    references: u64,
    max_pool_size: usize,
    min_empty: usize,
    inner: Mutex<PoolInner>,
    /// Clears currently running outside the lock; counts against the pool
    /// budget so a burst of releases cannot overshoot it.
    active_clears: AtomicUsize,
    janitor: Arc<JanitorExecutor>,
}

impl CounterPool {
    /// Build a pool for `field`. The maxima vector is the per-ordinal upper
    /// bounds for one index generation; unique-value count and the largest
    /// maximum are derived from it here, once.
    pub fn new(
        field: impl Into<String>,
        maxima: Arc<dyn Maxima + Send + Sync>,
        max_doc: u64,
        references: u64,
        config: &SparseConfig,
        janitor: Arc<JanitorExecutor>,
    ) -> Self {
        let unique_values = maxima.len();
        let max_count_for_any = maxima.max_value();
        Self {
            field: field.into(),
            maxima,
            unique_values,
            max_count_for_any,
            max_doc,
            references,
            max_pool_size: config.pool_size,
            min_empty: config.pool_min_empty,
            inner: Mutex::new(PoolInner {
                pool: VecDeque::new(),
                structure_key: None,
            }),
            active_clears: AtomicUsize::new(0),
            janitor,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn unique_values(&self) -> usize {
        self.unique_values
    }

    pub fn max_count_for_any(&self) -> u64 {
        self.max_count_for_any
    }

    pub fn max_doc(&self) -> u64 {
        self.max_doc
    }

    pub fn references(&self) -> u64 {
        self.references
    }

    /// Number of counters currently pooled.
    pub fn pooled(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// Whether a fill over `hit_count` documents is expected to stay within
    /// sparse tracking, given this field's statistics.
    pub fn is_probably_sparse(&self, hit_count: u64, config: &SparseConfig) -> bool {
        probably_sparse(
            hit_count,
            self.max_doc,
            self.references,
            self.unique_values as u64,
            config,
        )
    }

    /// Largest count a counter built under `config` must represent.
    fn effective_max(&self, config: &SparseConfig) -> u64 {
        let max = match config.max_counts_tracked {
            Some(cap) => self.max_count_for_any.min(cap),
            None => self.max_count_for_any,
        };
        // An empty facet still needs a representable value.
        max.max(1)
    }

    fn use_packed(&self, config: &SparseConfig) -> bool {
        (config.packed && bits_required(self.max_count_for_any.max(1)) <= config.packed_limit)
            || self.max_count_for_any > i32::MAX as u64
    }

    fn effective_fraction(config: &SparseConfig) -> f64 {
        if config.sparse {
            config.fraction
        } else {
            0.0
        }
    }

    fn wanted_key(&self, config: &SparseConfig) -> StructureKey {
        StructureKey::compute(
            self.unique_values,
            self.effective_max(config),
            self.use_packed(config),
            config.min_tags,
            Self::effective_fraction(config),
            config.max_counts_tracked,
        )
    }

    /// Deliver a counter ready for filling.
    ///
    /// Preference order: a filled counter matching the request's cache
    /// token, an empty counter, a dirty counter, any filled counter. A
    /// candidate with the wrong contents is cleared inline before return;
    /// with nothing pooled a fresh counter is allocated. If the structural
    /// options changed since the last acquire, the pool is emptied first.
    pub fn acquire(&self, config: &SparseConfig) -> Result<SparseCounter> {
        config.validate()?;
        let wanted = self.wanted_key(config);
        let candidate = {
            let mut inner = self.inner.lock();
            if inner.structure_key != Some(wanted) {
                if !inner.pool.is_empty() {
                    debug!(
                        "facet pool '{}': structure changed, dropping {} pooled counters",
                        self.field,
                        inner.pool.len()
                    );
                    inner.pool.clear();
                }
                inner.structure_key = Some(wanted);
            }
            take_candidate(&mut inner.pool, config.cache_token.as_deref())
        };

        let mut counter = match candidate {
            Some(counter) => counter,
            None => return self.create_counter(config),
        };
        let reusable = match (&config.cache_token, counter.content_state()) {
            (_, ContentState::Empty) => true,
            (Some(token), ContentState::Filled(existing)) => token == existing,
            _ => false,
        };
        if !reusable {
            trace!("facet pool '{}': clearing counter inline on acquire", self.field);
            counter.clear();
        }
        Ok(counter)
    }

    /// Return a counter after use. Never blocks on cleaning: the counter is
    /// labelled (cached under the request's token, or dirty) and a janitor
    /// task is queued to bring the pool back into shape.
    pub fn release(self: &Arc<Self>, mut counter: SparseCounter, config: &SparseConfig) {
        if counter.content_key().is_some() {
            // The counter came in already carrying cached contents; they
            // have served their second-phase purpose.
            counter.mark_dirty();
        } else {
            match &config.cache_token {
                Some(token) => counter.set_content_key(Some(token.clone())),
                None => counter.mark_dirty(),
            }
        }
        {
            let mut inner = self.inner.lock();
            if let Some(key) = inner.structure_key {
                if key != counter.structure_key() {
                    debug!(
                        "facet pool '{}': discarding released counter with stale structure",
                        self.field
                    );
                    return;
                }
            }
            inner.pool.push_back(counter);
        }
        let pool = Arc::clone(self);
        self.janitor.submit(Box::new(move || pool.janitor_pass()));
    }

    fn create_counter(&self, config: &SparseConfig) -> Result<SparseCounter> {
        let effective_max = self.effective_max(config);
        let key = self.wanted_key(config);
        let backing = if self.use_packed(config) {
            let clamped = ClampedMaxima::new(self.maxima.as_ref(), effective_max);
            CounterBacking::Planes(NPlaneMutable::new(&clamped, NPlaneConfig::default())?)
        } else {
            CounterBacking::Packed(PackedVector::new(
                self.unique_values,
                bits_required(effective_max),
            )?)
        };
        Ok(SparseCounter::new(
            backing,
            Self::effective_fraction(config),
            config.min_tags,
            config.max_counts_tracked,
            key,
        ))
    }

    /// One janitor invocation: shrink the pool if oversized, then clean at
    /// most one dirty counter. Bounding the work per invocation keeps any
    /// single task short and leaves the executor responsive.
    fn janitor_pass(&self) {
        let mut dirty = match self.reduce_and_take_dirty() {
            Some(counter) => counter,
            None => return,
        };
        self.active_clears.fetch_add(1, Ordering::SeqCst);
        trace!("facet pool '{}': background clear", self.field);
        dirty.clear();
        {
            let mut inner = self.inner.lock();
            let key_matches = inner.structure_key == Some(dirty.structure_key());
            if key_matches && inner.pool.len() < self.max_pool_size {
                inner.pool.push_back(dirty);
            } else {
                debug!(
                    "facet pool '{}': dropping cleaned counter (pool full or structure changed)",
                    self.field
                );
            }
        }
        self.active_clears.fetch_sub(1, Ordering::SeqCst);
    }

    /// Evict while the pool (plus in-flight clears) exceeds its budget,
    /// then decide whether one counter should be cleaned to move the empty
    /// count toward the target. Holds the lock but does no heavy work.
    fn reduce_and_take_dirty(&self) -> Option<SparseCounter> {
        let mut inner = self.inner.lock();
        let active = self.active_clears.load(Ordering::SeqCst);
        while !inner.pool.is_empty() {
            let empty = inner
                .pool
                .iter()
                .filter(|vc| matches!(vc.content_state(), ContentState::Empty))
                .count();
            let mut candidate =
                select_clean_candidate(&inner.pool).expect("non-empty pool yields a candidate");

            if active + inner.pool.len() > self.max_pool_size {
                if empty >= self.min_empty {
                    // Enough empties: sacrifice the newest entry instead of
                    // a cached filled counter.
                    candidate = inner.pool.len() - 1;
                }
                inner.pool.remove(candidate);
                debug!(
                    "facet pool '{}': evicted a counter over the pool budget",
                    self.field
                );
                continue;
            }

            let is_dirty = matches!(inner.pool[candidate].content_state(), ContentState::Dirty);
            if is_dirty {
                return inner.pool.remove(candidate);
            }
            let is_empty = matches!(inner.pool[candidate].content_state(), ContentState::Empty);
            if is_empty
                || inner.pool.len() + active < self.max_pool_size
                || empty >= self.min_empty
            {
                return None;
            }
            // Pool full of filled counters and too few empties: recycle a
            // cached one.
            return inner.pool.remove(candidate);
        }
        None
    }
}

/// Best acquisition candidate, by preference: token match, empty, dirty,
/// any filled counter as a last resort. Removes it from the pool.
fn take_candidate(
    pool: &mut VecDeque<SparseCounter>,
    token: Option<&str>,
) -> Option<SparseCounter> {
    let mut candidate: Option<usize> = None;
    for (i, vc) in pool.iter().enumerate() {
        match vc.content_state() {
            ContentState::Filled(existing) if token == Some(existing.as_str()) => {
                candidate = Some(i);
                break; // nothing beats a cache hit
            }
            ContentState::Empty => {
                candidate = Some(i);
                break; // empties sit at the tail; the first is as good as any
            }
            ContentState::Dirty => {
                candidate = Some(i); // keep scanning for a token match
            }
            ContentState::Filled(_) => {
                let keep_dirty = matches!(
                    candidate.map(|j| pool[j].content_state()),
                    Some(ContentState::Dirty)
                );
                if !keep_dirty {
                    candidate = Some(i);
                }
            }
        }
    }
    candidate.and_then(|i| pool.remove(i))
}

/// Candidate for cleaning/eviction: a dirty counter wins outright, else the
/// last filled one, else the first empty.
fn select_clean_candidate(pool: &VecDeque<SparseCounter>) -> Option<usize> {
    let mut candidate = None;
    for (i, vc) in pool.iter().enumerate() {
        match vc.content_state() {
            ContentState::Dirty => return Some(i),
            ContentState::Filled(_) => candidate = Some(i),
            ContentState::Empty => {
                if candidate.is_none() {
                    candidate = Some(i);
                }
                break; // the rest of the tail is empty too
            }
        }
    }
    candidate
}
