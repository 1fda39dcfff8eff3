//! Per-generation pool registry
//!
//! One registry per index generation, created when the generation opens
//! and dropped when it closes; it is threaded through the request context
//! rather than living in process-global state, so two generations can
//! coexist during a reopen without sharing counters.
//!
//! All field pools of a registry share one janitor executor, which caps
//! the server-wide number of background clearing threads no matter how
//! many fields are faceted.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::SparseConfig;
use crate::pool::{CounterPool, JanitorExecutor};
use crate::structures::Maxima;

/// Registry of per-field counter pools for one index generation.
pub struct PoolRegistry {
    janitor: Arc<JanitorExecutor>,
    pools: Mutex<FxHashMap<String, Arc<CounterPool>>>,
}

impl PoolRegistry {
    /// Create a registry whose pools share `cleaning_threads` janitor
    /// workers (0 = clear inline on release).
    pub fn new(cleaning_threads: usize) -> Self {
        Self {
            janitor: Arc::new(JanitorExecutor::new(cleaning_threads)),
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    /// Pool for `field`, creating it from the supplied field statistics on
    /// first sight. Later calls for the same field return the existing
    /// pool and ignore the statistics.
    pub fn register_field(
        &self,
        field: &str,
        maxima: Arc<dyn Maxima + Send + Sync>,
        max_doc: u64,
        references: u64,
        config: &SparseConfig,
    ) -> Arc<CounterPool> {
        let mut pools = self.pools.lock();
        Arc::clone(pools.entry(field.to_string()).or_insert_with(|| {
            Arc::new(CounterPool::new(
                field,
                maxima,
                max_doc,
                references,
                config,
                Arc::clone(&self.janitor),
            ))
        }))
    }

    /// Pool for `field`, if one was registered.
    pub fn get(&self, field: &str) -> Option<Arc<CounterPool>> {
        self.pools.lock().get(field).cloned()
    }

    /// The shared janitor executor.
    pub fn janitor(&self) -> &Arc<JanitorExecutor> {
        &self.janitor
    }

    /// Drop every pool, waiting for in-flight background clears first.
    /// Called on generation teardown.
    pub fn clear(&self) {
        self.janitor.wait_idle();
        let mut pools = self.pools.lock();
        debug!("dropping {} facet pools on generation teardown", pools.len());
        pools.clear();
    }
}
