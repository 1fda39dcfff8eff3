//! Longtail - a sparse faceting counter engine
//!
//! The counting core of a faceted search server: for every unique term in
//! a string field, count how many matching documents reference it, then
//! surface the top-K terms. Built for fields with hundreds of millions of
//! unique terms, where a flat array of machine-word counters loses on both
//! memory and clearing time. This crate provides:
//! - Bit-plane compressed counter vectors sized from per-term maxima,
//!   exploiting long-tail maxima distributions
//! - Sparse tracking of touched ordinals, so iteration and clearing scale
//!   with result size instead of field cardinality
//! - Per-field counter pools with background cleaning, amortizing
//!   allocation and clear cost across requests
//! - Content-token caching of filled counters for two-phase distributed
//!   faceting
//! - A cache-line-aware bounded heap for top-K extraction
//!
//! Segment readers, ordinal maps, query parsing and response shaping stay
//! with the host; the engine sees only opaque dense ordinals.

pub mod config;
pub mod error;
pub mod facet;
pub mod pool;
pub mod structures;

pub use config::SparseConfig;
pub use error::{Error, Result};

// Re-exports from structures
pub use structures::{
    bits_required, BHeap, Bitset, ClampedMaxima, CounterStore, Incrementable, Maxima,
    NPlaneConfig, NPlaneMutable, PackedVector, PlaneKind, RankBitset,
};

// Re-exports from facet
pub use facet::{
    extract_top_k, fill_counts, probably_sparse, ContentState, CounterBacking, FacetEntry,
    OrdinalSource, SparseCounter, StructureKey, TopKSink, TopOrdinals,
};

// Re-exports from pool
pub use pool::{CounterPool, JanitorExecutor, PoolRegistry};

/// Dense document identifier within one index generation.
pub type DocId = u32;
/// Dense identifier of a distinct term value.
pub type Ordinal = u32;
