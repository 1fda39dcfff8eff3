//! Facet counting drivers
//!
//! The glue between a host search engine and the counter substrate. The
//! host walks matching documents through an [`OrdinalSource`], every
//! referenced ordinal bumps the acquired counter, and the top ordinals are
//! pulled out through a bounded heap:
//!
//! ```text
//! pool.acquire ──► fill_counts(source, counter) ──► extract_top_k ──► release
//! ```
//!
//! Ordinals are opaque dense u32 keys; resolving them back to terms is the
//! host's business, as is serializing the result.

pub mod estimator;
pub mod sparse;

pub use estimator::probably_sparse;
pub use sparse::{ContentState, CounterBacking, SparseCounter, StructureKey};

use crate::error::Result;
use crate::structures::BHeap;
use crate::{DocId, Ordinal};

/// Stream of matching documents and the ordinals they reference.
///
/// Implementations typically wrap a postings iterator and a per-document
/// ordinal reader; errors from either bubble straight up through the fill.
pub trait OrdinalSource {
    /// Advance to the next matching document, or `None` when exhausted.
    fn next_doc(&mut self) -> Result<Option<DocId>>;

    /// Invoke `callback` for every ordinal referenced by `doc`.
    fn for_each_ord(&mut self, doc: DocId, callback: &mut dyn FnMut(Ordinal)) -> Result<()>;
}

/// Receiver for counted ordinals during extraction.
pub trait TopKSink {
    fn offer(&mut self, count: u64, ordinal: Ordinal);
}

/// One facet result entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FacetEntry {
    pub ordinal: Ordinal,
    pub count: u64,
}

/// Bounded top-K collector over (count, ordinal) pairs.
///
/// Entries are packed into u64 as `count << 32 | !ordinal` so the b-heap
/// orders by count first and, on ties, keeps the lower ordinal. Counts
/// beyond 32 bits saturate for ranking purposes; the exact count is
/// recovered from the counter by the host if it needs it.
pub struct TopOrdinals {
    heap: BHeap,
}

impl TopOrdinals {
    pub fn new(k: usize) -> Result<Self> {
        Ok(Self {
            heap: BHeap::new(k, 4)?,
        })
    }

    #[inline]
    fn pack(count: u64, ordinal: Ordinal) -> u64 {
        (count.min(u32::MAX as u64) << 32) | (!ordinal) as u64
    }

    #[inline]
    fn unpack(packed: u64) -> FacetEntry {
        FacetEntry {
            ordinal: !(packed as u32),
            count: packed >> 32,
        }
    }

    /// Entries by descending count; ties by ascending ordinal.
    pub fn into_sorted(mut self) -> Vec<FacetEntry> {
        let mut entries = Vec::with_capacity(self.heap.len());
        while let Some(packed) = self.heap.pop() {
            entries.push(Self::unpack(packed));
        }
        entries.reverse();
        entries
    }
}

impl TopKSink for TopOrdinals {
    #[inline]
    fn offer(&mut self, count: u64, ordinal: Ordinal) {
        self.heap.insert(Self::pack(count, ordinal));
    }
}

/// Count every document→ordinal reference produced by `source` into
/// `counter`. Returns the number of matching documents.
///
/// On a source error the counter keeps whatever it counted so far; the
/// host releases it as dirty and the pool cleans it up.
pub fn fill_counts<S: OrdinalSource>(source: &mut S, counter: &mut SparseCounter) -> Result<u64> {
    let mut hits = 0u64;
    while let Some(doc) = source.next_doc()? {
        hits += 1;
        source.for_each_ord(doc, &mut |ordinal| counter.inc(ordinal as usize))?;
    }
    Ok(hits)
}

/// Top `k` ordinals of a filled counter with count at least `min_count`,
/// by descending count.
pub fn extract_top_k(counter: &SparseCounter, k: usize, min_count: u64) -> Result<Vec<FacetEntry>> {
    let mut top = TopOrdinals::new(k)?;
    counter.iterate(0, counter.len(), min_count, |ordinal, count| {
        top.offer(count, ordinal);
    });
    Ok(top.into_sorted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{bits_required, PackedVector};

    /// In-memory ordinal source for tests: a list of documents, each with
    /// its referenced ordinals.
    struct VecSource {
        docs: Vec<(DocId, Vec<Ordinal>)>,
        position: usize,
    }

    impl VecSource {
        fn new(docs: Vec<(DocId, Vec<Ordinal>)>) -> Self {
            Self { docs, position: 0 }
        }
    }

    impl OrdinalSource for VecSource {
        fn next_doc(&mut self) -> Result<Option<DocId>> {
            if self.position >= self.docs.len() {
                return Ok(None);
            }
            let doc = self.docs[self.position].0;
            self.position += 1;
            Ok(Some(doc))
        }

        fn for_each_ord(&mut self, doc: DocId, callback: &mut dyn FnMut(Ordinal)) -> Result<()> {
            let entry = self
                .docs
                .iter()
                .find(|(d, _)| *d == doc)
                .expect("doc produced by next_doc");
            for &ord in &entry.1 {
                callback(ord);
            }
            Ok(())
        }
    }

    fn counter(len: usize, max: u64, fraction: f64) -> SparseCounter {
        let backing =
            CounterBacking::Packed(PackedVector::new(len, bits_required(max)).unwrap());
        let key = StructureKey::compute(len, max, false, 0, fraction, None);
        SparseCounter::new(backing, fraction, 0, None, key)
    }

    #[test]
    fn test_fill_and_extract() {
        let mut source = VecSource::new(vec![
            (0, vec![3, 7]),
            (1, vec![3]),
            (2, vec![3, 9, 7]),
            (5, vec![9]),
        ]);
        let mut counter = counter(100, 100, 0.2);
        let hits = fill_counts(&mut source, &mut counter).unwrap();
        assert_eq!(hits, 4);

        let top = extract_top_k(&counter, 2, 1).unwrap();
        assert_eq!(
            top,
            vec![
                FacetEntry { ordinal: 3, count: 3 },
                FacetEntry { ordinal: 7, count: 2 },
            ]
        );
    }

    #[test]
    fn test_extract_ties_prefer_lower_ordinal() {
        let mut counter = counter(50, 10, 1.0);
        for ord in [9usize, 4, 30] {
            counter.inc(ord);
            counter.inc(ord);
        }
        let top = extract_top_k(&counter, 3, 1).unwrap();
        assert_eq!(
            top.iter().map(|e| e.ordinal).collect::<Vec<_>>(),
            vec![4, 9, 30]
        );
        assert!(top.iter().all(|e| e.count == 2));
    }

    #[test]
    fn test_extract_respects_min_count() {
        let mut counter = counter(20, 10, 1.0);
        counter.inc(1);
        counter.inc(2);
        counter.inc(2);
        let top = extract_top_k(&counter, 10, 2).unwrap();
        assert_eq!(top, vec![FacetEntry { ordinal: 2, count: 2 }]);
    }

    #[test]
    fn test_extract_more_requested_than_present() {
        let mut counter = counter(20, 10, 1.0);
        counter.inc(11);
        let top = extract_top_k(&counter, 10, 1).unwrap();
        assert_eq!(top, vec![FacetEntry { ordinal: 11, count: 1 }]);
    }

    #[test]
    fn test_top_k_bounded() {
        let mut counter = counter(1000, 2000, 0.0);
        for ord in 0..1000usize {
            for _ in 0..=ord % 97 {
                counter.inc(ord);
            }
        }
        let top = extract_top_k(&counter, 5, 1).unwrap();
        assert_eq!(top.len(), 5);
        assert!(top.windows(2).all(|w| w[0].count >= w[1].count));
        assert_eq!(top[0].count, 97);
    }

    #[test]
    fn test_full_request_flow_with_pool() {
        use crate::pool::{CounterPool, JanitorExecutor};
        use crate::SparseConfig;
        use std::sync::Arc;

        let maxima: Arc<dyn crate::Maxima + Send + Sync> =
            Arc::new(vec![3u64, 3, 3, 3, 3, 3, 3, 3, 3, 3]);
        let config = SparseConfig {
            cleaning_threads: 0,
            min_tags: 0,
            cache_token: Some("shard1-q42".to_string()),
            ..Default::default()
        };
        let pool = Arc::new(CounterPool::new(
            "category",
            maxima,
            100,
            30,
            &config,
            Arc::new(JanitorExecutor::new(0)),
        ));

        // Phase 1: fill, extract, release under the request token.
        let mut counter = pool.acquire(&config).unwrap();
        let mut source = VecSource::new(vec![(0, vec![2, 5]), (1, vec![2]), (4, vec![8, 2])]);
        let hits = fill_counts(&mut source, &mut counter).unwrap();
        assert_eq!(hits, 3);
        let top = extract_top_k(&counter, 10, 1).unwrap();
        assert_eq!(
            top,
            vec![
                FacetEntry { ordinal: 2, count: 3 },
                FacetEntry { ordinal: 5, count: 1 },
                FacetEntry { ordinal: 8, count: 1 },
            ]
        );
        pool.release(counter, &config);

        // Phase 2: the same token gets the counts back without refilling.
        let counter = pool.acquire(&config).unwrap();
        for (ord, expected) in [(2usize, 3u64), (5, 1), (8, 1), (0, 0)] {
            assert_eq!(counter.get(ord), expected);
        }
    }

    #[test]
    fn test_empty_counter_and_zero_k() {
        let counter = counter(10, 10, 0.5);
        assert!(extract_top_k(&counter, 5, 1).unwrap().is_empty());
        let mut filled = self::counter(10, 10, 0.5);
        filled.inc(1);
        assert!(extract_top_k(&filled, 0, 1).unwrap().is_empty());
    }
}
