//! Process-wide cache for query range decompositions.
//!
//! Decomposing the same query box against the same curve is common when a
//! tiered strategy serves repeated queries, and the walk is the expensive
//! part of query planning. Entries are immutable; the cache is a bounded
//! LRU shared by every curve in the process.

use crate::keys::RangeDecomposition;
use crate::sfc::dimension::SfcDimension;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

const MAX_CACHED_QUERIES: usize = 500;

/// Everything that determines a decomposition result. Query bounds are
/// keyed by bit pattern so equal inputs hit regardless of float identity
/// subtleties.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct QueryCacheKey {
    dimensions: Vec<SfcDimension>,
    mins: Vec<u64>,
    maxes: Vec<u64>,
    over_inclusive: bool,
    max_ranges: Option<usize>,
}

impl QueryCacheKey {
    pub fn new(
        dimensions: &[SfcDimension],
        mins: &[f64],
        maxes: &[f64],
        over_inclusive: bool,
        max_ranges: Option<usize>,
    ) -> Self {
        QueryCacheKey {
            dimensions: dimensions.to_vec(),
            mins: mins.iter().map(|v| v.to_bits()).collect(),
            maxes: maxes.iter().map(|v| v.to_bits()).collect(),
            over_inclusive,
            max_ranges,
        }
    }
}

fn cache() -> &'static Mutex<LruCache<QueryCacheKey, RangeDecomposition>> {
    static CACHE: OnceLock<Mutex<LruCache<QueryCacheKey, RangeDecomposition>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(MAX_CACHED_QUERIES).expect("nonzero cache capacity"),
        ))
    })
}

/// Look up `key`, computing and inserting on a miss. The computation runs
/// outside the lock; a racing duplicate insert is harmless because results
/// for equal keys are equal.
pub(crate) fn get_or_compute<F>(key: QueryCacheKey, compute: F) -> RangeDecomposition
where
    F: FnOnce() -> RangeDecomposition,
{
    if let Some(hit) = cache().lock().get(&key) {
        return hit.clone();
    }
    let value = compute();
    cache().lock().put(key, value.clone());
    value
}

/// Drop every cached decomposition. Test hook.
pub fn reset() {
    cache().lock().clear();
}

/// The cache is process-global, so tests that reset it must not overlap.
#[cfg(test)]
pub(crate) fn test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}
