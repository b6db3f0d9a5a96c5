//! Index strategies: from numeric data to store keys and back.

pub(crate) mod binned;
pub mod factory;
pub mod single_tier;
pub mod tiered;

pub use factory::{
    create_defined_precision_tiered_strategy, create_equal_interval_precision_tiered_strategy,
    create_full_incremental_tiered_strategy, create_tiered_strategy_from_options,
    TieredIndexOptions,
};
pub use single_tier::SingleTierStrategy;
pub use tiered::{TierMetadata, TieredIndexStrategy};

use crate::data::NumericDataset;
use crate::keys::{InsertionIds, QueryRanges};
use bytes::Bytes;
use std::collections::BTreeSet;

/// The operations a numeric index strategy offers a storage layer.
///
/// Implementations are immutable after construction; everything here is a
/// pure computation over the strategy's configuration.
pub trait NumericIndexStrategy {
    /// Keys at which to store an entry. Empty (with a warning) for empty
    /// data; never a failure.
    fn insertion_ids(&self, data: &NumericDataset) -> InsertionIds;

    /// As [`insertion_ids`](Self::insertion_ids) with an explicit cap on
    /// estimated duplicates per dimension, overriding the configured one.
    fn insertion_ids_with_max_duplicates(
        &self,
        data: &NumericDataset,
        max_duplicates: u64,
    ) -> InsertionIds;

    /// Decompose a query box into per-partition sort-key ranges. Finer
    /// precision groups come first; within a group, ranges are ascending
    /// and disjoint.
    fn query_ranges(
        &self,
        query: &NumericDataset,
        max_ranges: Option<usize>,
        metadata: Option<&TierMetadata>,
    ) -> QueryRanges;

    /// Per-dimension cell ordinals of a stored key, or `None` (with a
    /// warning) when the key does not belong to this strategy.
    fn coordinates_for_id(&self, partition_key: &[u8], sort_key: &[u8]) -> Option<Vec<u64>>;

    /// Per-dimension value ranges of a stored key's cell, or `None` (with
    /// a warning) when the key does not belong to this strategy.
    fn range_for_id(&self, partition_key: &[u8], sort_key: &[u8]) -> Option<NumericDataset>;

    /// Fixed partition-key width: tier byte plus fixed-size bin bytes.
    fn partition_key_length(&self) -> usize;

    /// Stable textual identity, equal across platforms for equal
    /// configurations. Used as a storage namespace key.
    fn id(&self) -> String;

    /// Distinct partition keys an entry would be written under.
    fn insertion_partition_keys(&self, data: &NumericDataset) -> Vec<Bytes> {
        let ids = self.insertion_ids(data);
        let keys: BTreeSet<Bytes> = ids
            .partitions()
            .iter()
            .filter_map(|p| p.partition_key().cloned())
            .collect();
        keys.into_iter().collect()
    }

    /// Distinct partition keys a query would touch.
    fn query_partition_keys(
        &self,
        query: &NumericDataset,
        metadata: Option<&TierMetadata>,
    ) -> Vec<Bytes> {
        let ranges = self.query_ranges(query, None, metadata);
        let keys: BTreeSet<Bytes> = ranges
            .partitions()
            .iter()
            .filter_map(|p| p.partition_key().cloned())
            .collect();
        keys.into_iter().collect()
    }
}
