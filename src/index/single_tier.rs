//! A strategy pinned to one precision level of a tiered stack.

use crate::data::{apply_bins, NumericDataset};
use crate::dimension::DimensionDefinition;
use crate::index::binned;
use crate::index::tiered::TierMetadata;
use crate::index::NumericIndexStrategy;
use crate::keys::{InsertionIds, QueryRanges};
use crate::sfc::HilbertSfc;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

/// One curve with a fixed tier byte. Useful when the caller wants to
/// address a single precision level directly; every entry is accepted at
/// this tier regardless of how many cells it spreads over.
#[derive(Debug, Clone)]
pub struct SingleTierStrategy {
    dimensions: Vec<DimensionDefinition>,
    sfc: HilbertSfc,
    tier: u8,
}

impl SingleTierStrategy {
    pub fn new(dimensions: Vec<DimensionDefinition>, sfc: HilbertSfc, tier: u8) -> Self {
        assert!(!dimensions.is_empty(), "strategy needs dimensions");
        SingleTierStrategy {
            dimensions,
            sfc,
            tier,
        }
    }

    pub fn tier(&self) -> u8 {
        self.tier
    }

    pub fn sfc(&self) -> &HilbertSfc {
        &self.sfc
    }

    fn internal_insertion_ids(
        &self,
        data: &NumericDataset,
        max_duplicates: Option<&BigUint>,
    ) -> InsertionIds {
        if data.is_empty() {
            log::warn!(
                "cannot index empty fields, skipping row for tier {}",
                self.tier
            );
            return InsertionIds::empty();
        }
        let partitions = apply_bins(data, &self.dimensions)
            .iter()
            .filter_map(|bin| {
                binned::row_ids_at_tier(bin, Some(self.tier), &self.sfc, max_duplicates, true)
            })
            .collect();
        InsertionIds::new(partitions)
    }

    fn check_tier(&self, partition_key: &[u8]) -> bool {
        match partition_key.first() {
            Some(&tier) if tier == self.tier => true,
            Some(&tier) => {
                log::warn!("tier byte {} does not match this strategy's {}", tier, self.tier);
                false
            }
            None => {
                log::warn!("partition key must at least contain a byte for the tier");
                false
            }
        }
    }

    fn row(&self, partition_key: &[u8], sort_key: &[u8]) -> Vec<u8> {
        let mut row = Vec::with_capacity(partition_key.len() + sort_key.len());
        row.extend_from_slice(partition_key);
        row.extend_from_slice(sort_key);
        row
    }
}

impl NumericIndexStrategy for SingleTierStrategy {
    fn insertion_ids(&self, data: &NumericDataset) -> InsertionIds {
        self.internal_insertion_ids(data, None)
    }

    fn insertion_ids_with_max_duplicates(
        &self,
        data: &NumericDataset,
        max_duplicates: u64,
    ) -> InsertionIds {
        self.internal_insertion_ids(data, Some(&BigUint::from(max_duplicates)))
    }

    fn query_ranges(
        &self,
        query: &NumericDataset,
        max_ranges: Option<usize>,
        _metadata: Option<&TierMetadata>,
    ) -> QueryRanges {
        if query.is_empty() {
            log::warn!("degenerate query box, returning no ranges");
            return QueryRanges::empty();
        }
        let binned = apply_bins(query, &self.dimensions);
        QueryRanges::new(binned::query_ranges(
            &binned,
            &self.sfc,
            max_ranges,
            Some(self.tier),
        ))
    }

    fn coordinates_for_id(&self, partition_key: &[u8], sort_key: &[u8]) -> Option<Vec<u64>> {
        if !self.check_tier(partition_key) {
            return None;
        }
        binned::coordinates_for_row(&self.row(partition_key, sort_key), &self.dimensions, &self.sfc)
    }

    fn range_for_id(&self, partition_key: &[u8], sort_key: &[u8]) -> Option<NumericDataset> {
        if !self.check_tier(partition_key) {
            return None;
        }
        binned::range_for_row(&self.row(partition_key, sort_key), &self.dimensions, &self.sfc)
    }

    fn partition_key_length(&self) -> usize {
        binned::sfc_key_offset(&self.dimensions)
    }

    fn id(&self) -> String {
        let mut bytes = vec![self.tier];
        bytes.extend_from_slice(&self.sfc.to_binary());
        for dim in &self.dimensions {
            dim.to_binary(&mut bytes);
        }
        let digest = Sha256::digest(&bytes);
        hex::encode(&digest[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NumericData;
    use crate::sfc::SfcDimension;

    fn strategy(bits: u32, tier: u8) -> SingleTierStrategy {
        let dimensions = vec![
            DimensionDefinition::longitude(),
            DimensionDefinition::latitude(true),
        ];
        let sfc = HilbertSfc::new(
            dimensions
                .iter()
                .map(|d| SfcDimension::new(d.clone(), bits))
                .collect(),
        );
        SingleTierStrategy::new(dimensions, sfc, tier)
    }

    #[test]
    fn test_all_entries_land_on_the_fixed_tier() {
        let strategy = strategy(6, 6);
        let wide = NumericDataset::new(vec![
            NumericData::range(-170.0, 170.0),
            NumericData::range(-80.0, 80.0),
        ]);
        let ids = strategy.insertion_ids(&wide);
        assert!(!ids.is_empty());
        for id in ids.composite_ids() {
            assert_eq!(id[0], 6);
        }
    }

    #[test]
    fn test_query_ranges_single_partition_prefix() {
        let strategy = strategy(6, 6);
        let query = NumericDataset::new(vec![
            NumericData::range(10.0, 20.0),
            NumericData::range(10.0, 20.0),
        ]);
        let ranges = strategy.query_ranges(&query, Some(8), None);
        assert!(!ranges.is_empty());
        for partition in ranges.partitions() {
            assert_eq!(partition.partition_key().unwrap().as_ref(), &[6]);
        }
    }

    #[test]
    fn test_mismatched_tier_is_rejected_softly() {
        let strategy = strategy(6, 6);
        let point = NumericDataset::new(vec![
            NumericData::Value(0.0),
            NumericData::Value(0.0),
        ]);
        let ids = strategy.insertion_ids(&point);
        let partition = &ids.partitions()[0];
        let sort_key = &partition.sort_keys()[0];
        assert!(strategy
            .coordinates_for_id(partition.partition_key().unwrap(), sort_key)
            .is_some());
        assert!(strategy.coordinates_for_id(&[7], sort_key).is_none());
    }
}
