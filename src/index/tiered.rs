//! The tiered strategy: a stack of curves at increasing precision.
//!
//! Coarse tiers hold entries that would shatter into too many cells at
//! fine precision; fine tiers hold everything else. Each tier is one
//! curve plus an arbitrary (injective) tier byte that leads every
//! partition key, so a store scan can address one precision level with a
//! one-byte prefix.

use crate::data::{apply_bins, NumericDataset};
use crate::dimension::DimensionDefinition;
use crate::error::{Result, TesseraError};
use crate::index::binned;
use crate::index::single_tier::SingleTierStrategy;
use crate::index::NumericIndexStrategy;
use crate::keys::{InsertionIds, QueryRanges, SinglePartitionInsertionIds};
use crate::sfc::HilbertSfc;
use crate::varint;
use num_bigint::BigUint;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

pub(crate) const DEFAULT_MAX_DUPLICATE_IDS_PER_DIMENSION: u64 = 2;

/// A hierarchical index strategy over multiple curves, coarsest first.
#[derive(Debug, Clone)]
pub struct TieredIndexStrategy {
    dimensions: Vec<DimensionDefinition>,
    /// Ordered coarse to fine.
    sfcs: Vec<HilbertSfc>,
    sfc_index_to_tier: Vec<u8>,
    tier_to_sfc_index: FxHashMap<u8, usize>,
    max_duplicates_per_dimension: u64,
    /// `caps[d]` = allowed duplicate ids for an entry with `d` ranged
    /// dimensions; a point (`d == 0`) always fits a single id.
    duplicate_caps: Vec<BigUint>,
}

impl TieredIndexStrategy {
    pub fn new(
        dimensions: Vec<DimensionDefinition>,
        sfcs: Vec<HilbertSfc>,
        tier_bytes: Vec<u8>,
    ) -> Self {
        Self::with_max_duplicates(
            dimensions,
            sfcs,
            tier_bytes,
            DEFAULT_MAX_DUPLICATE_IDS_PER_DIMENSION,
        )
    }

    pub fn with_max_duplicates(
        dimensions: Vec<DimensionDefinition>,
        sfcs: Vec<HilbertSfc>,
        tier_bytes: Vec<u8>,
        max_duplicates_per_dimension: u64,
    ) -> Self {
        assert!(!dimensions.is_empty(), "strategy needs dimensions");
        assert!(!sfcs.is_empty(), "strategy needs at least one tier");
        assert_eq!(
            sfcs.len(),
            tier_bytes.len(),
            "one tier byte per curve required"
        );
        let mut tier_to_sfc_index = FxHashMap::default();
        for (index, &tier) in tier_bytes.iter().enumerate() {
            let previous = tier_to_sfc_index.insert(tier, index);
            assert!(previous.is_none(), "tier byte {} assigned twice", tier);
        }
        let duplicate_caps = duplicate_caps(max_duplicates_per_dimension, dimensions.len());
        TieredIndexStrategy {
            dimensions,
            sfcs,
            sfc_index_to_tier: tier_bytes,
            tier_to_sfc_index,
            max_duplicates_per_dimension,
            duplicate_caps,
        }
    }

    pub fn dimensions(&self) -> &[DimensionDefinition] {
        &self.dimensions
    }

    pub fn tier_count(&self) -> usize {
        self.sfcs.len()
    }

    pub fn tier_exists(&self, tier: u8) -> bool {
        self.tier_to_sfc_index.contains_key(&tier)
    }

    /// Cells per dimension at the finest tier.
    pub fn highest_precision_range_per_dimension(&self) -> Vec<f64> {
        self.sfcs[self.sfcs.len() - 1].insertion_id_range_per_dimension()
    }

    /// Each tier as a standalone fixed-tier strategy, coarsest first.
    pub fn sub_strategies(&self) -> Vec<SingleTierStrategy> {
        self.sfcs
            .iter()
            .zip(&self.sfc_index_to_tier)
            .map(|(sfc, &tier)| {
                SingleTierStrategy::new(self.dimensions.clone(), sfc.clone(), tier)
            })
            .collect()
    }

    /// Fresh, all-zero tier metadata for this strategy.
    pub fn create_metadata(&self) -> TierMetadata {
        TierMetadata::new(self.sfc_index_to_tier.clone())
    }

    /// Re-key an entry currently stored at `partition_key`/`sort_key`
    /// onto `tier`. `None` (with a warning) when either tier byte is
    /// unknown.
    pub fn reproject_to_tier(
        &self,
        partition_key: &[u8],
        sort_key: &[u8],
        tier: u8,
        max_duplicates: Option<u64>,
    ) -> Option<InsertionIds> {
        let range = self.range_for_id(partition_key, sort_key)?;
        let &sfc_index = match self.tier_to_sfc_index.get(&tier) {
            Some(index) => index,
            None => {
                log::warn!("cannot reproject to unknown tier {}", tier);
                return None;
            }
        };
        let cap = max_duplicates.map(BigUint::from);
        let partitions = apply_bins(&range, &self.dimensions)
            .iter()
            .filter_map(|bin| {
                binned::row_ids_at_tier(
                    bin,
                    Some(tier),
                    &self.sfcs[sfc_index],
                    cap.as_ref(),
                    true,
                )
            })
            .collect();
        Some(InsertionIds::new(partitions))
    }

    fn internal_insertion_ids(&self, data: &NumericDataset, cap: &BigUint) -> InsertionIds {
        if data.is_empty() {
            log::warn!(
                "cannot index empty fields, skipping row for index '{}'",
                self.id()
            );
            return InsertionIds::empty();
        }
        let partitions = apply_bins(data, &self.dimensions)
            .iter()
            .map(|bin| self.row_ids(bin, cap))
            .collect();
        InsertionIds::new(partitions)
    }

    /// Walk tiers finest to coarsest until one accepts the entry. The
    /// coarsest tier always accepts, so this cannot come back empty.
    fn row_ids(
        &self,
        bin: &crate::data::BinnedNumericDataset,
        cap: &BigUint,
    ) -> SinglePartitionInsertionIds {
        for sfc_index in (0..self.sfcs.len()).rev() {
            let tier = self.sfc_index_to_tier[sfc_index];
            if let Some(ids) = binned::row_ids_at_tier(
                bin,
                Some(tier),
                &self.sfcs[sfc_index],
                Some(cap),
                sfc_index == 0,
            ) {
                return ids;
            }
        }
        SinglePartitionInsertionIds::new(None, Vec::new())
    }

    fn ranged_dimension_count(&self, data: &NumericDataset) -> usize {
        data.data()
            .iter()
            .filter(|d| d.min() != d.max())
            .count()
            .min(self.duplicate_caps.len() - 1)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        varint::encode_count(self.sfcs.len(), &mut buf);
        varint::encode_count(self.dimensions.len(), &mut buf);
        varint::encode_count(self.sfc_index_to_tier.len(), &mut buf);
        varint::encode_varint(self.max_duplicates_per_dimension, &mut buf);
        for sfc in &self.sfcs {
            let bytes = sfc.to_binary();
            varint::encode_count(bytes.len(), &mut buf);
            buf.extend_from_slice(&bytes);
        }
        for dim in &self.dimensions {
            let mut bytes = Vec::new();
            dim.to_binary(&mut bytes);
            varint::encode_count(bytes.len(), &mut buf);
            buf.extend_from_slice(&bytes);
        }
        for (index, &tier) in self.sfc_index_to_tier.iter().enumerate() {
            buf.push(index as u8);
            buf.push(tier);
        }
        buf
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let num_sfcs = varint::decode_count(bytes, &mut pos)?;
        let num_dims = varint::decode_count(bytes, &mut pos)?;
        let mapping_size = varint::decode_count(bytes, &mut pos)?;
        let max_duplicates = varint::decode_varint(bytes, &mut pos)?;
        if num_sfcs == 0 || num_dims == 0 || mapping_size != num_sfcs || num_sfcs > 256 {
            return Err(TesseraError::CorruptFormat(format!(
                "inconsistent tiered strategy header: {} curves, {} dimensions, {} mappings",
                num_sfcs, num_dims, mapping_size
            )));
        }
        let mut sfcs = Vec::with_capacity(num_sfcs);
        for _ in 0..num_sfcs {
            let len = varint::decode_count(bytes, &mut pos)?;
            let chunk = varint::read_bytes(bytes, &mut pos, len)?;
            let sfc = HilbertSfc::from_binary(chunk)?;
            if sfc.dimension_count() != num_dims {
                return Err(TesseraError::CorruptFormat(format!(
                    "curve spans {} dimensions, strategy has {}",
                    sfc.dimension_count(),
                    num_dims
                )));
            }
            sfcs.push(sfc);
        }
        let mut dimensions = Vec::with_capacity(num_dims);
        for _ in 0..num_dims {
            let len = varint::decode_count(bytes, &mut pos)?;
            let chunk = varint::read_bytes(bytes, &mut pos, len)?;
            let mut chunk_pos = 0;
            let dim = DimensionDefinition::from_binary(chunk, &mut chunk_pos)?;
            if chunk_pos != chunk.len() {
                return Err(TesseraError::CorruptFormat(
                    "trailing bytes after dimension definition".into(),
                ));
            }
            dimensions.push(dim);
        }
        let mut tier_bytes = vec![0u8; num_sfcs];
        let mut seen = vec![false; num_sfcs];
        let mut seen_tiers = [false; 256];
        for _ in 0..mapping_size {
            let pair = varint::read_bytes(bytes, &mut pos, 2)?;
            let sfc_index = pair[0] as usize;
            if sfc_index >= num_sfcs || seen[sfc_index] || seen_tiers[pair[1] as usize] {
                return Err(TesseraError::CorruptFormat(format!(
                    "bad tier mapping entry for curve index {}",
                    pair[0]
                )));
            }
            seen[sfc_index] = true;
            seen_tiers[pair[1] as usize] = true;
            tier_bytes[sfc_index] = pair[1];
        }
        if pos != bytes.len() {
            return Err(TesseraError::CorruptFormat(
                "trailing bytes after tiered strategy".into(),
            ));
        }
        Ok(Self::with_max_duplicates(
            dimensions,
            sfcs,
            tier_bytes,
            max_duplicates,
        ))
    }
}

impl NumericIndexStrategy for TieredIndexStrategy {
    fn insertion_ids(&self, data: &NumericDataset) -> InsertionIds {
        let cap = &self.duplicate_caps[self.ranged_dimension_count(data)];
        self.internal_insertion_ids(data, cap)
    }

    fn insertion_ids_with_max_duplicates(
        &self,
        data: &NumericDataset,
        max_duplicates: u64,
    ) -> InsertionIds {
        self.internal_insertion_ids(data, &BigUint::from(max_duplicates))
    }

    fn query_ranges(
        &self,
        query: &NumericDataset,
        max_ranges: Option<usize>,
        metadata: Option<&TierMetadata>,
    ) -> QueryRanges {
        if query.is_empty() {
            log::warn!("degenerate query box, returning no ranges");
            return QueryRanges::empty();
        }
        let binned = apply_bins(query, &self.dimensions);
        let mut partitions = Vec::new();
        for sfc_index in (0..self.sfcs.len()).rev() {
            if let Some(metadata) = metadata {
                if metadata.tier_count(sfc_index) == 0 {
                    continue;
                }
            }
            let tier = self.sfc_index_to_tier[sfc_index];
            partitions.extend(binned::query_ranges(
                &binned,
                &self.sfcs[sfc_index],
                max_ranges,
                Some(tier),
            ));
        }
        QueryRanges::new(partitions)
    }

    fn coordinates_for_id(&self, partition_key: &[u8], sort_key: &[u8]) -> Option<Vec<u64>> {
        let (sfc_index, row) = self.locate(partition_key, sort_key)?;
        binned::coordinates_for_row(&row, &self.dimensions, &self.sfcs[sfc_index])
    }

    fn range_for_id(&self, partition_key: &[u8], sort_key: &[u8]) -> Option<NumericDataset> {
        let (sfc_index, row) = self.locate(partition_key, sort_key)?;
        binned::range_for_row(&row, &self.dimensions, &self.sfcs[sfc_index])
    }

    fn partition_key_length(&self) -> usize {
        binned::sfc_key_offset(&self.dimensions)
    }

    fn id(&self) -> String {
        let digest = Sha256::digest(self.to_binary());
        hex::encode(&digest[..8])
    }
}

impl TieredIndexStrategy {
    fn locate(&self, partition_key: &[u8], sort_key: &[u8]) -> Option<(usize, Vec<u8>)> {
        let Some(&tier) = partition_key.first() else {
            log::warn!("partition key must at least contain a byte for the tier");
            return None;
        };
        let Some(&sfc_index) = self.tier_to_sfc_index.get(&tier) else {
            log::warn!("unknown tier byte {} for this strategy", tier);
            return None;
        };
        let mut row = Vec::with_capacity(partition_key.len() + sort_key.len());
        row.extend_from_slice(partition_key);
        row.extend_from_slice(sort_key);
        Some((sfc_index, row))
    }
}

fn duplicate_caps(max_per_dimension: u64, dimensions: usize) -> Vec<BigUint> {
    (0..=dimensions as u32)
        .map(|extent| BigUint::from(max_per_dimension).pow(extent))
        .collect()
}

/// Per-tier row counts, kept by the storage layer so queries can skip
/// tiers that hold nothing. Mergeable so counts computed in parallel can
/// be combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierMetadata {
    tier_counts: Vec<u64>,
    /// Tier byte per sfc index, mirroring the owning strategy.
    sfc_index_to_tier: Vec<u8>,
    tier_to_sfc_index: FxHashMap<u8, usize>,
}

impl TierMetadata {
    fn new(sfc_index_to_tier: Vec<u8>) -> Self {
        let tier_to_sfc_index = sfc_index_to_tier
            .iter()
            .enumerate()
            .map(|(index, &tier)| (tier, index))
            .collect();
        TierMetadata {
            tier_counts: vec![0; sfc_index_to_tier.len()],
            sfc_index_to_tier,
            tier_to_sfc_index,
        }
    }

    pub fn tier_count(&self, sfc_index: usize) -> u64 {
        self.tier_counts.get(sfc_index).copied().unwrap_or(0)
    }

    /// Account for freshly written ids. Partition keys with an unknown
    /// tier byte are ignored.
    pub fn insertion_ids_added(&mut self, ids: &InsertionIds) {
        for partition in ids.partitions() {
            if let Some(index) = self.sfc_index_of(partition) {
                self.tier_counts[index] += partition.sort_keys().len() as u64;
            }
        }
    }

    /// Account for deleted ids; the mirror of
    /// [`insertion_ids_added`](Self::insertion_ids_added).
    pub fn insertion_ids_removed(&mut self, ids: &InsertionIds) {
        for partition in ids.partitions() {
            if let Some(index) = self.sfc_index_of(partition) {
                let count = &mut self.tier_counts[index];
                *count = count.saturating_sub(partition.sort_keys().len() as u64);
            }
        }
    }

    fn sfc_index_of(&self, partition: &SinglePartitionInsertionIds) -> Option<usize> {
        let tier = *partition.partition_key()?.first()?;
        self.tier_to_sfc_index.get(&tier).copied()
    }

    /// Elementwise addition over the same tier set; commutative and
    /// associative.
    pub fn merge(&mut self, other: &TierMetadata) {
        debug_assert_eq!(self.sfc_index_to_tier, other.sfc_index_to_tier);
        for (count, extra) in self.tier_counts.iter_mut().zip(&other.tier_counts) {
            *count += extra;
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        varint::encode_count(self.tier_counts.len(), &mut buf);
        for &count in &self.tier_counts {
            varint::encode_varint(count, &mut buf);
        }
        for (index, &tier) in self.sfc_index_to_tier.iter().enumerate() {
            buf.push(tier);
            buf.push(index as u8);
        }
        buf
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let num_tiers = varint::decode_count(bytes, &mut pos)?;
        if num_tiers > 256 {
            return Err(TesseraError::CorruptFormat(format!(
                "tier metadata with {} tiers",
                num_tiers
            )));
        }
        let mut tier_counts = Vec::with_capacity(num_tiers);
        for _ in 0..num_tiers {
            tier_counts.push(varint::decode_varint(bytes, &mut pos)?);
        }
        let mut sfc_index_to_tier = vec![0u8; num_tiers];
        let mut seen = vec![false; num_tiers];
        for _ in 0..num_tiers {
            let pair = varint::read_bytes(bytes, &mut pos, 2)?;
            let index = pair[1] as usize;
            if index >= num_tiers || seen[index] {
                return Err(TesseraError::CorruptFormat(format!(
                    "bad tier metadata mapping for curve index {}",
                    pair[1]
                )));
            }
            seen[index] = true;
            sfc_index_to_tier[index] = pair[0];
        }
        if pos != bytes.len() {
            return Err(TesseraError::CorruptFormat(
                "trailing bytes after tier metadata".into(),
            ));
        }
        let tier_to_sfc_index = sfc_index_to_tier
            .iter()
            .enumerate()
            .map(|(index, &tier)| (tier, index))
            .collect();
        Ok(TierMetadata {
            tier_counts,
            sfc_index_to_tier,
            tier_to_sfc_index,
        })
    }
}
