//! Bin-aware glue over a single curve.
//!
//! Everything that combines bin labels with curve keys lives here: the
//! partition key is `tierByte ‖ binId`, so bin bytes compare before curve
//! bytes and each bin's rows stay contiguous. The strategies own the
//! curves and dimension definitions; these helpers only borrow them.

use crate::bytes_util;
use crate::data::{BinnedNumericDataset, NumericData, NumericDataset};
use crate::dimension::DimensionDefinition;
use crate::keys::{SinglePartitionInsertionIds, SinglePartitionQueryRanges};
use crate::sfc::HilbertSfc;
use bytes::{Bytes, BytesMut};
use num_bigint::BigUint;
use num_traits::One;

/// `tierByte ‖ binId`, or `None` when both are absent.
pub(crate) fn tier_and_bin(tier: Option<u8>, bin_id: &Bytes) -> Option<Bytes> {
    match tier {
        Some(tier) => {
            let mut key = BytesMut::with_capacity(1 + bin_id.len());
            key.extend_from_slice(&[tier]);
            key.extend_from_slice(bin_id);
            Some(key.freeze())
        }
        None if bin_id.is_empty() => None,
        None => Some(bin_id.clone()),
    }
}

/// A single insertion id iff the whole binned dataset fits one curve cell
/// at this precision: the estimate must be one row and both corners must
/// encode to the same key.
pub(crate) fn single_binned_insertion_id(
    row_count: &BigUint,
    tier: Option<u8>,
    bin: &BinnedNumericDataset,
    sfc: &HilbertSfc,
) -> Option<SinglePartitionInsertionIds> {
    if !row_count.is_one() {
        return None;
    }
    let mins = bin.mins();
    let maxes = bin.maxes();
    let min_id = sfc.encode(&mins);
    let single = if mins == maxes {
        min_id
    } else {
        let max_id = sfc.encode(&maxes);
        if min_id != max_id {
            return None;
        }
        min_id
    };
    Some(SinglePartitionInsertionIds::new(
        tier_and_bin(tier, bin.bin_id()),
        vec![single],
    ))
}

/// Full decomposition of an entry at one tier: every curve cell the entry
/// touches becomes one sort key.
pub(crate) fn decompose_ranges_for_entry(
    bin: &BinnedNumericDataset,
    tier: Option<u8>,
    sfc: &HilbertSfc,
) -> SinglePartitionInsertionIds {
    let decomposition = sfc.decompose_range(&bin.mins(), &bin.maxes(), false, None);
    let mut sort_keys = Vec::new();
    for range in decomposition.ranges() {
        let mut current = range.start().to_vec();
        loop {
            sort_keys.push(Bytes::copy_from_slice(&current));
            if current.as_slice() == range.end().as_ref() {
                break;
            }
            match bytes_util::increment(&current) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    SinglePartitionInsertionIds::new(tier_and_bin(tier, bin.bin_id()), sort_keys)
}

/// The sort keys for an entry at one tier, or `None` when the entry
/// spreads over more rows than the duplicate cap allows and a coarser tier
/// should be tried. `accept_any` marks the coarsest tier, which takes
/// whatever is left.
pub(crate) fn row_ids_at_tier(
    bin: &BinnedNumericDataset,
    tier: Option<u8>,
    sfc: &HilbertSfc,
    max_duplicates: Option<&BigUint>,
    accept_any: bool,
) -> Option<SinglePartitionInsertionIds> {
    let row_count = sfc.estimated_id_count(&bin.mins(), &bin.maxes());
    if let Some(single) = single_binned_insertion_id(&row_count, tier, bin, sfc) {
        return Some(single);
    }
    let within_cap = match max_duplicates {
        Some(cap) => row_count <= *cap,
        None => true,
    };
    if within_cap || accept_any {
        return Some(decompose_ranges_for_entry(bin, tier, sfc));
    }
    None
}

/// Query decomposition at one tier, one partition per bin.
pub(crate) fn query_ranges(
    binned_queries: &[BinnedNumericDataset],
    sfc: &HilbertSfc,
    max_ranges: Option<usize>,
    tier: Option<u8>,
) -> Vec<SinglePartitionQueryRanges> {
    binned_queries
        .iter()
        .map(|bin| {
            let decomposition = sfc.decompose_range(&bin.mins(), &bin.maxes(), true, max_ranges);
            SinglePartitionQueryRanges::new(
                tier_and_bin(tier, bin.bin_id()),
                decomposition.ranges().to_vec(),
            )
        })
        .collect()
}

/// Offset of the curve bytes inside a full row id.
pub(crate) fn sfc_key_offset(dimensions: &[DimensionDefinition]) -> usize {
    1 + dimensions
        .iter()
        .map(DimensionDefinition::fixed_bin_id_size)
        .sum::<usize>()
}

/// Per-dimension cell ordinals of a full row id.
pub(crate) fn coordinates_for_row(
    row: &[u8],
    dimensions: &[DimensionDefinition],
    sfc: &HilbertSfc,
) -> Option<Vec<u64>> {
    let offset = sfc_key_offset(dimensions);
    if row.len() < offset {
        log::warn!(
            "row id of {} bytes is shorter than the {} byte key prefix",
            row.len(),
            offset
        );
        return None;
    }
    Some(sfc.coordinates(&row[offset..]))
}

/// Real-value ranges of a full row id's cell, bin bytes folded back in.
pub(crate) fn range_for_row(
    row: &[u8],
    dimensions: &[DimensionDefinition],
    sfc: &HilbertSfc,
) -> Option<NumericDataset> {
    let offset = sfc_key_offset(dimensions);
    if row.len() < offset {
        log::warn!(
            "row id of {} bytes is shorter than the {} byte key prefix",
            row.len(),
            offset
        );
        return None;
    }
    let cell_ranges = sfc.decode(&row[offset..]);
    let mut bin_pos = 1;
    let data = dimensions
        .iter()
        .zip(cell_ranges)
        .map(|(dim, (lo, hi))| {
            let size = dim.fixed_bin_id_size();
            let bin = &row[bin_pos..bin_pos + size];
            bin_pos += size;
            let (real_lo, real_hi) = dim.denormalize(bin, lo, hi);
            NumericData::range(real_lo, real_hi)
        })
        .collect();
    Some(NumericDataset::new(data))
}
