//! Key containers: what the index hands to a lexicographic key-value store.
//!
//! Partition keys group rows (tier byte plus bin bytes here); sort keys
//! order rows within a partition (the curve index). All ranges are
//! inclusive on both ends; adapting to exclusive-end stores is the storage
//! layer's job (`bytes_util::increment`).

use bytes::{Bytes, BytesMut};

/// An inclusive `[start, end]` range of byte-string keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    start: Bytes,
    end: Bytes,
}

impl ByteRange {
    pub fn new(start: Bytes, end: Bytes) -> Self {
        debug_assert!(start <= end);
        ByteRange { start, end }
    }

    pub fn start(&self) -> &Bytes {
        &self.start
    }

    pub fn end(&self) -> &Bytes {
        &self.end
    }

    /// True when the range addresses exactly one key.
    pub fn is_single_value(&self) -> bool {
        self.start == self.end
    }
}

/// An ordered, disjoint set of curve ranges produced by decomposing one
/// query box on one curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDecomposition {
    ranges: Vec<ByteRange>,
}

impl RangeDecomposition {
    pub fn new(ranges: Vec<ByteRange>) -> Self {
        RangeDecomposition { ranges }
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

fn combine(partition_key: Option<&Bytes>, sort_key: &Bytes) -> Bytes {
    match partition_key {
        None => sort_key.clone(),
        Some(pk) => {
            let mut out = BytesMut::with_capacity(pk.len() + sort_key.len());
            out.extend_from_slice(pk);
            out.extend_from_slice(sort_key);
            out.freeze()
        }
    }
}

/// The sort keys a single logical entry occupies under one partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinglePartitionInsertionIds {
    partition_key: Option<Bytes>,
    sort_keys: Vec<Bytes>,
}

impl SinglePartitionInsertionIds {
    pub fn new(partition_key: Option<Bytes>, sort_keys: Vec<Bytes>) -> Self {
        SinglePartitionInsertionIds {
            partition_key,
            sort_keys,
        }
    }

    pub fn partition_key(&self) -> Option<&Bytes> {
        self.partition_key.as_ref()
    }

    pub fn sort_keys(&self) -> &[Bytes] {
        &self.sort_keys
    }

    /// Partition key and sort key concatenated, one id per sort key. A
    /// partition with no sort keys is itself the id (degenerate tiers).
    pub fn composite_ids(&self) -> Vec<Bytes> {
        if self.sort_keys.is_empty() {
            return self.partition_key.iter().cloned().collect();
        }
        self.sort_keys
            .iter()
            .map(|sk| combine(self.partition_key.as_ref(), sk))
            .collect()
    }
}

/// Every key at which one logical entry is stored, across partitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsertionIds {
    partitions: Vec<SinglePartitionInsertionIds>,
}

impl InsertionIds {
    pub fn new(partitions: Vec<SinglePartitionInsertionIds>) -> Self {
        InsertionIds { partitions }
    }

    pub fn empty() -> Self {
        InsertionIds::default()
    }

    pub fn partitions(&self) -> &[SinglePartitionInsertionIds] {
        &self.partitions
    }

    pub fn composite_ids(&self) -> Vec<Bytes> {
        self.partitions
            .iter()
            .flat_map(SinglePartitionInsertionIds::composite_ids)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// Sort-key ranges under one partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinglePartitionQueryRanges {
    partition_key: Option<Bytes>,
    ranges: Vec<ByteRange>,
}

impl SinglePartitionQueryRanges {
    pub fn new(partition_key: Option<Bytes>, ranges: Vec<ByteRange>) -> Self {
        SinglePartitionQueryRanges {
            partition_key,
            ranges,
        }
    }

    pub fn partition_key(&self) -> Option<&Bytes> {
        self.partition_key.as_ref()
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }
}

/// The full answer to a query decomposition: ranges grouped by partition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRanges {
    partitions: Vec<SinglePartitionQueryRanges>,
}

impl QueryRanges {
    pub fn new(partitions: Vec<SinglePartitionQueryRanges>) -> Self {
        QueryRanges { partitions }
    }

    pub fn empty() -> Self {
        QueryRanges::default()
    }

    pub fn partitions(&self) -> &[SinglePartitionQueryRanges] {
        &self.partitions
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Flatten to full-key ranges (partition key prepended to both ends).
    pub fn composite_query_ranges(&self) -> Vec<ByteRange> {
        self.partitions
            .iter()
            .flat_map(|p| {
                p.ranges.iter().map(move |r| {
                    ByteRange::new(
                        combine(p.partition_key.as_ref(), &r.start),
                        combine(p.partition_key.as_ref(), &r.end),
                    )
                })
            })
            .collect()
    }
}
