//! Multi-dimensional numeric data: the input side of the index.
//!
//! A dataset holds one value or range per dimension. Before any curve sees
//! it, the dataset is pushed through the dimension definitions' binning,
//! producing one [`BinnedNumericDataset`] per combination of per-dimension
//! bins (for bounded dimensions there is exactly one).

use crate::dimension::DimensionDefinition;
use bytes::{Bytes, BytesMut};

/// A single dimension's worth of data: an exact value or a closed range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericData {
    Value(f64),
    Range { min: f64, max: f64 },
}

impl NumericData {
    /// Closed range constructor; bounds are normalized so `min <= max`.
    pub fn range(min: f64, max: f64) -> Self {
        if min <= max {
            NumericData::Range { min, max }
        } else {
            NumericData::Range { min: max, max: min }
        }
    }

    pub fn min(&self) -> f64 {
        match *self {
            NumericData::Value(v) => v,
            NumericData::Range { min, .. } => min,
        }
    }

    pub fn max(&self) -> f64 {
        match *self {
            NumericData::Value(v) => v,
            NumericData::Range { max, .. } => max,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, NumericData::Range { .. })
    }
}

/// An N-dimensional tuple of numeric data, one entry per dimension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NumericDataset {
    data: Vec<NumericData>,
}

impl NumericDataset {
    pub fn new(data: Vec<NumericData>) -> Self {
        NumericDataset { data }
    }

    pub fn data(&self) -> &[NumericData] {
        &self.data
    }

    pub fn dimension_count(&self) -> usize {
        self.data.len()
    }

    pub fn mins(&self) -> Vec<f64> {
        self.data.iter().map(NumericData::min).collect()
    }

    pub fn maxes(&self) -> Vec<f64> {
        self.data.iter().map(NumericData::max).collect()
    }

    /// A dataset is empty when it has no dimensions or any bound is not a
    /// finite number (the shape produced by empty or degenerate
    /// geometries upstream).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
            || self
                .data
                .iter()
                .any(|d| !d.min().is_finite() || !d.max().is_finite())
    }
}

impl From<Vec<NumericData>> for NumericDataset {
    fn from(data: Vec<NumericData>) -> Self {
        NumericDataset::new(data)
    }
}

/// One bin of one dimension: the bin's label bytes (empty for unbinned
/// dimensions) and the portion of the input range that falls inside it,
/// expressed in the dimension's value domain.
#[derive(Debug, Clone, PartialEq)]
pub struct BinRange {
    pub bin_id: Bytes,
    pub min: f64,
    pub max: f64,
}

impl BinRange {
    pub fn new(bin_id: Bytes, min: f64, max: f64) -> Self {
        BinRange { bin_id, min, max }
    }

    /// A bin range with no label, for dimensions that do not bin.
    pub fn unbinned(min: f64, max: f64) -> Self {
        BinRange {
            bin_id: Bytes::new(),
            min,
            max,
        }
    }
}

/// A dataset after binning: the concatenated per-dimension bin labels and
/// the per-dimension ranges, each in its dimension's value domain.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedNumericDataset {
    bin_id: Bytes,
    ranges: Vec<(f64, f64)>,
}

impl BinnedNumericDataset {
    pub fn new(bin_id: Bytes, ranges: Vec<(f64, f64)>) -> Self {
        BinnedNumericDataset { bin_id, ranges }
    }

    pub fn bin_id(&self) -> &Bytes {
        &self.bin_id
    }

    pub fn ranges(&self) -> &[(f64, f64)] {
        &self.ranges
    }

    pub fn mins(&self) -> Vec<f64> {
        self.ranges.iter().map(|r| r.0).collect()
    }

    pub fn maxes(&self) -> Vec<f64> {
        self.ranges.iter().map(|r| r.1).collect()
    }
}

/// The per-dimension bin lists for a dataset, without forming the product.
pub fn binned_ranges_per_dimension(
    dataset: &NumericDataset,
    dimensions: &[DimensionDefinition],
) -> Vec<Vec<BinRange>> {
    dataset
        .data()
        .iter()
        .zip(dimensions)
        .map(|(data, dim)| dim.normalize(data.min(), data.max()))
        .collect()
}

/// Apply each dimension's binning and form the Cartesian product across
/// dimensions. A point on unbinned dimensions yields exactly one dataset;
/// a range spanning `k` bins on one dimension yields `k`.
pub fn apply_bins(
    dataset: &NumericDataset,
    dimensions: &[DimensionDefinition],
) -> Vec<BinnedNumericDataset> {
    let per_dimension = binned_ranges_per_dimension(dataset, dimensions);
    if per_dimension.iter().any(Vec::is_empty) {
        return Vec::new();
    }

    let mut combos: Vec<(BytesMut, Vec<(f64, f64)>)> = vec![(BytesMut::new(), Vec::new())];
    for bins in &per_dimension {
        let mut next = Vec::with_capacity(combos.len() * bins.len());
        for (bin_id, ranges) in &combos {
            for bin in bins {
                let mut id = bin_id.clone();
                id.extend_from_slice(&bin.bin_id);
                let mut r = ranges.clone();
                r.push((bin.min, bin.max));
                next.push((id, r));
            }
        }
        combos = next;
    }

    combos
        .into_iter()
        .map(|(bin_id, ranges)| BinnedNumericDataset::new(bin_id.freeze(), ranges))
        .collect()
}
