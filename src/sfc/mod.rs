//! Compact Hilbert space-filling curve.
//!
//! A curve interleaves N integer coordinates, each with its own bit
//! budget, into a single locality-preserving index rendered as a
//! fixed-width big-endian key. The inverse direction decomposes an
//! N-dimensional query box into a short list of contiguous key ranges.
//!
//! Two arithmetic backends implement the operations; the right one is
//! picked per operation family at construction and never changes:
//!
//! * primitive (64-bit) — encode/decode while every dimension fits 48
//!   bits, decomposition while the total precision fits 62 bits;
//! * unbounded (`BigUint`/`BigDecimal`) — always valid, slower.
//!
//! Both agree wherever both apply.

pub mod cache;
mod dimension;
mod ops;
mod primitive;
mod unbounded;

pub use dimension::SfcDimension;

use crate::error::{Result, TesseraError};
use crate::keys::RangeDecomposition;
use crate::sfc::cache::QueryCacheKey;
use crate::sfc::primitive::PrimitiveOps;
use crate::sfc::unbounded::UnboundedOps;
use crate::varint;
use bytes::Bytes;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::hash::{Hash, Hasher};

/// Per-dimension bit width beyond which 64-bit value normalization runs
/// out of headroom.
const PRIMITIVE_MAX_BITS_PER_DIMENSION: u32 = 48;

/// Total precision beyond which whole-curve ranges no longer fit `u64`.
const PRIMITIVE_MAX_TOTAL_PRECISION: u32 = 62;

/// Label arithmetic packs one bit per dimension into a `u64`.
const MAX_DIMENSIONS: usize = 32;

#[derive(Debug, Clone)]
enum HilbertOperations {
    Primitive(PrimitiveOps),
    Unbounded(UnboundedOps),
}

/// A compact Hilbert curve over a fixed set of dimensions.
///
/// Immutable after construction and freely shareable across threads.
#[derive(Debug, Clone)]
pub struct HilbertSfc {
    dimensions: Vec<SfcDimension>,
    total_bits: u32,
    id_ops: HilbertOperations,
    /// Present only when decomposition needs a different backend than
    /// encode/decode.
    decompose_ops: Option<HilbertOperations>,
}

impl HilbertSfc {
    pub fn new(dimensions: Vec<SfcDimension>) -> Self {
        assert!(!dimensions.is_empty(), "curve needs at least one dimension");
        assert!(
            dimensions.len() <= MAX_DIMENSIONS,
            "curve supports at most {} dimensions",
            MAX_DIMENSIONS
        );
        let total: u64 = dimensions.iter().map(|d| d.bits() as u64).sum();
        assert!(total <= u32::MAX as u64, "total precision out of range");
        let total_bits = total as u32;

        let primitive_for_ids = dimensions
            .iter()
            .all(|d| d.bits() <= PRIMITIVE_MAX_BITS_PER_DIMENSION);
        let primitive_for_decompose = total_bits <= PRIMITIVE_MAX_TOTAL_PRECISION;

        let (id_ops, decompose_ops) = match (primitive_for_ids, primitive_for_decompose) {
            (true, true) => (
                HilbertOperations::Primitive(PrimitiveOps::new(&dimensions)),
                None,
            ),
            (false, false) => (
                HilbertOperations::Unbounded(UnboundedOps::new(&dimensions)),
                None,
            ),
            (true, false) => (
                HilbertOperations::Primitive(PrimitiveOps::new(&dimensions)),
                Some(HilbertOperations::Unbounded(UnboundedOps::new(&dimensions))),
            ),
            (false, true) => (
                HilbertOperations::Unbounded(UnboundedOps::new(&dimensions)),
                Some(HilbertOperations::Primitive(PrimitiveOps::new(&dimensions))),
            ),
        };

        HilbertSfc {
            dimensions,
            total_bits,
            id_ops,
            decompose_ops,
        }
    }

    pub fn dimensions(&self) -> &[SfcDimension] {
        &self.dimensions
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Total bits across all dimensions.
    pub fn total_precision(&self) -> u32 {
        self.total_bits
    }

    /// Width in bytes of every key this curve produces.
    pub fn key_length(&self) -> usize {
        (self.total_bits as usize).div_ceil(8)
    }

    /// Index a value tuple. Values are clamped into their dimension's
    /// domain; the key is big-endian, `key_length()` bytes.
    pub fn encode(&self, values: &[f64]) -> Bytes {
        assert_eq!(
            values.len(),
            self.dimensions.len(),
            "value count must match dimension count"
        );
        match &self.id_ops {
            HilbertOperations::Primitive(ops) => ops.encode(values),
            HilbertOperations::Unbounded(ops) => ops.encode(values),
        }
    }

    /// Invert a key to the per-dimension value ranges of its cell; each
    /// range is `[cell start, cell end)` in the dimension's value domain.
    pub fn decode(&self, key: &[u8]) -> Vec<(f64, f64)> {
        match &self.id_ops {
            HilbertOperations::Primitive(ops) => {
                let cells = ops.decode(key);
                cells
                    .iter()
                    .enumerate()
                    .map(|(j, &c)| ops.denormalize_cell(j, c))
                    .collect()
            }
            HilbertOperations::Unbounded(ops) => {
                let cells = ops.decode(key);
                cells
                    .iter()
                    .enumerate()
                    .map(|(j, c)| ops.denormalize_cell(j, c))
                    .collect()
            }
        }
    }

    /// Per-dimension cell ordinals of a key. On the unbounded backend,
    /// ordinals past `u64` saturate.
    pub fn coordinates(&self, key: &[u8]) -> Vec<u64> {
        match &self.id_ops {
            HilbertOperations::Primitive(ops) => ops.decode(key),
            HilbertOperations::Unbounded(ops) => ops
                .decode(key)
                .iter()
                .map(|c| c.to_u64().unwrap_or(u64::MAX))
                .collect(),
        }
    }

    /// Cells `[lo, hi]` touched by `[min, max]` on one dimension, strict
    /// at the edges.
    pub fn normalize_range(&self, min: f64, max: f64, dimension: usize) -> (u64, u64) {
        match &self.id_ops {
            HilbertOperations::Primitive(ops) => ops.normalize_range(dimension, min, max, false),
            HilbertOperations::Unbounded(ops) => {
                let (lo, hi) = ops.normalize_range(dimension, min, max, false);
                (
                    lo.to_u64().unwrap_or(u64::MAX),
                    hi.to_u64().unwrap_or(u64::MAX),
                )
            }
        }
    }

    /// `min(product of per-dimension cell extents, 2^total)`: how many
    /// keys a box would occupy at this curve's precision.
    pub fn estimated_id_count(&self, mins: &[f64], maxes: &[f64]) -> BigUint {
        match &self.id_ops {
            HilbertOperations::Primitive(ops) => ops.estimated_id_count(mins, maxes),
            HilbertOperations::Unbounded(ops) => ops.estimated_id_count(mins, maxes),
        }
    }

    /// Cells per dimension at this curve's precision.
    pub fn insertion_id_range_per_dimension(&self) -> Vec<f64> {
        self.dimensions
            .iter()
            .map(|d| (d.bits() as f64).exp2())
            .collect()
    }

    /// Decompose a query box into inclusive, disjoint, ascending key
    /// ranges. Results are memoized in the process-wide cache.
    pub fn decompose_range(
        &self,
        mins: &[f64],
        maxes: &[f64],
        over_inclusive_on_edge: bool,
        max_ranges: Option<usize>,
    ) -> RangeDecomposition {
        let key = QueryCacheKey::new(
            &self.dimensions,
            mins,
            maxes,
            over_inclusive_on_edge,
            max_ranges,
        );
        let ops = self.decompose_ops.as_ref().unwrap_or(&self.id_ops);
        cache::get_or_compute(key, || match ops {
            HilbertOperations::Primitive(inner) => {
                inner.decompose(mins, maxes, over_inclusive_on_edge, max_ranges)
            }
            HilbertOperations::Unbounded(inner) => {
                inner.decompose(mins, maxes, over_inclusive_on_edge, max_ranges)
            }
        })
    }

    /// Exact decomposition: over-inclusive edges, no cardinality cap.
    pub fn decompose_range_fully(&self, mins: &[f64], maxes: &[f64]) -> RangeDecomposition {
        self.decompose_range(mins, maxes, true, None)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        varint::encode_count(self.dimensions.len(), &mut buf);
        for dim in &self.dimensions {
            let mut dim_buf = Vec::new();
            dim.to_binary(&mut dim_buf);
            varint::encode_count(dim_buf.len(), &mut buf);
            buf.extend_from_slice(&dim_buf);
        }
        buf
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let num_dims = varint::decode_count(bytes, &mut pos)?;
        if num_dims == 0 || num_dims > MAX_DIMENSIONS {
            return Err(TesseraError::CorruptFormat(format!(
                "curve dimension count {} out of range",
                num_dims
            )));
        }
        let mut dimensions = Vec::with_capacity(num_dims);
        for _ in 0..num_dims {
            let len = varint::decode_count(bytes, &mut pos)?;
            let chunk = varint::read_bytes(bytes, &mut pos, len)?;
            let mut chunk_pos = 0;
            let dim = SfcDimension::from_binary(chunk, &mut chunk_pos)?;
            if chunk_pos != chunk.len() {
                return Err(TesseraError::CorruptFormat(
                    "trailing bytes after curve dimension".into(),
                ));
            }
            dimensions.push(dim);
        }
        if pos != bytes.len() {
            return Err(TesseraError::CorruptFormat(
                "trailing bytes after curve".into(),
            ));
        }
        Ok(HilbertSfc::new(dimensions))
    }
}

impl PartialEq for HilbertSfc {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions == other.dimensions
    }
}

impl Eq for HilbertSfc {}

impl Hash for HilbertSfc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dimensions.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionDefinition;

    fn spatial(bits: u32) -> HilbertSfc {
        HilbertSfc::new(vec![
            SfcDimension::new(DimensionDefinition::longitude(), bits),
            SfcDimension::new(DimensionDefinition::latitude(true), bits),
        ])
    }

    #[test]
    fn test_backend_selection() {
        let small = spatial(20);
        assert!(matches!(small.id_ops, HilbertOperations::Primitive(_)));
        assert!(small.decompose_ops.is_none());

        // 2 x 32: primitive ids, unbounded decomposition.
        let split = spatial(32);
        assert!(matches!(split.id_ops, HilbertOperations::Primitive(_)));
        assert!(matches!(
            split.decompose_ops,
            Some(HilbertOperations::Unbounded(_))
        ));

        // One 50-bit dimension: unbounded ids, primitive decomposition.
        let wide = HilbertSfc::new(vec![SfcDimension::new(
            DimensionDefinition::longitude(),
            50,
        )]);
        assert!(matches!(wide.id_ops, HilbertOperations::Unbounded(_)));
        assert!(matches!(
            wide.decompose_ops,
            Some(HilbertOperations::Primitive(_))
        ));
    }

    #[test]
    fn test_key_length() {
        assert_eq!(spatial(20).key_length(), 5);
        assert_eq!(spatial(31).key_length(), 8);
    }

    #[test]
    fn test_encode_clamps_out_of_domain() {
        let sfc = spatial(8);
        assert_eq!(sfc.encode(&[-500.0, 0.0]), sfc.encode(&[-180.0, 0.0]));
        assert_eq!(sfc.encode(&[500.0, 0.0]), sfc.encode(&[180.0, 0.0]));
    }

    #[test]
    fn test_decode_cell_contains_value() {
        let sfc = spatial(16);
        for point in [[45.0, 45.0], [-179.9, -89.9], [0.0, 0.0], [123.4, -56.7]] {
            let key = sfc.encode(&point);
            let ranges = sfc.decode(&key);
            for (j, (lo, hi)) in ranges.iter().enumerate() {
                assert!(
                    *lo <= point[j] && point[j] < *hi,
                    "dim {}: {} not in [{}, {})",
                    j,
                    point[j],
                    lo,
                    hi
                );
            }
        }
    }

    #[test]
    fn test_binary_round_trip() {
        let sfc = HilbertSfc::new(vec![
            SfcDimension::new(DimensionDefinition::longitude(), 20),
            SfcDimension::new(DimensionDefinition::latitude(true), 20),
            SfcDimension::new(
                DimensionDefinition::time(crate::dimension::BinUnit::Year),
                20,
            ),
        ]);
        let bytes = sfc.to_binary();
        let decoded = HilbertSfc::from_binary(&bytes).unwrap();
        assert_eq!(decoded, sfc);
        assert_eq!(decoded.total_precision(), 60);
    }

    #[test]
    fn test_binary_rejects_truncation() {
        let bytes = spatial(20).to_binary();
        for cut in [0, 1, bytes.len() - 1] {
            assert!(HilbertSfc::from_binary(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_decompose_is_deterministic_across_cache_states() {
        let _guard = cache::test_lock().lock();
        let sfc = spatial(12);
        let mins = [10.0, -20.0];
        let maxes = [11.0, -19.0];
        let first = sfc.decompose_range(&mins, &maxes, false, Some(16));
        cache::reset();
        let second = sfc.decompose_range(&mins, &maxes, false, Some(16));
        assert_eq!(first, second);
    }

    #[test]
    fn test_estimated_id_count_point_is_one() {
        let sfc = spatial(20);
        let count = sfc.estimated_id_count(&[45.0, 45.0], &[45.0, 45.0]);
        assert_eq!(count, BigUint::from(1u32));
    }
}
