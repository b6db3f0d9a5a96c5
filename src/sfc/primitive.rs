//! 64-bit arithmetic backend for the compact Hilbert operations.
//!
//! Valid when every dimension fits 48 bits (value normalization keeps full
//! `f64` resolution headroom) and, for range decomposition, when the total
//! precision fits 62 bits so whole-curve index ranges stay in `u64`.

use crate::bytes_util::{fit_expected_byte_count, BitReader, BitWriter};
use crate::keys::{ByteRange, RangeDecomposition};
use crate::sfc::dimension::SfcDimension;
use crate::sfc::ops::{
    gray, gray_code_rank, gray_code_rank_inverse, gray_inverse, CurveLevels, HilbertState,
};
use bytes::Bytes;
use num_bigint::BigUint;
use num_traits::One;

#[derive(Debug, Clone)]
pub(crate) struct PrimitiveOps {
    n: u32,
    bits: Vec<u32>,
    levels: CurveLevels,
    mins: Vec<f64>,
    widths: Vec<f64>,
    /// Cells per dimension, `2^bits`, as f64 for normalization.
    bins: Vec<f64>,
    /// Highest cell ordinal per dimension.
    cell_max: Vec<u64>,
}

impl PrimitiveOps {
    pub fn new(dimensions: &[SfcDimension]) -> Self {
        let bits: Vec<u32> = dimensions.iter().map(SfcDimension::bits).collect();
        let levels = CurveLevels::new(&bits);
        let mins: Vec<f64> = dimensions.iter().map(SfcDimension::min).collect();
        let widths: Vec<f64> = dimensions.iter().map(|d| d.max() - d.min()).collect();
        let bins: Vec<f64> = bits.iter().map(|&b| (b as f64).exp2()).collect();
        let cell_max: Vec<u64> = bits.iter().map(|&b| ones(b)).collect();
        PrimitiveOps {
            n: dimensions.len() as u32,
            bits,
            levels,
            mins,
            widths,
            bins,
            cell_max,
        }
    }

    fn scaled(&self, dim: usize, value: f64) -> f64 {
        ((value - self.mins[dim]) / self.widths[dim] * self.bins[dim]).clamp(0.0, self.bins[dim])
    }

    /// Cell holding `value`, clamped into the valid range.
    pub fn normalize_value(&self, dim: usize, value: f64) -> u64 {
        (self.scaled(dim, value).floor() as u64).min(self.cell_max[dim])
    }

    /// Cells `[lo, hi]` touched by `[min, max]` on one dimension. With
    /// `over_inclusive` a cell merely touching an endpoint counts; without
    /// it the overlap must have interior.
    pub fn normalize_range(
        &self,
        dim: usize,
        min: f64,
        max: f64,
        over_inclusive: bool,
    ) -> (u64, u64) {
        let lo_s = self.scaled(dim, min);
        let hi_s = self.scaled(dim, max);
        let lo = if over_inclusive {
            (lo_s.ceil() as i64) - 1
        } else {
            lo_s.floor() as i64
        };
        let hi = if over_inclusive || hi_s.fract() != 0.0 {
            hi_s.floor() as i64
        } else {
            (hi_s as i64) - 1
        };
        let lo = (lo.max(0) as u64).min(self.cell_max[dim]);
        let hi = (hi.max(0) as u64).min(self.cell_max[dim]).max(lo);
        (lo, hi)
    }

    pub fn denormalize_cell(&self, dim: usize, cell: u64) -> (f64, f64) {
        let lo = self.mins[dim] + cell as f64 / self.bins[dim] * self.widths[dim];
        let hi = self.mins[dim] + (cell + 1) as f64 / self.bins[dim] * self.widths[dim];
        (lo, hi)
    }

    /// Compact Hilbert index of a value tuple, as a big-endian key.
    pub fn encode(&self, values: &[f64]) -> Bytes {
        let cells: Vec<u64> = values
            .iter()
            .enumerate()
            .map(|(j, &v)| self.normalize_value(j, v))
            .collect();
        self.index_of_cells(&cells)
    }

    pub fn index_of_cells(&self, cells: &[u64]) -> Bytes {
        let mut writer = BitWriter::new(self.levels.total_bits as usize);
        let mut state = HilbertState::initial();
        let max_level = self.levels.depth() as u32;
        for (depth, lm) in self.levels.levels.iter().enumerate() {
            let level = max_level - 1 - depth as u32;
            let mut label = 0u64;
            for j in 0..self.n as usize {
                label |= ((cells[j] >> level) & 1) << j;
            }
            let local = state.transform(label, self.n);
            let w = gray_inverse(local);
            let rank = gray_code_rank(state.local_free_mask(lm.free_mask, self.n), w, self.n);
            writer.write(rank, lm.bits);
            state.advance(w, self.n);
        }
        Bytes::from(writer.finish())
    }

    /// Invert a key back to per-dimension cells.
    pub fn decode(&self, key: &[u8]) -> Vec<u64> {
        let mut reader = BitReader::new(key, self.levels.total_bits as usize);
        let mut state = HilbertState::initial();
        let mut cells = vec![0u64; self.n as usize];
        for lm in &self.levels.levels {
            let rank = reader.read(lm.bits);
            let local_mask = state.local_free_mask(lm.free_mask, self.n);
            let pattern = state.constrained_pattern(local_mask, self.n);
            let w = gray_code_rank_inverse(local_mask, pattern, rank, self.n);
            let label = state.untransform(gray(w), self.n);
            for j in 0..self.n as usize {
                if (lm.free_mask >> j) & 1 == 1 {
                    cells[j] = (cells[j] << 1) | ((label >> j) & 1);
                }
            }
            state.advance(w, self.n);
        }
        cells
    }

    pub fn estimated_id_count(&self, mins: &[f64], maxes: &[f64]) -> BigUint {
        let mut count = BigUint::one();
        for j in 0..self.n as usize {
            let (lo, hi) = self.normalize_range(j, mins[j], maxes[j], false);
            count *= BigUint::from(hi - lo + 1);
        }
        let cap = BigUint::one() << self.levels.total_bits;
        count.min(cap)
    }

    /// Decompose a query box into inclusive index ranges, in curve order.
    pub fn decompose(
        &self,
        mins: &[f64],
        maxes: &[f64],
        over_inclusive: bool,
        max_ranges: Option<usize>,
    ) -> RangeDecomposition {
        let mut query_lo = vec![0u64; self.n as usize];
        let mut query_hi = vec![0u64; self.n as usize];
        for j in 0..self.n as usize {
            let (lo, hi) = self.normalize_range(j, mins[j], maxes[j], over_inclusive);
            query_lo[j] = lo;
            query_hi[j] = hi;
        }
        let budget = match max_ranges {
            Some(limit) => limit.saturating_mul(4).max(1024),
            None => usize::MAX,
        };
        let mut walker = Walker {
            ops: self,
            query_lo,
            query_hi,
            budget,
            ranges: Vec::new(),
        };
        let cells = vec![0u64; self.n as usize];
        walker.visit(0, 0, &cells, HilbertState::initial());
        let mut ranges = walker.ranges;
        if let Some(limit) = max_ranges {
            merge_to_limit(&mut ranges, limit);
        }

        let nbytes = self.levels.key_bytes();
        RangeDecomposition::new(
            ranges
                .into_iter()
                .map(|(start, end)| {
                    ByteRange::new(index_key(start, nbytes), index_key(end, nbytes))
                })
                .collect(),
        )
    }

}

fn index_key(value: u64, nbytes: usize) -> Bytes {
    Bytes::from(fit_expected_byte_count(nbytes, &value.to_be_bytes()))
}

#[inline]
fn ones(bits: u32) -> u64 {
    if bits == 0 {
        0
    } else {
        u64::MAX >> (64 - bits.min(64))
    }
}

struct Walker<'a> {
    ops: &'a PrimitiveOps,
    query_lo: Vec<u64>,
    query_hi: Vec<u64>,
    budget: usize,
    ranges: Vec<(u64, u64)>,
}

impl Walker<'_> {
    fn visit(&mut self, depth: usize, prefix: u64, cells: &[u64], state: HilbertState) {
        let ops = self.ops;
        let remaining_levels = (ops.levels.depth() - depth) as u32;
        let mut contained = true;
        for j in 0..ops.n as usize {
            let rem = remaining_levels.min(ops.bits[j]);
            let lo = cells[j] << rem;
            let hi = lo + ones(rem);
            if hi < self.query_lo[j] || lo > self.query_hi[j] {
                return;
            }
            if lo < self.query_lo[j] || hi > self.query_hi[j] {
                contained = false;
            }
        }

        if contained || self.ranges.len() >= self.budget {
            let rem_bits = ops.levels.remaining[depth];
            let start = prefix << rem_bits;
            self.push(start, start + ones(rem_bits));
            return;
        }

        let lm = &ops.levels.levels[depth];
        let local_mask = state.local_free_mask(lm.free_mask, ops.n);
        let pattern = state.constrained_pattern(local_mask, ops.n);
        for rank in 0..(1u64 << lm.bits) {
            let w = gray_code_rank_inverse(local_mask, pattern, rank, ops.n);
            let label = state.untransform(gray(w), ops.n);
            let mut child_cells = cells.to_vec();
            for j in 0..ops.n as usize {
                if (lm.free_mask >> j) & 1 == 1 {
                    child_cells[j] = (cells[j] << 1) | ((label >> j) & 1);
                }
            }
            let mut child_state = state;
            child_state.advance(w, ops.n);
            self.visit(
                depth + 1,
                (prefix << lm.bits) | rank,
                &child_cells,
                child_state,
            );
        }
    }

    fn push(&mut self, start: u64, end: u64) {
        if let Some(last) = self.ranges.last_mut() {
            if last.1 + 1 == start {
                last.1 = end;
                return;
            }
        }
        self.ranges.push((start, end));
    }
}

/// Greedily merge the smallest bridging gaps (ties to the left) until the
/// decomposition fits the requested cardinality.
fn merge_to_limit(ranges: &mut Vec<(u64, u64)>, limit: usize) {
    let limit = limit.max(1);
    if ranges.len() <= limit {
        return;
    }
    let merges = ranges.len() - limit;
    let mut gaps: Vec<(u64, usize)> = (1..ranges.len())
        .map(|i| (ranges[i].0 - ranges[i - 1].1 - 1, i))
        .collect();
    gaps.sort_unstable();
    let mut dissolve = vec![false; ranges.len()];
    for &(_, i) in gaps.iter().take(merges) {
        dissolve[i] = true;
    }
    let mut out: Vec<(u64, u64)> = Vec::with_capacity(limit);
    for (i, range) in ranges.drain(..).enumerate() {
        if dissolve[i] {
            if let Some(last) = out.last_mut() {
                last.1 = range.1;
                continue;
            }
        }
        out.push(range);
    }
    *ranges = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionDefinition;

    fn unit_square(bits: u32) -> PrimitiveOps {
        let dims = vec![
            SfcDimension::new(
                DimensionDefinition::Bounded(crate::dimension::BoundedDimension::new(0.0, 1.0)),
                bits,
            ),
            SfcDimension::new(
                DimensionDefinition::Bounded(crate::dimension::BoundedDimension::new(0.0, 1.0)),
                bits,
            ),
        ];
        PrimitiveOps::new(&dims)
    }

    #[test]
    fn test_order_one_curve_layout() {
        let ops = unit_square(1);
        // The order-1 curve visits (0,0), (0,1), (1,1), (1,0).
        assert_eq!(ops.index_of_cells(&[0, 0]).as_ref(), &[0b00]);
        assert_eq!(ops.index_of_cells(&[0, 1]).as_ref(), &[0b01]);
        assert_eq!(ops.index_of_cells(&[1, 1]).as_ref(), &[0b10]);
        assert_eq!(ops.index_of_cells(&[1, 0]).as_ref(), &[0b11]);
    }

    #[test]
    fn test_curve_is_continuous_with_equal_bits() {
        // Consecutive indices must differ by one step in one dimension.
        let ops = unit_square(3);
        let mut previous: Option<Vec<u64>> = None;
        for h in 0u64..64 {
            let key = [h as u8];
            let cells = ops.decode(&key);
            if let Some(prev) = previous {
                let step: u64 = prev
                    .iter()
                    .zip(&cells)
                    .map(|(a, b)| a.abs_diff(*b))
                    .sum();
                assert_eq!(step, 1, "index {} jumped", h);
            }
            previous = Some(cells);
        }
    }

    #[test]
    fn test_encode_decode_round_trip_exhaustive() {
        let dims = vec![
            SfcDimension::new(
                DimensionDefinition::Bounded(crate::dimension::BoundedDimension::new(0.0, 1.0)),
                3,
            ),
            SfcDimension::new(
                DimensionDefinition::Bounded(crate::dimension::BoundedDimension::new(0.0, 1.0)),
                1,
            ),
            SfcDimension::new(
                DimensionDefinition::Bounded(crate::dimension::BoundedDimension::new(0.0, 1.0)),
                2,
            ),
        ];
        let ops = PrimitiveOps::new(&dims);
        let mut seen = std::collections::HashSet::new();
        for x in 0u64..8 {
            for y in 0u64..2 {
                for z in 0u64..4 {
                    let key = ops.index_of_cells(&[x, y, z]);
                    assert_eq!(ops.decode(&key), vec![x, y, z]);
                    assert!(seen.insert(key), "index collision");
                }
            }
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn test_normalize_range_edges() {
        let ops = unit_square(2); // 4 cells of width 0.25
        // Strict: touching the 0.5 boundary from below stays in cell 1.
        assert_eq!(ops.normalize_range(0, 0.3, 0.5, false), (1, 1));
        // Over-inclusive: the touched cell 2 joins.
        assert_eq!(ops.normalize_range(0, 0.3, 0.5, true), (1, 2));
        // Over-inclusive lower edge pulls in the cell below.
        assert_eq!(ops.normalize_range(0, 0.5, 0.6, true), (1, 2));
        assert_eq!(ops.normalize_range(0, 0.5, 0.6, false), (2, 2));
        // Degenerate point on a boundary is a single cell either way.
        assert_eq!(ops.normalize_range(0, 0.5, 0.5, false), (2, 2));
    }

    #[test]
    fn test_decompose_full_space_is_one_range() {
        let ops = unit_square(4);
        let decomp = ops.decompose(&[0.0, 0.0], &[1.0, 1.0], false, None);
        assert_eq!(decomp.len(), 1);
        assert_eq!(decomp.ranges()[0].start().as_ref(), &[0x00]);
        assert_eq!(decomp.ranges()[0].end().as_ref(), &[0xFF]);
    }

    #[test]
    fn test_decompose_covers_exactly_the_query_cells() {
        let ops = unit_square(3);
        // Cells x in [2,5], y in [1,3] — 12 cells.
        let decomp = ops.decompose(
            &[2.0 / 8.0 + 1e-9, 1.0 / 8.0 + 1e-9],
            &[6.0 / 8.0 - 1e-9, 4.0 / 8.0 - 1e-9],
            false,
            None,
        );
        let mut covered = 0u64;
        for range in decomp.ranges() {
            let start = range.start().as_ref()[0] as u64;
            let end = range.end().as_ref()[0] as u64;
            for h in start..=end {
                let cells = ops.decode(&[h as u8]);
                assert!((2..=5).contains(&cells[0]));
                assert!((1..=3).contains(&cells[1]));
                covered += 1;
            }
        }
        assert_eq!(covered, 12);
    }

    #[test]
    fn test_decompose_matches_brute_force_on_unequal_bits() {
        // 3 + 2 bits: the per-level dimension masks differ, which is the
        // compact case. Compare against enumerating every index.
        let dims = vec![
            SfcDimension::new(
                DimensionDefinition::Bounded(crate::dimension::BoundedDimension::new(0.0, 1.0)),
                3,
            ),
            SfcDimension::new(
                DimensionDefinition::Bounded(crate::dimension::BoundedDimension::new(0.0, 1.0)),
                2,
            ),
        ];
        let ops = PrimitiveOps::new(&dims);
        let mins = [1.0 / 8.0 + 1e-9, 0.0];
        let maxes = [7.0 / 8.0 - 1e-9, 3.0 / 4.0 - 1e-9];

        let mut expected: Vec<u64> = Vec::new();
        for h in 0u64..32 {
            let cells = ops.decode(&[h as u8]);
            if (1..=6).contains(&cells[0]) && (0..=2).contains(&cells[1]) {
                expected.push(h);
            }
        }

        let decomp = ops.decompose(&mins, &maxes, false, None);
        let mut covered: Vec<u64> = Vec::new();
        for range in decomp.ranges() {
            for h in range.start().as_ref()[0]..=range.end().as_ref()[0] {
                covered.push(h as u64);
            }
        }
        assert_eq!(covered, expected);
    }

    #[test]
    fn test_decompose_respects_max_ranges() {
        let ops = unit_square(5);
        let mins = [0.26, 0.26];
        let maxes = [0.74, 0.74];
        let full = ops.decompose(&mins, &maxes, false, None);
        assert!(full.len() > 4);
        let limited = ops.decompose(&mins, &maxes, false, Some(4));
        assert!(limited.len() <= 4);
        // The limited set must still cover everything the full set covers.
        let first = limited.ranges().first().unwrap();
        let last = limited.ranges().last().unwrap();
        assert!(first.start() <= full.ranges().first().unwrap().start());
        assert!(last.end() >= full.ranges().last().unwrap().end());
    }

    #[test]
    fn test_merge_to_limit_prefers_smallest_gaps() {
        let mut ranges = vec![(0u64, 1u64), (3, 4), (10, 11), (13, 14)];
        merge_to_limit(&mut ranges, 2);
        assert_eq!(ranges, vec![(0, 4), (10, 14)]);
    }

    #[test]
    fn test_estimated_id_count() {
        let ops = unit_square(3);
        let count = ops.estimated_id_count(&[0.0, 0.0], &[0.49, 0.24]);
        // 4 cells in x (0..=3), 2 in y (0..=1).
        assert_eq!(count, BigUint::from(8u32));
        let capped = ops.estimated_id_count(&[0.0, 0.0], &[1.0, 1.0]);
        assert_eq!(capped, BigUint::from(64u32));
    }
}
