//! Arbitrary-precision backend for the compact Hilbert operations.
//!
//! Always valid, slower. Value normalization goes through `BigDecimal` so
//! dimensions wider than an `f64` mantissa still land on exact cell
//! boundaries; coordinates and composed indices are `BigUint`.

use crate::bytes_util::fit_expected_byte_count;
use crate::keys::{ByteRange, RangeDecomposition};
use crate::sfc::dimension::SfcDimension;
use crate::sfc::ops::{
    gray, gray_code_rank, gray_code_rank_inverse, gray_inverse, CurveLevels, HilbertState,
};
use bigdecimal::{BigDecimal, RoundingMode};
use bytes::Bytes;
use num_bigint::{BigInt, BigUint};
use num_traits::{FromPrimitive, One, ToPrimitive, Zero};

#[derive(Debug, Clone)]
pub(crate) struct UnboundedOps {
    n: u32,
    bits: Vec<u32>,
    levels: CurveLevels,
    mins: Vec<f64>,
    widths: Vec<f64>,
    /// Cells per dimension, `2^bits`, exact.
    bins: Vec<BigDecimal>,
    /// Highest cell ordinal per dimension.
    cell_max: Vec<BigUint>,
}

impl UnboundedOps {
    pub fn new(dimensions: &[SfcDimension]) -> Self {
        let bits: Vec<u32> = dimensions.iter().map(SfcDimension::bits).collect();
        let levels = CurveLevels::new(&bits);
        let bins: Vec<BigDecimal> = bits
            .iter()
            .map(|&b| BigDecimal::from(BigInt::one() << b))
            .collect();
        let cell_max: Vec<BigUint> = bits
            .iter()
            .map(|&b| (BigUint::one() << b) - BigUint::one())
            .collect();
        UnboundedOps {
            n: dimensions.len() as u32,
            bits,
            levels,
            mins: dimensions.iter().map(SfcDimension::min).collect(),
            widths: dimensions.iter().map(|d| d.max() - d.min()).collect(),
            bins,
            cell_max,
        }
    }

    fn scaled(&self, dim: usize, value: f64) -> BigDecimal {
        let clamped = value.clamp(self.mins[dim], self.mins[dim] + self.widths[dim]);
        let norm = ((clamped - self.mins[dim]) / self.widths[dim]).clamp(0.0, 1.0);
        BigDecimal::from_f64(norm).unwrap_or_else(BigDecimal::zero) * &self.bins[dim]
    }

    pub fn normalize_value(&self, dim: usize, value: f64) -> BigUint {
        let cell = floor_int(&self.scaled(dim, value))
            .to_biguint()
            .unwrap_or_else(BigUint::zero);
        cell.min(self.cell_max[dim].clone())
    }

    pub fn normalize_range(
        &self,
        dim: usize,
        min: f64,
        max: f64,
        over_inclusive: bool,
    ) -> (BigUint, BigUint) {
        let lo_s = self.scaled(dim, min);
        let hi_s = self.scaled(dim, max);
        let lo = if over_inclusive {
            ceil_int(&lo_s) - 1
        } else {
            floor_int(&lo_s)
        };
        let hi_floor = floor_int(&hi_s);
        let hi = if over_inclusive || hi_s != BigDecimal::from(hi_floor.clone()) {
            hi_floor
        } else {
            hi_floor - 1
        };
        let cell_max = BigInt::from(self.cell_max[dim].clone());
        let lo = lo.max(BigInt::zero()).min(cell_max.clone());
        let hi = hi.max(lo.clone()).min(cell_max);
        (
            lo.to_biguint().unwrap_or_else(BigUint::zero),
            hi.to_biguint().unwrap_or_else(BigUint::zero),
        )
    }

    pub fn denormalize_cell(&self, dim: usize, cell: &BigUint) -> (f64, f64) {
        let lo = cell_fraction(cell, self.bits[dim]);
        let hi = cell_fraction(&(cell + BigUint::one()), self.bits[dim]);
        (
            self.mins[dim] + lo * self.widths[dim],
            self.mins[dim] + hi * self.widths[dim],
        )
    }

    pub fn encode(&self, values: &[f64]) -> Bytes {
        let cells: Vec<BigUint> = values
            .iter()
            .enumerate()
            .map(|(j, &v)| self.normalize_value(j, v))
            .collect();
        self.index_of_cells(&cells)
    }

    pub fn index_of_cells(&self, cells: &[BigUint]) -> Bytes {
        let mut index = BigUint::zero();
        let mut state = HilbertState::initial();
        let max_level = self.levels.depth() as u32;
        for (depth, lm) in self.levels.levels.iter().enumerate() {
            let level = (max_level - 1 - depth as u32) as u64;
            let mut label = 0u64;
            for (j, cell) in cells.iter().enumerate() {
                if cell.bit(level) {
                    label |= 1u64 << j;
                }
            }
            let local = state.transform(label, self.n);
            let w = gray_inverse(local);
            let rank = gray_code_rank(state.local_free_mask(lm.free_mask, self.n), w, self.n);
            index = (index << lm.bits) | BigUint::from(rank);
            state.advance(w, self.n);
        }
        Bytes::from(fit_expected_byte_count(
            self.levels.key_bytes(),
            &index.to_bytes_be(),
        ))
    }

    pub fn decode(&self, key: &[u8]) -> Vec<BigUint> {
        let index = BigUint::from_bytes_be(key);
        let mut state = HilbertState::initial();
        let mut cells = vec![BigUint::zero(); self.n as usize];
        for (depth, lm) in self.levels.levels.iter().enumerate() {
            let shift = self.levels.remaining[depth + 1];
            let rank = ((&index >> shift) & ones_big(lm.bits))
                .to_u64()
                .unwrap_or(0);
            let local_mask = state.local_free_mask(lm.free_mask, self.n);
            let pattern = state.constrained_pattern(local_mask, self.n);
            let w = gray_code_rank_inverse(local_mask, pattern, rank, self.n);
            let label = state.untransform(gray(w), self.n);
            for (j, cell) in cells.iter_mut().enumerate() {
                if (lm.free_mask >> j) & 1 == 1 {
                    *cell = (cell.clone() << 1u32) | BigUint::from((label >> j) & 1);
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
            count *= hi - lo + BigUint::one();
        }
        let cap = BigUint::one() << self.levels.total_bits;
        count.min(cap)
    }

    pub fn decompose(
        &self,
        mins: &[f64],
        maxes: &[f64],
        over_inclusive: bool,
        max_ranges: Option<usize>,
    ) -> RangeDecomposition {
        let mut query_lo = Vec::with_capacity(self.n as usize);
        let mut query_hi = Vec::with_capacity(self.n as usize);
        for j in 0..self.n as usize {
            let (lo, hi) = self.normalize_range(j, mins[j], maxes[j], over_inclusive);
            query_lo.push(lo);
            query_hi.push(hi);
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
        let cells = vec![BigUint::zero(); self.n as usize];
        walker.visit(0, BigUint::zero(), &cells, HilbertState::initial());
        let mut ranges = walker.ranges;
        if let Some(limit) = max_ranges {
            merge_to_limit(&mut ranges, limit);
        }

        let nbytes = self.levels.key_bytes();
        RangeDecomposition::new(
            ranges
                .into_iter()
                .map(|(start, end)| {
                    ByteRange::new(
                        Bytes::from(fit_expected_byte_count(nbytes, &start.to_bytes_be())),
                        Bytes::from(fit_expected_byte_count(nbytes, &end.to_bytes_be())),
                    )
                })
                .collect(),
        )
    }
}

fn floor_int(value: &BigDecimal) -> BigInt {
    let (int, scale) = value
        .with_scale_round(0, RoundingMode::Floor)
        .into_bigint_and_exponent();
    debug_assert_eq!(scale, 0);
    int
}

fn ceil_int(value: &BigDecimal) -> BigInt {
    let (int, scale) = value
        .with_scale_round(0, RoundingMode::Ceiling)
        .into_bigint_and_exponent();
    debug_assert_eq!(scale, 0);
    int
}

fn ones_big(bits: u32) -> BigUint {
    (BigUint::one() << bits) - BigUint::one()
}

/// `cell / 2^bits` as an `f64`, stable for any width.
fn cell_fraction(cell: &BigUint, bits: u32) -> f64 {
    if bits <= 64 {
        cell.to_f64().unwrap_or(0.0) / (bits as f64).exp2()
    } else {
        (cell >> (bits - 64)).to_f64().unwrap_or(0.0) / (64f64).exp2()
    }
}

struct Walker<'a> {
    ops: &'a UnboundedOps,
    query_lo: Vec<BigUint>,
    query_hi: Vec<BigUint>,
    budget: usize,
    ranges: Vec<(BigUint, BigUint)>,
}

impl Walker<'_> {
    fn visit(&mut self, depth: usize, prefix: BigUint, cells: &[BigUint], state: HilbertState) {
        let ops = self.ops;
        let remaining_levels = (ops.levels.depth() - depth) as u32;
        let mut contained = true;
        for j in 0..ops.n as usize {
            let rem = remaining_levels.min(ops.bits[j]);
            let lo = &cells[j] << rem;
            let hi = &lo + ones_big(rem);
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
            let end = &start + ones_big(rem_bits);
            self.push(start, end);
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
                    child_cells[j] = (&cells[j] << 1u32) | BigUint::from((label >> j) & 1);
                }
            }
            let mut child_state = state;
            child_state.advance(w, ops.n);
            self.visit(
                depth + 1,
                (&prefix << lm.bits) | BigUint::from(rank),
                &child_cells,
                child_state,
            );
        }
    }

    fn push(&mut self, start: BigUint, end: BigUint) {
        if let Some(last) = self.ranges.last_mut() {
            if &last.1 + BigUint::one() == start {
                last.1 = end;
                return;
            }
        }
        self.ranges.push((start, end));
    }
}

fn merge_to_limit(ranges: &mut Vec<(BigUint, BigUint)>, limit: usize) {
    let limit = limit.max(1);
    if ranges.len() <= limit {
        return;
    }
    let merges = ranges.len() - limit;
    let mut gaps: Vec<(BigUint, usize)> = (1..ranges.len())
        .map(|i| (&ranges[i].0 - &ranges[i - 1].1 - BigUint::one(), i))
        .collect();
    gaps.sort_unstable();
    let mut dissolve = vec![false; ranges.len()];
    for (_, i) in gaps.into_iter().take(merges) {
        dissolve[i] = true;
    }
    let mut out: Vec<(BigUint, BigUint)> = Vec::with_capacity(limit);
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
    use crate::dimension::{BoundedDimension, DimensionDefinition};
    use crate::sfc::primitive::PrimitiveOps;

    fn unit_dims(bits: &[u32]) -> Vec<SfcDimension> {
        bits.iter()
            .map(|&b| {
                SfcDimension::new(
                    DimensionDefinition::Bounded(BoundedDimension::new(0.0, 1.0)),
                    b,
                )
            })
            .collect()
    }

    #[test]
    fn test_agrees_with_primitive_backend() {
        let dims = unit_dims(&[6, 4, 5]);
        let unbounded = UnboundedOps::new(&dims);
        let primitive = PrimitiveOps::new(&dims);

        for point in [
            [0.0, 0.0, 0.0],
            [0.99, 0.99, 0.99],
            [0.125, 0.5, 0.75],
            [0.33, 0.66, 0.01],
        ] {
            assert_eq!(unbounded.encode(&point), primitive.encode(&point));
        }

        let mins = [0.1, 0.2, 0.3];
        let maxes = [0.45, 0.6, 0.9];
        assert_eq!(
            unbounded.decompose(&mins, &maxes, false, Some(20)),
            primitive.decompose(&mins, &maxes, false, Some(20)),
        );
        assert_eq!(
            unbounded.estimated_id_count(&mins, &maxes),
            primitive.estimated_id_count(&mins, &maxes),
        );
    }

    #[test]
    fn test_wide_dimension_round_trip() {
        // 50 bits per dimension: beyond the primitive backend's 48-bit
        // encode limit. Use values on exact cell boundaries.
        let dims = unit_dims(&[50, 50]);
        let ops = UnboundedOps::new(&dims);
        for (x, y) in [(0u64, 0u64), (5, 3), (1 << 19, 1 << 18), ((1 << 20) - 1, 7)] {
            let values = [x as f64 / (1u64 << 20) as f64, y as f64 / (1u64 << 20) as f64];
            let key = ops.encode(&values);
            assert_eq!(key.len(), (100f64 / 8.0).ceil() as usize);
            let cells = ops.decode(&key);
            assert_eq!(cells[0], BigUint::from(x) << 30u32);
            assert_eq!(cells[1], BigUint::from(y) << 30u32);
        }
    }

    #[test]
    fn test_total_precision_above_sixty_two_decomposes() {
        // 2 x 33 bits: total 66, out of primitive decomposition range.
        let dims = unit_dims(&[33, 33]);
        let ops = UnboundedOps::new(&dims);
        let decomp = ops.decompose(&[0.0, 0.0], &[1.0, 1.0], false, None);
        assert_eq!(decomp.len(), 1);
        let full = decomp.ranges()[0].clone();
        assert_eq!(full.start().len(), 9);
        assert!(full.start().iter().all(|&b| b == 0));
        // 66 bits: the top pad bits of the first byte stay clear.
        assert_eq!(full.end().as_ref()[0], 0x03);
        assert!(full.end()[1..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_normalize_range_matches_primitive_semantics() {
        let dims = unit_dims(&[2]);
        let ops = UnboundedOps::new(&dims);
        let as_u64 = |pair: (BigUint, BigUint)| {
            (pair.0.to_u64().unwrap(), pair.1.to_u64().unwrap())
        };
        assert_eq!(as_u64(ops.normalize_range(0, 0.3, 0.5, false)), (1, 1));
        assert_eq!(as_u64(ops.normalize_range(0, 0.3, 0.5, true)), (1, 2));
        assert_eq!(as_u64(ops.normalize_range(0, 0.5, 0.6, true)), (1, 2));
        assert_eq!(as_u64(ops.normalize_range(0, 0.5, 0.6, false)), (2, 2));
    }
}
