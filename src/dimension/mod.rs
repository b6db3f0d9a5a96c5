//! Dimension definitions: how one numeric axis maps into the index.
//!
//! Every axis is one of three shapes: a bounded interval, a periodic
//! interval that wraps out-of-range values around, or an unbounded axis
//! carved into labeled calendar bins. The definitions own binning and the
//! inverse (bin bytes + in-domain range back to real values); the curve
//! layer only ever sees in-domain values.

mod bounded;
mod periodic;
mod temporal;

pub use bounded::BoundedDimension;
pub use periodic::PeriodicDimension;
pub use temporal::{BinUnit, TemporalDimension};

use crate::data::BinRange;
use crate::error::{Result, TesseraError};
use crate::varint;

const TAG_BOUNDED: u8 = 0;
const TAG_PERIODIC: u8 = 1;
const TAG_TEMPORAL: u8 = 2;

/// A named axis shape. See the variants for semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionDefinition {
    Bounded(BoundedDimension),
    Periodic(PeriodicDimension),
    Temporal(TemporalDimension),
}

impl DimensionDefinition {
    /// Longitude in degrees, wrapping at the antimeridian.
    pub fn longitude() -> Self {
        DimensionDefinition::Periodic(PeriodicDimension::new(-180.0, 180.0))
    }

    /// Latitude in degrees. With `full_range` the axis spans ±180 so that
    /// spatial cells stay square when paired with longitude; values only
    /// ever occupy the middle half.
    pub fn latitude(full_range: bool) -> Self {
        if full_range {
            DimensionDefinition::Bounded(BoundedDimension::new(-180.0, 180.0))
        } else {
            DimensionDefinition::Bounded(BoundedDimension::new(-90.0, 90.0))
        }
    }

    /// Time in epoch milliseconds, binned by calendar unit.
    pub fn time(unit: BinUnit) -> Self {
        DimensionDefinition::Temporal(TemporalDimension::new(unit))
    }

    /// Lower bound of the value domain the curve layer sees.
    pub fn min(&self) -> f64 {
        match self {
            DimensionDefinition::Bounded(d) => d.min(),
            DimensionDefinition::Periodic(d) => d.min(),
            DimensionDefinition::Temporal(d) => d.min(),
        }
    }

    /// Upper bound of the value domain the curve layer sees.
    pub fn max(&self) -> f64 {
        match self {
            DimensionDefinition::Bounded(d) => d.max(),
            DimensionDefinition::Periodic(d) => d.max(),
            DimensionDefinition::Temporal(d) => d.max(),
        }
    }

    /// Map an input range onto this axis's bins. For any in-domain value
    /// `v`, `normalize(v, v)` yields exactly one bin with `min == max`.
    pub fn normalize(&self, min: f64, max: f64) -> Vec<BinRange> {
        match self {
            DimensionDefinition::Bounded(d) => d.normalize(min, max),
            DimensionDefinition::Periodic(d) => d.normalize(min, max),
            DimensionDefinition::Temporal(d) => d.normalize(min, max),
        }
    }

    /// Map an in-domain range (plus this dimension's bin bytes) back to
    /// real values. Unbinned dimensions ignore `bin_id`.
    pub fn denormalize(&self, bin_id: &[u8], min: f64, max: f64) -> (f64, f64) {
        match self {
            DimensionDefinition::Bounded(_) | DimensionDefinition::Periodic(_) => (min, max),
            DimensionDefinition::Temporal(d) => d.denormalize(bin_id, min, max),
        }
    }

    /// Bytes this dimension contributes to every partition key; 0 when the
    /// axis does not bin.
    pub fn fixed_bin_id_size(&self) -> usize {
        match self {
            DimensionDefinition::Bounded(_) | DimensionDefinition::Periodic(_) => 0,
            DimensionDefinition::Temporal(d) => d.fixed_bin_id_size(),
        }
    }

    pub fn to_binary(&self, buf: &mut Vec<u8>) {
        match self {
            DimensionDefinition::Bounded(d) => {
                buf.push(TAG_BOUNDED);
                buf.extend_from_slice(&d.min().to_le_bytes());
                buf.extend_from_slice(&d.max().to_le_bytes());
            }
            DimensionDefinition::Periodic(d) => {
                buf.push(TAG_PERIODIC);
                buf.extend_from_slice(&d.min().to_le_bytes());
                buf.extend_from_slice(&d.max().to_le_bytes());
            }
            DimensionDefinition::Temporal(d) => {
                buf.push(TAG_TEMPORAL);
                buf.push(d.unit() as u8);
            }
        }
    }

    pub fn from_binary(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let tag = varint::read_bytes(buf, pos, 1)?[0];
        match tag {
            TAG_BOUNDED | TAG_PERIODIC => {
                let raw = varint::read_bytes(buf, pos, 16)?;
                let mut min_bytes = [0u8; 8];
                let mut max_bytes = [0u8; 8];
                min_bytes.copy_from_slice(&raw[..8]);
                max_bytes.copy_from_slice(&raw[8..]);
                let min = f64::from_le_bytes(min_bytes);
                let max = f64::from_le_bytes(max_bytes);
                if !min.is_finite() || !max.is_finite() || min >= max {
                    return Err(TesseraError::CorruptFormat(format!(
                        "dimension bounds out of order: [{}, {}]",
                        min, max
                    )));
                }
                if tag == TAG_BOUNDED {
                    Ok(DimensionDefinition::Bounded(BoundedDimension::new(min, max)))
                } else {
                    Ok(DimensionDefinition::Periodic(PeriodicDimension::new(min, max)))
                }
            }
            TAG_TEMPORAL => {
                let unit = BinUnit::from_tag(varint::read_bytes(buf, pos, 1)?[0])?;
                Ok(DimensionDefinition::Temporal(TemporalDimension::new(unit)))
            }
            other => Err(TesseraError::CorruptFormat(format!(
                "unknown dimension type tag {}",
                other
            ))),
        }
    }
}
