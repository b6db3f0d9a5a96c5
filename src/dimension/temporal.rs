//! Temporal axis binned by calendar unit.
//!
//! Time is unbounded, so it cannot be mapped onto a curve directly. The
//! axis is split into calendar bins (year, month, or day); the bin ordinal
//! becomes a 4-byte big-endian label prefixed to the sort key, and values
//! normalize to the fraction of the bin elapsed. Calendar arithmetic is
//! done in UTC, so leap years keep bin boundaries exact.

use crate::data::BinRange;
use crate::error::{Result, TesseraError};
use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDate, Utc};

const MILLIS_PER_DAY: i64 = 86_400_000;

// Clamp window for calendar math: 0001-01-01 .. 9999-12-31 UTC.
const MIN_BIN_MS: i64 = -62_135_596_800_000;
const MAX_BIN_MS: i64 = 253_402_300_799_999;

/// Calendar unit defining bin boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinUnit {
    Year = 0,
    Month = 1,
    Day = 2,
}

impl BinUnit {
    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(BinUnit::Year),
            1 => Ok(BinUnit::Month),
            2 => Ok(BinUnit::Day),
            other => Err(TesseraError::CorruptFormat(format!(
                "unknown temporal bin unit {}",
                other
            ))),
        }
    }
}

/// An epoch-millisecond axis carved into calendar bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalDimension {
    unit: BinUnit,
}

impl TemporalDimension {
    pub fn new(unit: BinUnit) -> Self {
        TemporalDimension { unit }
    }

    pub fn unit(&self) -> BinUnit {
        self.unit
    }

    /// The curve-facing value domain: fraction of the bin elapsed.
    pub fn min(&self) -> f64 {
        0.0
    }

    pub fn max(&self) -> f64 {
        1.0
    }

    pub fn fixed_bin_id_size(&self) -> usize {
        4
    }

    fn datetime(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms.clamp(MIN_BIN_MS, MAX_BIN_MS)).unwrap_or_default()
    }

    fn ordinal(&self, ms: i64) -> i32 {
        match self.unit {
            BinUnit::Year => Self::datetime(ms).year(),
            BinUnit::Month => {
                let dt = Self::datetime(ms);
                (dt.year() - 1970) * 12 + dt.month0() as i32
            }
            BinUnit::Day => ms.clamp(MIN_BIN_MS, MAX_BIN_MS).div_euclid(MILLIS_PER_DAY) as i32,
        }
    }

    fn bin_start(&self, ordinal: i32) -> i64 {
        match self.unit {
            BinUnit::Year => NaiveDate::from_ymd_opt(ordinal, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp_millis())
                .unwrap_or(MIN_BIN_MS),
            BinUnit::Month => {
                let year = 1970 + ordinal.div_euclid(12);
                let month = ordinal.rem_euclid(12) as u32 + 1;
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc().timestamp_millis())
                    .unwrap_or(MIN_BIN_MS)
            }
            BinUnit::Day => ordinal as i64 * MILLIS_PER_DAY,
        }
    }

    fn bin_label(ordinal: i32) -> Bytes {
        Bytes::copy_from_slice(&ordinal.to_be_bytes())
    }

    /// One `BinRange` per calendar bin the input overlaps, each holding the
    /// elapsed-fraction sub-range inside that bin.
    pub fn normalize(&self, min: f64, max: f64) -> Vec<BinRange> {
        let min_ms = clamp_to_millis(min);
        let max_ms = clamp_to_millis(max).max(min_ms);
        let first = self.ordinal(min_ms);
        let last = self.ordinal(max_ms);

        let mut bins = Vec::with_capacity((last - first + 1).max(1) as usize);
        for ordinal in first..=last {
            let start = self.bin_start(ordinal);
            let end = self.bin_start(ordinal + 1);
            let len = (end - start) as f64;
            let lo = (min_ms.max(start) - start) as f64 / len;
            let hi = (max_ms.min(end) - start) as f64 / len;
            bins.push(BinRange::new(Self::bin_label(ordinal), lo, hi));
        }
        bins
    }

    /// Reconstruct epoch milliseconds from a bin label and elapsed
    /// fractions. A malformed label degrades to the fractional input with a
    /// warning rather than failing the read.
    pub fn denormalize(&self, bin_id: &[u8], min: f64, max: f64) -> (f64, f64) {
        let label: [u8; 4] = match bin_id.try_into() {
            Ok(label) => label,
            Err(_) => {
                log::warn!(
                    "temporal bin id has {} bytes, expected 4; returning bin-relative range",
                    bin_id.len()
                );
                return (min, max);
            }
        };
        let ordinal = i32::from_be_bytes(label);
        let start = self.bin_start(ordinal) as f64;
        let len = (self.bin_start(ordinal + 1) - self.bin_start(ordinal)) as f64;
        (start + min * len, start + max * len)
    }
}

fn clamp_to_millis(value: f64) -> i64 {
    value.clamp(MIN_BIN_MS as f64, MAX_BIN_MS as f64).floor() as i64
}
