//! A dimension definition paired with its bit budget on one curve.

use crate::dimension::DimensionDefinition;
use crate::error::Result;
use crate::varint;
use std::hash::{Hash, Hasher};

/// One axis of a space-filling curve: the dimension definition plus the
/// number of bits of precision the curve spends on it.
#[derive(Debug, Clone, PartialEq)]
pub struct SfcDimension {
    definition: DimensionDefinition,
    bits: u32,
}

impl SfcDimension {
    pub fn new(definition: DimensionDefinition, bits: u32) -> Self {
        SfcDimension { definition, bits }
    }

    pub fn definition(&self) -> &DimensionDefinition {
        &self.definition
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn min(&self) -> f64 {
        self.definition.min()
    }

    pub fn max(&self) -> f64 {
        self.definition.max()
    }

    pub fn to_binary(&self, buf: &mut Vec<u8>) {
        self.definition.to_binary(buf);
        varint::encode_varint(self.bits as u64, buf);
    }

    pub fn from_binary(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let definition = DimensionDefinition::from_binary(buf, pos)?;
        let bits = varint::decode_varint(buf, pos)?;
        if bits > u16::MAX as u64 {
            return Err(crate::error::TesseraError::CorruptFormat(format!(
                "dimension precision of {} bits",
                bits
            )));
        }
        Ok(SfcDimension {
            definition,
            bits: bits as u32,
        })
    }
}

// Dimension bounds are finite by construction, so bitwise f64 identity is
// a sound equality and the derived PartialEq never sees NaN.
impl Eq for SfcDimension {}

impl Hash for SfcDimension {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.definition {
            DimensionDefinition::Bounded(_) => 0u8.hash(state),
            DimensionDefinition::Periodic(_) => 1u8.hash(state),
            DimensionDefinition::Temporal(d) => {
                2u8.hash(state);
                (d.unit() as u8).hash(state);
            }
        }
        self.definition.min().to_bits().hash(state);
        self.definition.max().to_bits().hash(state);
        self.bits.hash(state);
    }
}
