//! Construction recipes for tiered strategies.
//!
//! The tier byte of every recipe is the tier's bits of precision (the
//! maximum across dimensions when budgets differ), so a persisted key's
//! first byte reads directly as the precision it was written at.

use crate::dimension::DimensionDefinition;
use crate::error::{Result, TesseraError};
use crate::index::tiered::{TieredIndexStrategy, DEFAULT_MAX_DUPLICATE_IDS_PER_DIMENSION};
use crate::sfc::{HilbertSfc, SfcDimension};
use serde::{Deserialize, Serialize};

/// Serializable configuration for an equal-interval tiered index.
///
/// # Example
///
/// ```rust
/// use tessera::index::TieredIndexOptions;
///
/// let json = r#"{
///     "max_bits_per_dimension": [20, 20, 20],
///     "num_tiers": 4
/// }"#;
/// let options = TieredIndexOptions::from_json(json).unwrap();
/// assert_eq!(options.num_tiers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieredIndexOptions {
    /// Bits of precision per dimension at the finest tier.
    pub max_bits_per_dimension: Vec<u32>,

    /// Number of precision tiers, coarsest included.
    #[serde(default = "TieredIndexOptions::default_num_tiers")]
    pub num_tiers: usize,

    /// Estimated duplicate-id budget per ranged dimension before an entry
    /// falls back to a coarser tier.
    #[serde(default = "TieredIndexOptions::default_max_duplicates")]
    pub max_estimated_duplicate_ids_per_dimension: u64,
}

impl TieredIndexOptions {
    const fn default_num_tiers() -> usize {
        4
    }

    const fn default_max_duplicates() -> u64 {
        DEFAULT_MAX_DUPLICATE_IDS_PER_DIMENSION
    }

    pub fn new(max_bits_per_dimension: Vec<u32>, num_tiers: usize) -> Self {
        TieredIndexOptions {
            max_bits_per_dimension,
            num_tiers,
            max_estimated_duplicate_ids_per_dimension: Self::default_max_duplicates(),
        }
    }

    pub fn with_max_duplicates(mut self, max_duplicates: u64) -> Self {
        self.max_estimated_duplicate_ids_per_dimension = max_duplicates;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_bits_per_dimension.is_empty() {
            return Err(TesseraError::InvalidInput(
                "at least one dimension is required".into(),
            ));
        }
        if self
            .max_bits_per_dimension
            .iter()
            .any(|&bits| bits == 0 || bits > 255)
        {
            return Err(TesseraError::InvalidInput(
                "bits per dimension must be in 1..=255".into(),
            ));
        }
        if self.num_tiers == 0 || self.num_tiers > 255 {
            return Err(TesseraError::InvalidInput(
                "tier count must be in 1..=255".into(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let options: TieredIndexOptions = serde_json::from_str(json)
            .map_err(|e| TesseraError::InvalidInput(format!("options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TesseraError::InvalidInput(format!("options: {}", e)))
    }
}

impl Default for TieredIndexOptions {
    fn default() -> Self {
        TieredIndexOptions {
            max_bits_per_dimension: Vec::new(),
            num_tiers: Self::default_num_tiers(),
            max_estimated_duplicate_ids_per_dimension: Self::default_max_duplicates(),
        }
    }
}

/// Build a strategy from validated options.
pub fn create_tiered_strategy_from_options(
    dimensions: Vec<DimensionDefinition>,
    options: &TieredIndexOptions,
) -> Result<TieredIndexStrategy> {
    options.validate()?;
    if dimensions.len() != options.max_bits_per_dimension.len() {
        return Err(TesseraError::InvalidInput(format!(
            "{} dimensions but {} bit budgets",
            dimensions.len(),
            options.max_bits_per_dimension.len()
        )));
    }
    let strategy = build(
        dimensions,
        &equal_interval_bits(&options.max_bits_per_dimension, options.num_tiers),
        options.max_estimated_duplicate_ids_per_dimension,
    );
    Ok(strategy)
}

/// Tiers spaced evenly between zero precision and the full bit budget.
/// With budget 20 and four tiers the per-dimension bits are 0, 7, 13, 20.
pub fn create_equal_interval_precision_tiered_strategy(
    dimensions: Vec<DimensionDefinition>,
    max_bits_per_dimension: &[u32],
    num_tiers: usize,
) -> TieredIndexStrategy {
    assert_eq!(
        dimensions.len(),
        max_bits_per_dimension.len(),
        "one bit budget per dimension required"
    );
    assert!(num_tiers >= 1, "at least one tier required");
    build(
        dimensions,
        &equal_interval_bits(max_bits_per_dimension, num_tiers),
        DEFAULT_MAX_DUPLICATE_IDS_PER_DIMENSION,
    )
}

/// Explicit per-tier bit budgets, one list per dimension, all the same
/// length and increasing.
pub fn create_defined_precision_tiered_strategy(
    dimensions: Vec<DimensionDefinition>,
    bits_per_dimension_per_tier: &[Vec<u32>],
) -> TieredIndexStrategy {
    assert_eq!(
        dimensions.len(),
        bits_per_dimension_per_tier.len(),
        "one bit list per dimension required"
    );
    let num_tiers = bits_per_dimension_per_tier[0].len();
    assert!(num_tiers >= 1, "at least one tier required");
    assert!(
        bits_per_dimension_per_tier
            .iter()
            .all(|bits| bits.len() == num_tiers),
        "every dimension needs the same tier count"
    );
    let tiers: Vec<Vec<u32>> = (0..num_tiers)
        .map(|tier| {
            bits_per_dimension_per_tier
                .iter()
                .map(|bits| bits[tier])
                .collect()
        })
        .collect();
    build(dimensions, &tiers, DEFAULT_MAX_DUPLICATE_IDS_PER_DIMENSION)
}

/// One tier for every bit count from zero up to the largest budget; each
/// dimension saturates at its own budget.
pub fn create_full_incremental_tiered_strategy(
    dimensions: Vec<DimensionDefinition>,
    max_bits_per_dimension: &[u32],
) -> TieredIndexStrategy {
    assert_eq!(
        dimensions.len(),
        max_bits_per_dimension.len(),
        "one bit budget per dimension required"
    );
    let max_bits = max_bits_per_dimension.iter().max().copied().unwrap_or(0);
    let tiers: Vec<Vec<u32>> = (0..=max_bits)
        .map(|tier| {
            max_bits_per_dimension
                .iter()
                .map(|&bits| bits.min(tier))
                .collect()
        })
        .collect();
    build(dimensions, &tiers, DEFAULT_MAX_DUPLICATE_IDS_PER_DIMENSION)
}

fn equal_interval_bits(max_bits_per_dimension: &[u32], num_tiers: usize) -> Vec<Vec<u32>> {
    if num_tiers == 1 {
        return vec![max_bits_per_dimension.to_vec()];
    }
    (0..num_tiers)
        .map(|tier| {
            max_bits_per_dimension
                .iter()
                .map(|&max| {
                    ((max as f64 * tier as f64) / (num_tiers - 1) as f64).round() as u32
                })
                .collect()
        })
        .collect()
}

fn build(
    dimensions: Vec<DimensionDefinition>,
    bits_per_tier: &[Vec<u32>],
    max_duplicates: u64,
) -> TieredIndexStrategy {
    let mut sfcs = Vec::with_capacity(bits_per_tier.len());
    let mut tier_bytes = Vec::with_capacity(bits_per_tier.len());
    for bits in bits_per_tier {
        let tier = bits.iter().max().copied().unwrap_or(0);
        assert!(tier <= u8::MAX as u32, "tier precision {} exceeds a byte", tier);
        // Narrow budgets can round two tiers onto the same precision;
        // keep the first.
        if tier_bytes.contains(&(tier as u8)) {
            continue;
        }
        tier_bytes.push(tier as u8);
        sfcs.push(HilbertSfc::new(
            dimensions
                .iter()
                .zip(bits)
                .map(|(dim, &dim_bits)| SfcDimension::new(dim.clone(), dim_bits))
                .collect(),
        ));
    }
    TieredIndexStrategy::with_max_duplicates(dimensions, sfcs, tier_bytes, max_duplicates)
}
