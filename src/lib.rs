//! Tiered space-filling-curve index engine.
//!
//! Turns multi-dimensional numeric data (longitude, latitude, time, …)
//! into compact byte-string keys ordered along a compact Hilbert curve,
//! and decomposes multi-dimensional range queries into short lists of
//! contiguous key ranges for a lexicographic key-value store. A stack of
//! curves at increasing precision (tiers) keeps entries that span large
//! areas cheap to store and point data cheap to query.
//!
//! ```rust
//! use tessera::prelude::*;
//!
//! let dimensions = vec![
//!     DimensionDefinition::longitude(),
//!     DimensionDefinition::latitude(true),
//! ];
//! let strategy =
//!     create_equal_interval_precision_tiered_strategy(dimensions, &[16, 16], 4);
//!
//! // A point gets exactly one key at the finest tier.
//! let point = NumericDataset::new(vec![
//!     NumericData::Value(-74.006),
//!     NumericData::Value(40.713),
//! ]);
//! let ids = strategy.insertion_ids(&point);
//! assert_eq!(ids.composite_ids().len(), 1);
//!
//! // A query box becomes per-partition sort-key ranges, finest tier first.
//! let query = NumericDataset::new(vec![
//!     NumericData::range(-75.0, -73.0),
//!     NumericData::range(40.0, 41.0),
//! ]);
//! let ranges = strategy.query_ranges(&query, Some(16), None);
//! assert!(!ranges.is_empty());
//! ```

pub mod bytes_util;
pub mod data;
pub mod dimension;
pub mod error;
pub mod index;
pub mod keys;
pub mod sfc;
pub mod varint;

pub use data::{
    apply_bins, binned_ranges_per_dimension, BinRange, BinnedNumericDataset, NumericData,
    NumericDataset,
};
pub use dimension::{
    BinUnit, BoundedDimension, DimensionDefinition, PeriodicDimension, TemporalDimension,
};
pub use error::{Result, TesseraError};
pub use index::{
    create_defined_precision_tiered_strategy, create_equal_interval_precision_tiered_strategy,
    create_full_incremental_tiered_strategy, create_tiered_strategy_from_options,
    NumericIndexStrategy, SingleTierStrategy, TierMetadata, TieredIndexOptions,
    TieredIndexStrategy,
};
pub use keys::{
    ByteRange, InsertionIds, QueryRanges, RangeDecomposition, SinglePartitionInsertionIds,
    SinglePartitionQueryRanges,
};
pub use sfc::{HilbertSfc, SfcDimension};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{
        create_defined_precision_tiered_strategy,
        create_equal_interval_precision_tiered_strategy,
        create_full_incremental_tiered_strategy, BinUnit, DimensionDefinition, HilbertSfc,
        InsertionIds, NumericData, NumericDataset, NumericIndexStrategy, QueryRanges, Result,
        SfcDimension, TesseraError, TierMetadata, TieredIndexOptions, TieredIndexStrategy,
    };
}
