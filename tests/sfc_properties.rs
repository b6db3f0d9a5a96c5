//! Randomized sweeps over the universal index properties.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera::prelude::*;
use tessera::sfc::cache;

fn unit_curve(bits: u32, dims: usize) -> HilbertSfc {
    HilbertSfc::new(
        (0..dims)
            .map(|_| {
                SfcDimension::new(
                    DimensionDefinition::Bounded(tessera::BoundedDimension::new(0.0, 1.0)),
                    bits,
                )
            })
            .collect(),
    )
}

// decode(encode(v)) is a cell containing v.
#[test]
fn test_round_trip_cell_contains_value() {
    let mut rng = StdRng::seed_from_u64(7);
    for &(bits, dims) in &[(4u32, 2usize), (10, 3), (20, 2), (12, 4)] {
        let sfc = unit_curve(bits, dims);
        for _ in 0..200 {
            let values: Vec<f64> = (0..dims).map(|_| rng.gen_range(0.0..1.0)).collect();
            let key = sfc.encode(&values);
            assert_eq!(key.len(), sfc.key_length());
            for (j, (lo, hi)) in sfc.decode(&key).iter().enumerate() {
                assert!(
                    *lo <= values[j] && values[j] < *hi,
                    "bits {} dims {}: value {} outside cell [{}, {})",
                    bits,
                    dims,
                    values[j],
                    lo,
                    hi
                );
            }
        }
    }
}

// A coarse cell is a contiguous index range on a finer curve
// of the same shape, and the fine key of any inner point falls inside it.
#[test]
fn test_ordering_locality_across_precisions() {
    let mut rng = StdRng::seed_from_u64(11);
    let coarse = unit_curve(6, 2);
    let fine = unit_curve(10, 2);
    for _ in 0..100 {
        let values = [rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)];
        let coarse_cell = coarse.decode(&coarse.encode(&values));
        let mins: Vec<f64> = coarse_cell.iter().map(|r| r.0).collect();
        let maxes: Vec<f64> = coarse_cell.iter().map(|r| r.1).collect();

        let decomposition = fine.decompose_range(&mins, &maxes, false, None);
        assert_eq!(
            decomposition.len(),
            1,
            "a coarse cell must be one contiguous run on the finer curve"
        );
        let range = &decomposition.ranges()[0];
        let fine_key = fine.encode(&values);
        assert!(range.start() <= &fine_key && &fine_key <= range.end());
    }
}

// Any query box containing a value covers its key.
#[test]
fn test_query_completeness() {
    let mut rng = StdRng::seed_from_u64(13);
    let sfc = unit_curve(12, 2);
    for _ in 0..100 {
        let values = [rng.gen_range(0.01..0.99), rng.gen_range(0.01..0.99)];
        let key = sfc.encode(&values);
        let mins: Vec<f64> = values.iter().map(|v| v - rng.gen_range(0.0..0.01)).collect();
        let maxes: Vec<f64> = values.iter().map(|v| v + rng.gen_range(0.0..0.01)).collect();
        let decomposition = sfc.decompose_range(&mins, &maxes, true, None);
        let covered = decomposition
            .ranges()
            .iter()
            .any(|range| range.start() <= &key && &key <= range.end());
        assert!(covered, "query box containing {:?} missed its key", values);
    }
}

// With strict edges and no cap, every returned cell really
// intersects the query box, and ranges are sorted and disjoint.
#[test]
fn test_query_tightness_and_order() {
    let mut rng = StdRng::seed_from_u64(17);
    let sfc = unit_curve(8, 2);
    for _ in 0..50 {
        let a = [rng.gen_range(0.0..0.9), rng.gen_range(0.0..0.9)];
        let mins = [a[0], a[1]];
        let maxes = [
            a[0] + rng.gen_range(0.001..0.1),
            a[1] + rng.gen_range(0.001..0.1),
        ];
        let decomposition = sfc.decompose_range(&mins, &maxes, false, None);

        let mut previous_end: Option<bytes::Bytes> = None;
        for range in decomposition.ranges() {
            assert!(range.start() <= range.end());
            if let Some(prev) = previous_end {
                assert!(
                    prev < *range.start(),
                    "ranges must be ascending and disjoint"
                );
            }
            previous_end = Some(range.end().clone());

            for key in [range.start(), range.end()] {
                let cell = sfc.decode(key);
                for (j, (lo, hi)) in cell.iter().enumerate() {
                    assert!(
                        *lo < maxes[j] && *hi > mins[j],
                        "cell [{}, {}) does not intersect query dim {}",
                        lo,
                        hi,
                        j
                    );
                }
            }
        }
    }
}

// A larger box never selects a finer tier than a box it
// encloses.
#[test]
fn test_tier_selection_monotonicity() {
    let mut rng = StdRng::seed_from_u64(19);
    let strategy = create_full_incremental_tiered_strategy(
        vec![
            DimensionDefinition::latitude(false),
            DimensionDefinition::latitude(false),
        ],
        &[12, 12],
    );
    for _ in 0..100 {
        let center = [rng.gen_range(-60.0..60.0), rng.gen_range(-60.0..60.0)];
        let inner = rng.gen_range(0.001..5.0);
        let outer = inner + rng.gen_range(0.001..20.0);

        let tier_of = |half: f64| {
            let data = NumericDataset::new(vec![
                NumericData::range(center[0] - half, center[0] + half),
                NumericData::range(center[1] - half, center[1] + half),
            ]);
            let ids = strategy.insertion_ids(&data);
            ids.partitions()[0].partition_key().unwrap()[0]
        };

        assert!(
            tier_of(outer) <= tier_of(inner),
            "enclosing box selected a finer tier"
        );
    }
}

// Metadata merge is commutative and associative.
#[test]
fn test_metadata_merge_algebra() {
    let strategy = create_full_incremental_tiered_strategy(
        vec![
            DimensionDefinition::longitude(),
            DimensionDefinition::latitude(true),
        ],
        &[6, 6],
    );
    let mut rng = StdRng::seed_from_u64(23);
    let sample = |rng: &mut StdRng| {
        let mut meta = strategy.create_metadata();
        for _ in 0..8 {
            let point = NumericDataset::new(vec![
                NumericData::Value(rng.gen_range(-179.0..179.0)),
                NumericData::Value(rng.gen_range(-89.0..89.0)),
            ]);
            meta.insertion_ids_added(&strategy.insertion_ids(&point));
        }
        meta
    };
    let a = sample(&mut rng);
    let b = sample(&mut rng);
    let c = sample(&mut rng);

    let mut ab = a.clone();
    ab.merge(&b);
    let mut ba = b.clone();
    ba.merge(&a);
    assert_eq!(ab, ba);

    let mut ab_c = ab.clone();
    ab_c.merge(&c);
    let mut bc = b.clone();
    bc.merge(&c);
    let mut a_bc = a.clone();
    a_bc.merge(&bc);
    assert_eq!(ab_c, a_bc);
}

// Equal inputs give equal decompositions regardless of cache
// state.
#[test]
fn test_cache_determinism() {
    let sfc = unit_curve(10, 3);
    let mins = [0.1, 0.2, 0.3];
    let maxes = [0.4, 0.5, 0.6];
    let first = sfc.decompose_range(&mins, &maxes, false, Some(10));
    cache::reset();
    let second = sfc.decompose_range(&mins, &maxes, false, Some(10));
    cache::reset();
    let third = sfc.decompose_range(&mins, &maxes, false, Some(10));
    assert_eq!(first, second);
    assert_eq!(second, third);
}

// Binary round trips are observationally identical.
#[test]
fn test_binary_round_trip_observational_equality() {
    let mut rng = StdRng::seed_from_u64(29);
    let strategy = create_equal_interval_precision_tiered_strategy(
        vec![
            DimensionDefinition::longitude(),
            DimensionDefinition::latitude(true),
            DimensionDefinition::time(BinUnit::Month),
        ],
        &[18, 18, 14],
        3,
    );
    let restored = TieredIndexStrategy::from_binary(&strategy.to_binary()).unwrap();
    assert_eq!(restored.id(), strategy.id());

    for _ in 0..50 {
        let data = NumericDataset::new(vec![
            NumericData::Value(rng.gen_range(-179.0..179.0)),
            NumericData::Value(rng.gen_range(-89.0..89.0)),
            NumericData::Value(rng.gen_range(0.0..2_000_000_000_000.0)),
        ]);
        assert_eq!(restored.insertion_ids(&data), strategy.insertion_ids(&data));
        let query = NumericDataset::new(vec![
            NumericData::range(-10.0, 10.0),
            NumericData::range(-10.0, 10.0),
            NumericData::Value(rng.gen_range(0.0..2_000_000_000_000.0)),
        ]);
        assert_eq!(
            restored.query_ranges(&query, Some(32), None),
            strategy.query_ranges(&query, Some(32), None)
        );
    }
}
