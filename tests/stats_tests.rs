//! Tests for the pairwise moments and the Student's t tail.

use approx::assert_relative_eq;
use mvstats::stats::{CoAccumulator, PairMoments, reduce_pairs, student_t_sf};
use mvstats::{DataArray, Dim};
use ndarray::Array2;

// ============================================================================
// Student's t Tests
// ============================================================================

/// Test the tails of the survival function at infinite t.
#[test]
fn test_student_t_sf_infinite_t() {
    assert_eq!(student_t_sf(f64::INFINITY, 3.0), 0.0);
    assert_eq!(student_t_sf(f64::NEG_INFINITY, 3.0), 1.0);
    assert_relative_eq!(student_t_sf(0.0, 3.0), 0.5, epsilon = 1e-12);
    assert!(student_t_sf(f64::NAN, 3.0).is_nan());
    assert!(student_t_sf(1.0, 0.0).is_nan());
}

// ============================================================================
// Pair Moments Tests
// ============================================================================

/// Test that a perfect linear relation has zero p-value and standard error.
#[test]
fn test_perfect_correlation_is_exact() {
    for cov in [2.0, -2.0] {
        let moments = PairMoments {
            n: 5,
            x_mean: 0.0,
            y_mean: 0.0,
            x_var: 1.0,
            y_var: 4.0,
            cov,
        };
        assert_eq!(moments.cor().abs(), 1.0);
        assert!(moments.t_stat().is_infinite());
        assert_eq!(moments.pval(), 0.0);
        assert_eq!(moments.stderr(), 0.0);
    }
}

/// Test that pairs with a missing value are skipped.
#[test]
fn test_accumulator_skips_missing_pairs() {
    let mut acc = CoAccumulator::new();
    for (x, y) in [(1.0, 2.0), (f64::NAN, 9.0), (2.0, 4.0), (3.0, f64::NAN), (3.0, 6.0)] {
        acc.add(x, y);
    }
    let moments = acc.report();

    assert_eq!(moments.n, 3);
    assert_relative_eq!(moments.x_mean, 2.0, epsilon = 1e-12);
    assert_relative_eq!(moments.x_var, 2.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(moments.cov, 4.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(moments.slope(), 2.0, epsilon = 1e-12);

    assert_eq!(CoAccumulator::new().report().n, 0);
}

/// Test that the moment field keeps the non-time dims of the broadcast inputs.
#[test]
fn test_reduce_pairs_per_cell() {
    let x = DataArray::time_series("x", vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0])
        .expect("failed to build series");
    let values = Array2::from_shape_fn((3, 2), |(t, lon)| (lon + 1) as f64 * t as f64);
    let y = DataArray::new(
        None,
        vec![Dim::range("time", 3), Dim::new("lon", vec![10.0, 20.0])],
        values.into_dyn(),
    )
    .expect("failed to build grid");

    let field = reduce_pairs(&x, &y).expect("failed to reduce");

    assert_eq!(field.dims(), &[Dim::new("lon", vec![10.0, 20.0])]);
    assert_eq!(field.moments().shape(), &[2]);
    for (lon, moments) in field.moments().iter().enumerate() {
        assert_eq!(moments.n, 3);
        assert_relative_eq!(moments.slope(), (lon + 1) as f64, epsilon = 1e-12);
    }

    let slope = field.map("slope", PairMoments::slope).expect("failed to map");
    assert_eq!(slope.name(), Some("slope"));
    assert_eq!(slope.dim_names(), vec!["lon"]);
}
