use super::*;

#[test]
fn test_median_odd_and_even() {
    assert_eq!(median_f32_mut(&mut [3.0, 1.0, 2.0]), 2.0);
    assert_eq!(median_f32_mut(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    assert_eq!(median_f64_mut(&mut [5.0, -1.0]), 2.0);
    assert_eq!(median_f64_mut(&mut [7.0]), 7.0);
}

#[test]
#[should_panic(expected = "median of empty slice")]
fn test_median_empty_panics() {
    median_f32_mut(&mut []);
}

#[test]
fn test_nan_median_skips_nan() {
    let mut scratch = Vec::new();
    assert_eq!(
        nan_median_f32(&[f32::NAN, 5.0, 1.0, f32::NAN, 3.0], &mut scratch),
        3.0
    );
    assert!(nan_median_f32(&[f32::NAN, f32::NAN], &mut scratch).is_nan());
    assert!(nan_median_f32(&[], &mut scratch).is_nan());
}

#[test]
fn test_median_and_sigma() {
    let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let (median, sigma) = median_and_sigma_f32_mut(&mut data);
    assert_eq!(median, 3.0);
    assert!((sigma - MAD_TO_SIGMA).abs() < 1e-6);
}

#[test]
fn test_sigma_clipped_median_rejects_outliers() {
    let mut values: Vec<f32> = (0..100).map(|i| 10.0 + (i % 5) as f32 * 0.1).collect();
    values.extend([1000.0, 5000.0, f32::NAN]);
    let median = sigma_clipped_median_f32(&mut values, 3.0, 3);
    assert!((median - 10.2).abs() < 1e-5, "median {median}");
}

#[test]
fn test_sigma_clipped_median_all_nan() {
    let mut values = vec![f32::NAN; 4];
    assert!(sigma_clipped_median_f32(&mut values, 3.0, 3).is_nan());
}

#[test]
fn test_clipped_mean_constant() {
    let values = vec![1.5; 200];
    assert_eq!(clipped_mean(&values, 3.0, 3), Some(1.5));
}

#[test]
fn test_clipped_mean_ignores_outliers_and_nan() {
    let mut values: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 0.9 } else { 1.1 }).collect();
    values.extend([50.0, -40.0, f64::NAN, f64::INFINITY]);
    let mean = clipped_mean(&values, 3.0, 3).unwrap();
    assert!((mean - 1.0).abs() < 1e-9, "mean {mean}");
}

#[test]
fn test_clipped_mean_no_finite_values() {
    assert_eq!(clipped_mean(&[f64::NAN, f64::NAN], 3.0, 3), None);
    assert_eq!(clipped_mean(&[], 3.0, 3), None);
}

#[test]
fn test_rolling_mean_truncates_at_edges() {
    let out = rolling_nan_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
    assert_eq!(out, vec![1.5, 2.0, 3.0, 4.0, 4.5]);
}

#[test]
fn test_rolling_mean_skips_nan() {
    let nan = f64::NAN;
    let out = rolling_nan_mean(&[nan, nan, nan, 4.0, nan, nan, nan], 3);
    assert!(out[0].is_nan());
    assert!(out[1].is_nan());
    assert_eq!(out[2], 4.0);
    assert_eq!(out[3], 4.0);
    assert_eq!(out[4], 4.0);
    assert!(out[5].is_nan());
}

#[test]
fn test_rolling_mean_window_larger_than_input() {
    let out = rolling_nan_mean(&[2.0, f64::NAN, 4.0], 11);
    assert_eq!(out, vec![3.0, 3.0, 3.0]);
}

#[test]
fn test_finite_fraction() {
    assert_eq!(finite_fraction(&[1.0, f64::NAN, 2.0, f64::NAN]), 0.5);
    assert_eq!(finite_fraction(&[]), 0.0);
}
