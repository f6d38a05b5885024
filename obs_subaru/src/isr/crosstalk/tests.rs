use std::sync::Arc;

use glam::DAffine2;

use super::*;
use crate::camera::{Detector, ReadoutCorner};
use crate::geom::Box2I;
use crate::testing::{exposure_from_fn, small_detector, uniform_exposure};

const AMP_W: usize = 16;
const AMP_H: usize = 12;
const BACKGROUND: f32 = 100.0;
const BRIGHT: f32 = 60000.0;

fn zeros() -> Vec<Vec<f64>> {
    vec![vec![0.0; 4]; 4]
}

fn unit_gains() -> Vec<Vec<f64>> {
    vec![vec![1.0; 4]; 10]
}

fn exposure_with_sources(ccd: u32, sources: &[(usize, usize)]) -> Exposure {
    let sources = sources.to_vec();
    exposure_from_fn(small_detector(ccd, AMP_W, AMP_H), move |x, y| {
        if sources.contains(&(x, y)) {
            BRIGHT
        } else {
            BACKGROUND
        }
    })
}

fn pixel(exposure: &Exposure, x: usize, y: usize) -> f32 {
    *exposure.image().get(x, y)
}

#[test]
fn test_zero_coefficients_are_a_no_op() {
    let mut exposure = exposure_with_sources(0, &[(3, 3)]);
    let before = exposure.masked_image.clone();
    let result =
        apply_crosstalk(&mut exposure, &zeros(), &zeros(), &unit_gains(), 45000.0, "CROSSTALK")
            .unwrap();
    assert!(!result.applied);
    assert_eq!(exposure.masked_image, before);
    assert!(!exposure.mask().planes().contains("CROSSTALK"));
    assert!(!exposure.mask().planes().contains(TEMP_MASK_PLANE));
}

#[test]
fn test_single_bright_source_primary_term() {
    let mut exposure = exposure_with_sources(0, &[(10, 10)]);
    let mut c1 = zeros();
    c1[2][0] = 1e-4;
    let result =
        apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK").unwrap();
    assert!(result.applied);
    assert_eq!(result.flagged_pixels, 1);

    let victim_x = 2 * AMP_W + 10;
    assert!((pixel(&exposure, victim_x, 10) - (BACKGROUND - 6.0)).abs() < 1e-3);
    assert!((pixel(&exposure, victim_x + 1, 10) - (BACKGROUND - 0.01)).abs() < 1e-4);
    assert!((pixel(&exposure, 2 * AMP_W, 0) - (BACKGROUND - 0.01)).abs() < 1e-4);

    // Amps 0, 1 and 3 have no incoming terms.
    assert_eq!(pixel(&exposure, 10, 10), BRIGHT);
    assert_eq!(pixel(&exposure, AMP_W + 4, 4), BACKGROUND);
    assert_eq!(pixel(&exposure, 3 * AMP_W + 4, 4), BACKGROUND);

    let crosstalk = exposure.mask().plane_bitmask("CROSSTALK").unwrap();
    assert_eq!(exposure.mask().count_bits(crosstalk), 1);
    assert_ne!(exposure.mask().get(victim_x, 10) & crosstalk, 0);
    assert!(!exposure.mask().planes().contains(TEMP_MASK_PLANE));
}

#[test]
fn test_right_read_amps_are_flipped() {
    // Amp 1 reads right to left, so its first-read column is parent x = 2 * AMP_W - 1.
    let source_x = 2 * AMP_W - 1;
    let mut exposure = exposure_with_sources(0, &[(source_x, 4)]);
    let mut c1 = zeros();
    c1[0][1] = 1e-4;
    c1[3][1] = 1e-4;
    apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK").unwrap();

    // Amp 0 reads left to right: its first column is x = 0.
    assert!((pixel(&exposure, 0, 4) - (BACKGROUND - 6.0)).abs() < 1e-3);
    // Amp 3 reads right to left: its first column is the last image column.
    assert!((pixel(&exposure, 4 * AMP_W - 1, 4) - (BACKGROUND - 6.0)).abs() < 1e-3);

    let crosstalk = exposure.mask().plane_bitmask("CROSSTALK").unwrap();
    assert_ne!(exposure.mask().get(0, 4) & crosstalk, 0);
    assert_ne!(exposure.mask().get(4 * AMP_W - 1, 4) & crosstalk, 0);
    assert_eq!(exposure.mask().count_bits(crosstalk), 2);
}

#[test]
fn test_secondary_term_reads_two_columns_later() {
    let mut exposure = exposure_with_sources(0, &[(10, 5)]);
    let mut c1 = zeros();
    let mut c2 = zeros();
    c1[2][0] = 1e-4;
    c2[2][0] = 1e-5;
    c1[1][0] = 1e-4;
    c2[1][0] = 1e-5;
    let result = apply_crosstalk(&mut exposure, &c1, &c2, &unit_gains(), 45000.0, "CROSSTALK")
        .unwrap();

    // Even victim: readout column 8 sees source column 10, parent +2.
    let even_primary = 2 * AMP_W + 10;
    let even_secondary = 2 * AMP_W + 8;
    let primary_bg = 1e-4 * BACKGROUND as f64;
    let secondary_bg = 1e-5 * BACKGROUND as f64;
    let expected_primary = BACKGROUND as f64 - 6.0 - secondary_bg;
    let expected_secondary = BACKGROUND as f64 - primary_bg - 0.6;
    assert!((pixel(&exposure, even_primary, 5) as f64 - expected_primary).abs() < 1e-3);
    assert!((pixel(&exposure, even_secondary, 5) as f64 - expected_secondary).abs() < 1e-3);

    // Odd victim is flipped: readout column c sits at parent 2 * AMP_W - 1 - c.
    let odd_primary = 2 * AMP_W - 1 - 10;
    let odd_secondary = 2 * AMP_W - 1 - 8;
    assert!((pixel(&exposure, odd_primary, 5) as f64 - expected_primary).abs() < 1e-3);
    assert!((pixel(&exposure, odd_secondary, 5) as f64 - expected_secondary).abs() < 1e-3);

    // Last two readout columns have no secondary source.
    let last_even = 3 * AMP_W - 1;
    assert!(
        (pixel(&exposure, last_even, 0) as f64 - (BACKGROUND as f64 - primary_bg)).abs() < 1e-4
    );

    let crosstalk = exposure.mask().plane_bitmask("CROSSTALK").unwrap();
    for x in [even_primary, even_secondary, odd_primary, odd_secondary] {
        assert_ne!(exposure.mask().get(x, 5) & crosstalk, 0, "x={x}");
    }
    assert_eq!(result.flagged_pixels, 4);
}

#[test]
fn test_gain_ratio_scales_contamination() {
    let mut exposure = exposure_with_sources(3, &[(10, 10)]);
    let mut c1 = zeros();
    c1[2][0] = 1e-4;
    let mut gains = unit_gains();
    gains[3] = vec![2.0, 1.0, 1.0, 1.0];
    apply_crosstalk(&mut exposure, &c1, &zeros(), &gains, 45000.0, "CROSSTALK").unwrap();
    assert!((pixel(&exposure, 2 * AMP_W + 10, 10) - (BACKGROUND - 12.0)).abs() < 1e-3);
}

#[test]
fn test_missing_gain_row_uses_unit_gains() {
    let mut exposure = exposure_with_sources(57, &[(10, 10)]);
    let mut c1 = zeros();
    c1[2][0] = 1e-4;
    let mut gains = unit_gains();
    gains[7] = vec![5.0, 5.0, 5.0, 0.5];
    apply_crosstalk(&mut exposure, &c1, &zeros(), &gains, 45000.0, "CROSSTALK").unwrap();
    assert!((pixel(&exposure, 2 * AMP_W + 10, 10) - (BACKGROUND - 6.0)).abs() < 1e-3);
}

#[test]
fn test_bright_victim_is_not_flagged() {
    let mut exposure = exposure_with_sources(0, &[(10, 10), (2 * AMP_W + 10, 10)]);
    let mut c1 = zeros();
    c1[2][0] = 1e-4;
    let result =
        apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK").unwrap();
    assert_eq!(result.flagged_pixels, 0);
    assert!((pixel(&exposure, 2 * AMP_W + 10, 10) - (BRIGHT - 6.0)).abs() < 1e-2);
}

#[test]
fn test_existing_mask_bits_are_preserved() {
    let mut exposure = exposure_with_sources(0, &[(10, 10)]);
    let bad = exposure.mask().plane_bitmask("BAD").unwrap();
    let bad_box = Box2I::from_corner_size((2 * AMP_W + 8) as i32, 8, 4, 4);
    exposure.mask_mut().or_box(bad_box, bad);
    let mut c1 = zeros();
    c1[2][0] = 1e-4;
    apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK").unwrap();

    assert_eq!(exposure.mask().count_bits(bad), 16);
    let crosstalk = exposure.mask().plane_bitmask("CROSSTALK").unwrap();
    assert_eq!(exposure.mask().get(2 * AMP_W + 10, 10), bad | crosstalk);
}

#[test]
fn test_bad_shape_fails_before_mutation() {
    let mut exposure = exposure_with_sources(0, &[(10, 10)]);
    let before = exposure.masked_image.clone();
    let mut c1 = vec![vec![0.0; 4]; 3];
    c1[2][0] = 1e-4;
    let err = apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK")
        .unwrap_err();
    assert!(matches!(err, IsrError::MatrixShape { .. }));
    assert_eq!(exposure.masked_image, before);

    let mut c2 = zeros();
    c2[0][1] = f64::INFINITY;
    let err = apply_crosstalk(&mut exposure, &zeros(), &c2, &unit_gains(), 45000.0, "CROSSTALK")
        .unwrap_err();
    assert!(matches!(err, IsrError::NonFiniteCoefficient { .. }));
    assert_eq!(exposure.masked_image, before);
}

#[test]
fn test_fewer_than_four_amps_is_skipped() {
    let mut detector = Detector::four_amp(0, "two", AMP_W, AMP_H, DAffine2::IDENTITY);
    detector.amplifiers.truncate(2);
    detector.bbox = Box2I::from_corner_size(0, 0, 2 * AMP_W, AMP_H);
    let mut exposure = uniform_exposure(Arc::new(detector), BRIGHT);
    let mut c1 = zeros();
    c1[1][0] = 1e-4;
    let result =
        apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK").unwrap();
    assert!(!result.applied);
    assert!(exposure.image().buffer().iter().all(|&v| v == BRIGHT));
}

#[test]
fn test_unequal_amp_sizes_rejected() {
    let mut detector = Detector::four_amp(0, "odd", AMP_W, AMP_H, DAffine2::IDENTITY);
    detector.amplifiers[2].bbox = Box2I::from_corner_size(32, 0, 15, AMP_H);
    detector.amplifiers[3] = crate::camera::Amplifier {
        name: "A4".into(),
        bbox: Box2I::from_corner_size(47, 0, 17, AMP_H),
        readout_corner: ReadoutCorner::LowerRight,
    };
    let mut exposure = uniform_exposure(Arc::new(detector), BACKGROUND);
    let mut c1 = zeros();
    c1[1][0] = 1e-4;
    let err = apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK")
        .unwrap_err();
    assert!(matches!(err, IsrError::AmpSizeMismatch { amp: 2, .. }));
}

#[test]
fn test_config_wrapper_uses_custom_plane() {
    let mut exposure = exposure_with_sources(0, &[(10, 10)]);
    let mut config = CrosstalkConfig::default();
    config.coefficients1[2][0] = 1e-4;
    config.crosstalk_mask_plane = "XTALK".to_string();
    let result = apply_crosstalk_config(&mut exposure, &config).unwrap();
    assert_eq!(result.flagged_pixels, 1);
    assert!(exposure.mask().planes().contains("XTALK"));
    assert!(!exposure.mask().planes().contains("CROSSTALK"));
}

#[test]
fn test_existing_temp_plane_is_left_alone() {
    let mut exposure = exposure_with_sources(0, &[(10, 10)]);
    let user_temp = exposure.mask_mut().add_plane(TEMP_MASK_PLANE).unwrap();
    exposure
        .mask_mut()
        .or_box(Box2I::from_corner_size(0, 0, 4, 4), user_temp);
    let mut c1 = zeros();
    c1[2][0] = 1e-4;

    let result =
        apply_crosstalk(&mut exposure, &c1, &zeros(), &unit_gains(), 45000.0, "CROSSTALK").unwrap();

    let planes = exposure.mask().planes();
    assert!(planes.contains(TEMP_MASK_PLANE));
    assert_eq!(planes.bit(TEMP_MASK_PLANE).unwrap(), user_temp.trailing_zeros());
    assert!(!planes.contains("TEMP_1"));
    assert_eq!(exposure.mask().count_bits(user_temp), 16);
    // Only the real source flags a victim, not the pre-existing TEMP pixels.
    assert_eq!(result.flagged_pixels, 1);
    let crosstalk = exposure.mask().plane_bitmask("CROSSTALK").unwrap();
    assert_ne!(exposure.mask().get(2 * AMP_W + 10, 10) & crosstalk, 0);
}

/// Readout column `c` of amp `amp` in parent coordinates.
fn parent_column(amp: usize, c: usize) -> usize {
    if amp % 2 == 0 {
        amp * AMP_W + c
    } else {
        (amp + 1) * AMP_W - 1 - c
    }
}

#[test]
fn test_injected_crosstalk_is_recovered() {
    let mut c1 = zeros();
    let mut c2 = zeros();
    for (i, row) in c1.iter_mut().enumerate() {
        for (j, c) in row.iter_mut().enumerate() {
            if i != j {
                *c = -1.2e-4 - 1e-5 * (i + j) as f64;
            }
        }
    }
    for (i, row) in c2.iter_mut().enumerate() {
        for (j, c) in row.iter_mut().enumerate() {
            if i != j {
                *c = -1e-5;
            }
        }
    }

    let clean = |x: usize, y: usize| {
        if (x, y) == (10, 10) {
            BRIGHT as f64
        } else {
            BACKGROUND as f64
        }
    };
    let observed = |x: usize, y: usize| {
        let victim = x / AMP_W;
        let c = if victim % 2 == 0 {
            x - victim * AMP_W
        } else {
            (victim + 1) * AMP_W - 1 - x
        };
        let leak: f64 = (0..4)
            .filter(|&j| j != victim)
            .map(|j| {
                let secondary = if c + SECONDARY_OFFSET < AMP_W {
                    clean(parent_column(j, c + SECONDARY_OFFSET), y)
                } else {
                    0.0
                };
                c1[victim][j] * clean(parent_column(j, c), y) + c2[victim][j] * secondary
            })
            .sum();
        (clean(x, y) + leak) as f32
    };

    let mut exposure = exposure_from_fn(small_detector(0, AMP_W, AMP_H), observed);
    let victim = (2 * AMP_W + 10, 10);
    assert!((pixel(&exposure, victim.0, victim.1) as f64 - clean(victim.0, victim.1)).abs() > 5.0);

    let config = crate::isr::config::IsrConfig {
        crosstalk: Some(CrosstalkConfig {
            coefficients1: c1.clone(),
            coefficients2: c2.clone(),
            ..CrosstalkConfig::default()
        }),
        ..Default::default()
    };
    let report = crate::isr::correct::correct(&mut exposure, &config).unwrap();

    // The correction sees contaminated sources, leaving a residual of order C * leak.
    for y in 0..AMP_H {
        for x in 0..4 * AMP_W {
            let residual = pixel(&exposure, x, y) as f64 - clean(x, y);
            assert!(residual.abs() < 1e-2, "({x}, {y}) residual {residual}");
        }
    }
    let crosstalk = report.crosstalk.unwrap();
    assert!(crosstalk.applied);
    // Primary and secondary victims in each of the three other amps.
    assert_eq!(crosstalk.flagged_pixels, 6);
}
