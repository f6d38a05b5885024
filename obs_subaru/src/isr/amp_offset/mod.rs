//! Inter-amplifier pedestal correction.
//!
//! Residual DC offsets between neighbouring amplifiers show up as a step
//! across each amp boundary. The step is measured from narrow strips on
//! either side of the boundary, and per-amp pedestals are solved for so
//! that subtracting them removes the steps without changing the total
//! flux (the pedestals sum to zero).


use common::buffer2::Buffer2;
use nalgebra::{DMatrix, DVector};

use super::config::AmpOffsetConfig;
use super::error::IsrError;
use crate::background::Background;
use crate::camera::Detector;
use crate::detection::{SourceDetector, ThresholdDetector};
use crate::geom::Box2I;
use crate::image::{Exposure, MaskPixel};
use crate::math::statistics::{clipped_mean, finite_fraction, nan_median_f32, rolling_nan_mean};

/// Smoothing applied by the source detector, pixels.
pub const DETECTION_SMOOTHING_SIGMA: f64 = 2.0;

const CLIP_SIGMA: f64 = 3.0;
const CLIP_ITERATIONS: usize = 3;
const SVD_EPS: f64 = 1e-9;

/// Metadata key for the pedestal of amp `index` (0-based).
pub fn pedestal_key(index: usize) -> String {
    format!("PEDESTAL{}", index + 1)
}

/// Measurement across the boundary between amps `left` and `left + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryEstimate {
    pub left: usize,
    /// Clipped mean of the smoothed right-minus-left differences; NaN if none.
    pub raw_estimate: f64,
    /// Fraction of rows with a usable difference.
    pub viable_fraction: f64,
    pub accepted: bool,
    /// Value fed to the solver: `raw_estimate` if accepted, else 0.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmpOffsetResult {
    /// Pedestal subtracted from each amp, ADU.
    pub pedestals: Vec<f64>,
    pub boundaries: Vec<BoundaryEstimate>,
}

/// Measure and remove amp pedestals using the exposure's own detector and
/// the default threshold detector.
///
/// Returns `Ok(None)` without touching the exposure when nothing can be
/// measured (no finite pixels left, or a single amplifier).
pub fn apply_amp_offset(
    exposure: &mut Exposure,
    config: &AmpOffsetConfig,
) -> Result<Option<AmpOffsetResult>, IsrError> {
    let detector = exposure.detector().clone();
    apply_amp_offset_with_detector(exposure, config, &detector)
}

/// [`apply_amp_offset`] with an explicit detector description.
pub fn apply_amp_offset_with_detector(
    exposure: &mut Exposure,
    config: &AmpOffsetConfig,
    detector: &Detector,
) -> Result<Option<AmpOffsetResult>, IsrError> {
    apply_amp_offset_with(exposure, config, detector, &ThresholdDetector::default())
}

/// Full form: explicit detector description and source detector.
pub fn apply_amp_offset_with(
    exposure: &mut Exposure,
    config: &AmpOffsetConfig,
    detector: &Detector,
    source_detector: &dyn SourceDetector,
) -> Result<Option<AmpOffsetResult>, IsrError> {
    config.validate()?;
    let ignored = exposure
        .mask()
        .bitmask_of(&config.ignored_pixel_mask)
        .map_err(IsrError::from_plane_lookup)?;

    let _span = tracing::info_span!("amp_offset", ccd = detector.id).entered();

    let image_bbox = exposure.bbox();
    for (i, amp) in detector.amplifiers.iter().enumerate() {
        if !image_bbox.contains_box(&amp.bbox) {
            return Err(IsrError::AmpOutsideImage {
                ccd: detector.id,
                amp: i,
                bbox: amp.bbox,
                image: image_bbox,
            });
        }
    }
    if detector.num_amplifiers() < 2 {
        tracing::warn!(
            amps = detector.num_amplifiers(),
            "amp offset needs at least two amplifiers, skipping"
        );
        return Ok(None);
    }

    let working = prepare_working_image(exposure, config, detector, ignored, source_detector);
    let Some(working) = working else {
        tracing::warn!("all pixels are masked, skipping amp offset correction");
        return Ok(None);
    };

    let boundaries: Vec<BoundaryEstimate> = (0..detector.num_amplifiers() - 1)
        .map(|left| {
            measure_boundary(
                &working,
                image_bbox,
                &detector.amplifiers[left].bbox,
                &detector.amplifiers[left + 1].bbox,
                left,
                config,
            )
        })
        .collect();

    let diffs: Vec<f64> = boundaries.iter().map(|b| b.value).collect();
    let pedestals = solve_pedestals(&diffs);

    for (amp, &pedestal) in detector.amplifiers.iter().zip(pedestals.iter()) {
        exposure
            .image_mut()
            .view_mut(amp.bbox)
            .sub_scalar(pedestal as f32);
    }
    for (i, &pedestal) in pedestals.iter().enumerate() {
        exposure.metadata.set(&pedestal_key(i), pedestal);
    }

    tracing::info!(?pedestals, "amp offsets applied");
    Ok(Some(AmpOffsetResult {
        pedestals,
        boundaries,
    }))
}

/// Copy of the image with ignored, background-subtracted and detected
/// pixels handled. `None` when no finite pixel remains.
fn prepare_working_image(
    exposure: &Exposure,
    config: &AmpOffsetConfig,
    detector: &Detector,
    ignored: MaskPixel,
    source_detector: &dyn SourceDetector,
) -> Option<Buffer2<f32>> {
    let mut working = exposure.image().buffer().clone();
    working.zip_apply(exposure.mask().image().buffer(), |v, &m| {
        if m & ignored != 0 {
            *v = f32::NAN;
        }
    });

    if config.do_background {
        let widest_amp = detector
            .amplifiers
            .iter()
            .map(|a| a.bbox.width())
            .max()
            .unwrap_or(1);
        let bin_size = config.background.bin_size.max(widest_amp);
        match Background::estimate(&working, bin_size) {
            Some(background) => background.subtract_from(&mut working),
            None => return None,
        }
    }

    if config.do_detection {
        let detected = source_detector.detect(&working, DETECTION_SMOOTHING_SIGMA);
        tracing::debug!(pixels = detected.count_ones(), "sources excluded from amp edges");
        for (x, y) in detected.iter_set() {
            working[(x, y)] = f32::NAN;
        }
    }

    working.iter().any(|v| v.is_finite()).then_some(working)
}

/// Column range `[start, end)` clamped to `[lo, hi)`; empty ranges collapse to `lo..lo`.
fn clamp_range(start: i64, end: i64, lo: i64, hi: i64) -> (usize, usize) {
    let s = start.clamp(lo, hi);
    let e = end.clamp(s, hi);
    (s as usize, e as usize)
}

fn measure_boundary(
    working: &Buffer2<f32>,
    image_bbox: Box2I,
    left_amp: &Box2I,
    right_amp: &Box2I,
    left: usize,
    config: &AmpOffsetConfig,
) -> BoundaryEstimate {
    let origin_x = image_bbox.x0() as i64;
    let origin_y = image_bbox.y0() as i64;
    let width = config.amp_edge_width as i64;
    let inset = config.amp_edge_inset as i64;
    let edge = right_amp.x0() as i64 - origin_x;

    let (left_start, left_end) = clamp_range(
        edge - inset - width,
        edge - inset,
        left_amp.x0() as i64 - origin_x,
        left_amp.x_end() as i64 - origin_x,
    );
    let (right_start, right_end) = clamp_range(
        edge + inset,
        edge + inset + width,
        right_amp.x0() as i64 - origin_x,
        right_amp.x_end() as i64 - origin_x,
    );

    let row_start = (left_amp.y0().max(right_amp.y0()) as i64 - origin_y) as usize;
    let row_end = (left_amp.y_end().min(right_amp.y_end()) as i64 - origin_y).max(row_start as i64)
        as usize;

    let mut scratch = Vec::with_capacity(config.amp_edge_width);
    let mut edge_diff: Vec<f64> = Vec::with_capacity(row_end - row_start);
    for y in row_start..row_end {
        let row = working.row(y);
        let left_median = nan_median_f32(&row[left_start..left_end], &mut scratch);
        let right_median = nan_median_f32(&row[right_start..right_end], &mut scratch);
        edge_diff.push(right_median as f64 - left_median as f64);
    }

    let mut smoothed = rolling_nan_mean(&edge_diff, config.amp_edge_window);
    for (s, d) in smoothed.iter_mut().zip(edge_diff.iter()) {
        if !d.is_finite() {
            *s = f64::NAN;
        }
    }

    let viable_fraction = finite_fraction(&smoothed);
    let raw_estimate = clipped_mean(&smoothed, CLIP_SIGMA, CLIP_ITERATIONS).unwrap_or(f64::NAN);
    let accepted = raw_estimate.is_finite()
        && viable_fraction >= config.amp_edge_min_frac
        && raw_estimate.abs() <= config.amp_edge_max_offset;

    if accepted {
        tracing::debug!(left, raw_estimate, viable_fraction, "amp edge accepted");
    } else {
        tracing::info!(
            left,
            raw_estimate,
            viable_fraction,
            min_frac = config.amp_edge_min_frac,
            max_offset = config.amp_edge_max_offset,
            "amp edge rejected"
        );
    }

    BoundaryEstimate {
        left,
        raw_estimate,
        viable_fraction,
        accepted,
        value: if accepted { raw_estimate } else { 0.0 },
    }
}

/// Solve the boundary system for per-amp pedestals.
///
/// For `n` amps and `n - 1` boundary differences `d` the system is
///
/// ```text
/// [-1  1  0 ...       ] p = [ d0          ]
/// [ 1 -2  1 ...       ]     [ d1 - d0     ]
/// [       ...         ]     [ ...         ]
/// [ ...        1  -1  ]     [ -d(n-2)     ]
/// ```
///
/// which is singular (constant offsets are free). The SVD least-squares
/// solution has minimum norm and so sums to zero. Failure or NaN gives
/// all-zero pedestals.
pub fn solve_pedestals(diffs: &[f64]) -> Vec<f64> {
    let n = diffs.len() + 1;
    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut b = DVector::<f64>::zeros(n);
    for i in 0..n {
        if i > 0 {
            a[(i, i - 1)] = 1.0;
            a[(i, i)] -= 1.0;
        }
        if i + 1 < n {
            a[(i, i + 1)] = 1.0;
            a[(i, i)] -= 1.0;
        }
        let right = if i < diffs.len() { diffs[i] } else { 0.0 };
        let left = if i > 0 { diffs[i - 1] } else { 0.0 };
        b[i] = right - left;
    }

    let solution = match a.svd(true, true).solve(&b, SVD_EPS) {
        Ok(p) => p,
        Err(err) => {
            tracing::warn!(err, "pedestal solve failed, using zero pedestals");
            return vec![0.0; n];
        }
    };
    if solution.iter().any(|p| !p.is_finite()) {
        tracing::warn!("pedestal solve produced non-finite values, using zero pedestals");
        return vec![0.0; n];
    }
    solution.iter().copied().collect()
}
