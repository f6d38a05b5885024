//! Flat-field finishing: vignetting and bad-amplifier masks, plus mean
//! combination of individual flats.


use common::buffer2::Buffer2;
use common::float_ext::FloatExt;
use glam::DVec2;
use rayon::prelude::*;

use super::config::{BadAmp, FlatConfig, VignetteConfig};
use super::error::IsrError;
use crate::image::{Exposure, Image, Mask, MaskPixel, MaskedImage};
use crate::math::statistics::median_f32_mut;

/// How the vignetting circle relates to the CCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VignetteCoverage {
    /// Every corner inside the circle; nothing masked.
    Inside,
    /// Every corner outside; the whole CCD masked.
    Outside,
    /// Evaluated pixel by pixel.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatMaskResult {
    pub coverage: VignetteCoverage,
    pub vignetted_pixels: usize,
    /// Bad-amp entries that matched this detector and were applied.
    pub bad_amps_masked: usize,
}

/// Mask vignetted pixels and configured bad amps, ignoring bad-amp entries
/// that name a missing amplifier.
pub fn mask_vignetted_and_bad_amps(
    exposure: &mut Exposure,
    vignette: &VignetteConfig,
    bad_amps: &[BadAmp],
    mask_plane: &str,
) -> Result<FlatMaskResult, IsrError> {
    mask_flat(exposure, vignette, bad_amps, mask_plane, false)
}

/// Apply a [`FlatConfig`] to a combined flat.
pub fn finish_flat_exposure(
    exposure: &mut Exposure,
    config: &FlatConfig,
) -> Result<FlatMaskResult, IsrError> {
    mask_flat(
        exposure,
        &config.vignette,
        &config.bad_amps,
        &config.mask_plane,
        config.strict,
    )
}

fn mask_flat(
    exposure: &mut Exposure,
    vignette: &VignetteConfig,
    bad_amps: &[BadAmp],
    mask_plane: &str,
    strict: bool,
) -> Result<FlatMaskResult, IsrError> {
    vignette.validate()?;
    let bit = exposure
        .mask()
        .plane_bitmask(mask_plane)
        .map_err(IsrError::from_plane_lookup)?;
    let detector = exposure.detector().clone();
    let _span = tracing::info_span!("flat_finish", ccd = detector.id).entered();

    // Resolve bad amps first so strict mode fails before anything is masked.
    let mut amp_boxes = Vec::new();
    for bad in bad_amps.iter().filter(|b| b.ccd == detector.id) {
        match detector.amplifiers.get(bad.amp) {
            Some(amp) => amp_boxes.push(amp.bbox),
            None if strict => {
                return Err(IsrError::UnknownAmplifier {
                    ccd: detector.id,
                    amp: bad.amp,
                    count: detector.num_amplifiers(),
                });
            }
            None => tracing::warn!(
                amp = bad.amp,
                count = detector.num_amplifiers(),
                "bad amp entry names a missing amplifier, ignoring"
            ),
        }
    }

    let center = DVec2::new(vignette.x_center, vignette.y_center);
    let radius = vignette.radius;
    let bbox = exposure.bbox();
    let outside = |p: DVec2| p.distance(center) > radius;

    let corners = bbox
        .corners()
        .map(|c| detector.focal_plane_position(c.x as f64, c.y as f64));
    let corners_outside = corners.iter().filter(|&&p| outside(p)).count();

    let coverage = match corners_outside {
        0 => VignetteCoverage::Inside,
        4 => VignetteCoverage::Outside,
        _ => VignetteCoverage::Partial,
    };

    let mask = exposure.mask_mut();
    let vignetted_pixels = match coverage {
        VignetteCoverage::Inside => 0,
        VignetteCoverage::Outside => {
            tracing::warn!("detector lies entirely outside the vignetting radius, masking it all");
            mask.or_box(bbox, bit);
            bbox.area()
        }
        VignetteCoverage::Partial => {
            let origin = bbox.min;
            let counts: Vec<usize> = mask
                .image_mut()
                .buffer_mut()
                .par_rows_mut()
                .enumerate()
                .map(|(y, row)| {
                    let py = (origin.y + y as i32) as f64;
                    let mut count = 0;
                    for (x, m) in row.iter_mut().enumerate() {
                        let px = (origin.x + x as i32) as f64;
                        if outside(detector.focal_plane_position(px, py)) {
                            *m |= bit;
                            count += 1;
                        }
                    }
                    count
                })
                .collect();
            counts.into_iter().sum()
        }
    };

    for amp_box in &amp_boxes {
        if let Some(overlap) = amp_box.intersection(&bbox) {
            mask.or_box(overlap, bit);
        }
    }

    tracing::info!(
        ?coverage,
        vignetted_pixels,
        bad_amps = amp_boxes.len(),
        "flat mask applied"
    );
    Ok(FlatMaskResult {
        coverage,
        vignetted_pixels,
        bad_amps_masked: amp_boxes.len(),
    })
}

/// Mean-combine flats of identical geometry and normalise by the median.
///
/// Masks are OR-ed and variances combine as `Σ var / N²`. The result keeps
/// the first flat's detector and mask plane dictionary.
pub fn combine_flats(flats: &[Exposure]) -> Result<Exposure, IsrError> {
    let first = flats.first().ok_or(IsrError::NoFlats)?;
    let bbox = first.bbox();
    for (index, flat) in flats.iter().enumerate() {
        if flat.bbox() != bbox {
            return Err(IsrError::FlatGeometryMismatch {
                index,
                expected: bbox,
                actual: flat.bbox(),
            });
        }
    }

    let n = flats.len() as f64;
    let width = bbox.width();
    let height = bbox.height();
    let mut sum = Buffer2::<f64>::new_default(width, height);
    let mut var_sum = Buffer2::<f64>::new_default(width, height);
    let mut mask_bits = Buffer2::<MaskPixel>::new_default(width, height);
    for flat in flats {
        sum.zip_apply(flat.image().buffer(), |acc, &v| *acc += v as f64);
        var_sum.zip_apply(flat.variance().buffer(), |acc, &v| *acc += v as f64);
        mask_bits.zip_apply(flat.mask().image().buffer(), |acc, &m| *acc |= m);
    }

    let mean = sum.map(|&s| (s / n) as f32);
    let mut finite: Vec<f32> = mean.iter().copied().filter(|v| v.is_finite()).collect();
    let median = if finite.is_empty() {
        f32::NAN
    } else {
        median_f32_mut(&mut finite)
    };
    let norm = if median.approximately_eq(0.0) {
        tracing::warn!("combined flat has zero median, leaving it unnormalised");
        1.0
    } else {
        median.finite_or(1.0) as f64
    };

    let image = Image::from_buffer(bbox.min, mean.map(|&v| (v as f64 / norm) as f32));
    let variance = Image::from_buffer(
        bbox.min,
        var_sum.map(|&v| (v / (n * n) / (norm * norm)) as f32),
    );
    let mask = Mask::from_image(
        Image::from_buffer(bbox.min, mask_bits),
        first.mask().planes().clone(),
    );

    tracing::info!(count = flats.len(), median, "flats combined");
    Ok(Exposure::new(
        MaskedImage::new(image, mask, variance)?,
        first.detector().clone(),
    ))
}

/// Combine flats, then apply the vignetting and bad-amp masks.
pub fn finish_flat(flats: &[Exposure], config: &FlatConfig) -> Result<Exposure, IsrError> {
    config.validate()?;
    let mut combined = combine_flats(flats)?;
    finish_flat_exposure(&mut combined, config)?;
    Ok(combined)
}
