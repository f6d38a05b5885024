//! Two-coefficient crosstalk correction for four-amplifier CCDs.
//!
//! Every amplifier is handled in its readout-aligned frame, where local
//! column 0 is the first column read. Amps read from the right are seen
//! through a flipped view. In that frame a victim pixel `(x, y)` of amp
//! `i` picks up
//!
//! ```text
//! G[j]/G[i] * (C1[i][j] * A_j(x, y) + C2[i][j] * A_j(x + 2, y))
//! ```
//!
//! from every other amp `j`, where `A_j(x + 2, y)` is zero past the amp
//! edge. All contamination is computed from the uncorrected image before
//! anything is subtracted.

#[cfg(test)]
mod tests;

use common::bit_buffer2::BitBuffer2;
use common::buffer2::Buffer2;
use rayon::prelude::*;

use super::config::{CrosstalkConfig, gain_table, square_matrix};
use super::error::IsrError;
use crate::camera::{AMPS_PER_CCD, Amplifier, Detector};
use crate::image::{Exposure, Image, ImageView, ImageViewMut, ScopedMaskPlane};

/// Scratch plane holding pixels bright enough to flag their victims. A
/// suffixed name is used when the mask already carries a plane by this name.
pub const TEMP_MASK_PLANE: &str = "TEMP";

/// Column offset of the secondary term in readout order.
pub const SECONDARY_OFFSET: usize = 2;

type Matrix = [[f64; AMPS_PER_CCD]; AMPS_PER_CCD];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrosstalkResult {
    /// False when the correction was skipped (zero coefficients or degenerate detector).
    pub applied: bool,
    /// Pixels carrying the crosstalk mask bit afterwards.
    pub flagged_pixels: usize,
}

fn readout_view<'a, T>(image: &'a Image<T>, amp: &Amplifier) -> ImageView<'a, T> {
    let view = image.view(amp.bbox);
    if amp.readout_corner.reads_right_to_left() {
        view.flipped_x()
    } else {
        view
    }
}

fn readout_view_mut<'a, T>(image: &'a mut Image<T>, amp: &Amplifier) -> ImageViewMut<'a, T> {
    let view = image.view_mut(amp.bbox);
    if amp.readout_corner.reads_right_to_left() {
        view.flipped_x()
    } else {
        view
    }
}

fn warn_on_suspicious_coefficients(c1: &Matrix, c2: &Matrix) {
    for i in 0..AMPS_PER_CCD {
        for j in 0..AMPS_PER_CCD {
            let (primary, secondary) = (c1[i][j], c2[i][j]);
            if secondary != 0.0 && (primary == 0.0 || secondary.abs() > primary.abs()) {
                tracing::warn!(
                    victim = i,
                    source = j,
                    primary,
                    secondary,
                    "secondary crosstalk coefficient exceeds primary; using table as given"
                );
            }
        }
    }
}

fn gains_for(detector: &Detector, table: &[[f64; AMPS_PER_CCD]]) -> [f64; AMPS_PER_CCD] {
    match table.get(detector.id as usize) {
        Some(row) => *row,
        None => {
            if table.is_empty() {
                tracing::debug!(ccd = detector.id, "no gain table, using unit gains");
            } else {
                tracing::warn!(
                    ccd = detector.id,
                    rows = table.len(),
                    "no gain row for detector, using unit gains"
                );
            }
            [1.0; AMPS_PER_CCD]
        }
    }
}

/// Remove crosstalk from `exposure` in place and flag affected pixels.
///
/// `coeffs1`/`coeffs2` are `[victim][source]` 4×4 tables and `gains` is
/// indexed by `[ccd_id][amp]`. Shape and finiteness are checked before
/// the image is touched.
pub fn apply_crosstalk(
    exposure: &mut Exposure,
    coeffs1: &[Vec<f64>],
    coeffs2: &[Vec<f64>],
    gains: &[Vec<f64>],
    min_pixel_to_mask: f64,
    mask_plane: &str,
) -> Result<CrosstalkResult, IsrError> {
    let c1 = square_matrix("coefficients1", coeffs1)?;
    let c2 = square_matrix("coefficients2", coeffs2)?;
    let gain_rows = gain_table(gains)?;
    if !min_pixel_to_mask.is_finite() {
        return Err(IsrError::InvalidConfig {
            field: "minPixelToMask",
            reason: format!("must be finite, got {min_pixel_to_mask}"),
        });
    }

    let detector = exposure.detector().clone();
    let _span = tracing::info_span!("crosstalk", ccd = detector.id).entered();

    if c1.iter().chain(c2.iter()).flatten().all(|&c| c == 0.0) {
        tracing::info!("no crosstalk info available");
        return Ok(CrosstalkResult::default());
    }
    if detector.num_amplifiers() != AMPS_PER_CCD {
        tracing::warn!(
            amps = detector.num_amplifiers(),
            "crosstalk needs exactly {} amplifiers, skipping",
            AMPS_PER_CCD
        );
        return Ok(CrosstalkResult::default());
    }
    check_amp_geometry(exposure, &detector)?;
    warn_on_suspicious_coefficients(&c1, &c2);

    let gains = gains_for(&detector, &gain_rows);
    let amps = &detector.amplifiers;
    let amp_width = amps[0].bbox.width();
    let amp_height = amps[0].bbox.height();

    let image = &mut exposure.masked_image.image;
    let mask = &mut exposure.masked_image.mask;

    let crosstalk_bit = mask.add_plane(mask_plane)?;
    let mut temp = ScopedMaskPlane::acquire_unique(mask, TEMP_MASK_PLANE)?;
    let temp_bit = temp.bitmask();

    let threshold = min_pixel_to_mask as f32;
    for (v, m) in image
        .buffer()
        .iter()
        .zip(temp.image_mut().buffer_mut().iter_mut())
    {
        if *v > threshold {
            *m |= temp_bit;
        }
    }

    // Bright sources in each amp's readout frame.
    let bright: Vec<BitBuffer2> = amps
        .iter()
        .map(|amp| {
            let view = readout_view(temp.image(), amp);
            BitBuffer2::from_fn(amp_width, amp_height, |x, y| {
                view.get(x, y) & temp_bit != 0
            })
        })
        .collect();

    let contamination: Vec<Buffer2<f64>> = {
        let sources: Vec<ImageView<'_, f32>> =
            amps.iter().map(|amp| readout_view(&*image, amp)).collect();
        (0..AMPS_PER_CCD)
            .map(|victim| {
                contamination_for(victim, &sources, &c1, &c2, &gains, amp_width, amp_height)
            })
            .collect()
    };

    for (amp, contam) in amps.iter().zip(contamination.iter()) {
        let mut view = readout_view_mut(image, amp);
        view.for_each_mut(|x, y, v| *v -= contam[(x, y)] as f32);
    }

    for (victim, amp) in amps.iter().enumerate() {
        let flagged = BitBuffer2::from_fn(amp_width, amp_height, |x, y| {
            (0..AMPS_PER_CCD).filter(|&j| j != victim).any(|j| {
                (c1[victim][j] != 0.0 && bright[j].get_xy(x, y))
                    || (c2[victim][j] != 0.0
                        && x + SECONDARY_OFFSET < amp_width
                        && bright[j].get_xy(x + SECONDARY_OFFSET, y))
            })
        });
        let mut view = readout_view_mut(temp.image_mut(), amp);
        view.for_each_mut(|x, y, m| {
            if flagged.get_xy(x, y) {
                *m |= crosstalk_bit;
            }
        });
    }

    // A bright source is not itself a crosstalk victim.
    temp.image_mut().buffer_mut().iter_mut().for_each(|m| {
        if *m & temp_bit != 0 {
            *m &= !crosstalk_bit;
        }
    });

    let flagged_pixels = temp.count_bits(crosstalk_bit);
    tracing::info!(
        flagged_pixels,
        bright_pixels = temp.count_bits(temp_bit),
        "crosstalk corrected"
    );
    drop(temp);

    Ok(CrosstalkResult {
        applied: true,
        flagged_pixels,
    })
}

/// Run [`apply_crosstalk`] with the fields of a [`CrosstalkConfig`].
pub fn apply_crosstalk_config(
    exposure: &mut Exposure,
    config: &CrosstalkConfig,
) -> Result<CrosstalkResult, IsrError> {
    apply_crosstalk(
        exposure,
        &config.coefficients1,
        &config.coefficients2,
        &config.gains_preamp_sigboard,
        config.min_pixel_to_mask,
        &config.crosstalk_mask_plane,
    )
}

fn check_amp_geometry(exposure: &Exposure, detector: &Detector) -> Result<(), IsrError> {
    let image_bbox = exposure.bbox();
    let first = &detector.amplifiers[0].bbox;
    for (i, amp) in detector.amplifiers.iter().enumerate() {
        if !image_bbox.contains_box(&amp.bbox) {
            return Err(IsrError::AmpOutsideImage {
                ccd: detector.id,
                amp: i,
                bbox: amp.bbox,
                image: image_bbox,
            });
        }
        if amp.bbox.width() != first.width() || amp.bbox.height() != first.height() {
            return Err(IsrError::AmpSizeMismatch {
                ccd: detector.id,
                amp: i,
                width: amp.bbox.width(),
                height: amp.bbox.height(),
            });
        }
    }
    Ok(())
}

fn contamination_for(
    victim: usize,
    sources: &[ImageView<'_, f32>],
    c1: &Matrix,
    c2: &Matrix,
    gains: &[f64; AMPS_PER_CCD],
    width: usize,
    height: usize,
) -> Buffer2<f64> {
    let mut out = Buffer2::new_default(width, height);
    let terms: Vec<(usize, f64, f64)> = (0..AMPS_PER_CCD)
        .filter(|&j| j != victim)
        .map(|j| {
            let ratio = gains[j] / gains[victim];
            (j, ratio * c1[victim][j], ratio * c2[victim][j])
        })
        .filter(|&(_, primary, secondary)| primary != 0.0 || secondary != 0.0)
        .collect();
    if terms.is_empty() {
        return out;
    }

    out.par_rows_mut().enumerate().for_each(|(y, row)| {
        for (x, acc) in row.iter_mut().enumerate() {
            for &(j, primary, secondary) in &terms {
                let source = &sources[j];
                *acc += primary * *source.get(x, y) as f64;
                if secondary != 0.0 && x + SECONDARY_OFFSET < width {
                    *acc += secondary * *source.get(x + SECONDARY_OFFSET, y) as f64;
                }
            }
        }
    });
    out
}
