//! Source detection used to keep astrophysical flux out of amp-edge statistics.


use common::bit_buffer2::BitBuffer2;
use common::buffer2::Buffer2;
use rayon::prelude::*;

use crate::math::statistics::median_and_sigma_f32_mut;

/// Finds pixels belonging to sources, positive or negative.
///
/// Implementations must be side-effect free and return the same mask for
/// the same input. Non-finite pixels are never reported.
pub trait SourceDetector: Send + Sync {
    fn detect(&self, image: &Buffer2<f32>, smoothing_sigma: f64) -> BitBuffer2;
}

/// Gaussian-smoothed threshold detector.
///
/// Pixels whose smoothed value differs from the smoothed-image median by
/// more than `threshold` robust sigmas are flagged, then grown by `grow`
/// pixels in every direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdDetector {
    pub threshold: f32,
    pub grow: usize,
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            grow: 2,
        }
    }
}

impl SourceDetector for ThresholdDetector {
    fn detect(&self, image: &Buffer2<f32>, smoothing_sigma: f64) -> BitBuffer2 {
        let width = image.width();
        let height = image.height();
        let smoothed = gaussian_smooth(image, smoothing_sigma);

        let mut finite: Vec<f32> = smoothed.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return BitBuffer2::new_default(width, height);
        }
        let (median, sigma) = median_and_sigma_f32_mut(&mut finite);
        let limit = self.threshold * sigma.max(f32::EPSILON);

        let detected = BitBuffer2::from_fn(width, height, |x, y| {
            image[(x, y)].is_finite() && (smoothed[(x, y)] - median).abs() > limit
        });
        let mut grown = dilate(&detected, self.grow);
        // Growth must not claim pixels that carry no data.
        clear_non_finite(&mut grown, image);
        grown
    }
}

fn clear_non_finite(mask: &mut BitBuffer2, image: &Buffer2<f32>) {
    for y in 0..image.height() {
        for (x, v) in image.row(y).iter().enumerate() {
            if !v.is_finite() {
                mask.set_xy(x, y, false);
            }
        }
    }
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma).ceil() as i64;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    kernel.into_iter().map(|w| w / norm).collect()
}

/// Separable Gaussian smoothing that renormalises over finite neighbours.
///
/// A pixel with no finite neighbour inside the kernel becomes NaN.
pub fn gaussian_smooth(image: &Buffer2<f32>, sigma: f64) -> Buffer2<f32> {
    if sigma <= 0.0 {
        return image.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let width = image.width();
    let height = image.height();

    let mut horizontal = Buffer2::new_default(width, height);
    horizontal
        .par_rows_mut()
        .enumerate()
        .for_each(|(y, out)| {
            let row = image.row(y);
            for (x, v) in out.iter_mut().enumerate() {
                let (mut sum, mut weight) = (0.0f64, 0.0f64);
                for (k, w) in kernel.iter().enumerate() {
                    let sx = x as isize + k as isize - radius;
                    if sx < 0 || sx >= width as isize {
                        continue;
                    }
                    let s = row[sx as usize];
                    if s.is_finite() {
                        sum += w * s as f64;
                        weight += w;
                    }
                }
                *v = if weight > 0.0 { (sum / weight) as f32 } else { f32::NAN };
            }
        });

    let mut out = Buffer2::new_default(width, height);
    out.par_rows_mut().enumerate().for_each(|(y, out_row)| {
        for (x, v) in out_row.iter_mut().enumerate() {
            let (mut sum, mut weight) = (0.0f64, 0.0f64);
            for (k, w) in kernel.iter().enumerate() {
                let sy = y as isize + k as isize - radius;
                if sy < 0 || sy >= height as isize {
                    continue;
                }
                let s = horizontal[(x, sy as usize)];
                if s.is_finite() {
                    sum += w * s as f64;
                    weight += w;
                }
            }
            *v = if weight > 0.0 { (sum / weight) as f32 } else { f32::NAN };
        }
    });
    out
}

/// Square dilation by `radius`, done as a horizontal then a vertical pass.
pub fn dilate(mask: &BitBuffer2, radius: usize) -> BitBuffer2 {
    if radius == 0 {
        return mask.clone();
    }
    let width = mask.width();
    let height = mask.height();

    let mut horizontal = BitBuffer2::new_default(width, height);
    for (x, y) in mask.iter_set() {
        let lo = x.saturating_sub(radius);
        let hi = (x + radius).min(width - 1);
        for sx in lo..=hi {
            horizontal.set_xy(sx, y, true);
        }
    }

    let mut out = BitBuffer2::new_default(width, height);
    for (x, y) in horizontal.iter_set() {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(height - 1);
        for sy in lo..=hi {
            out.set_xy(x, sy, true);
        }
    }
    out
}
