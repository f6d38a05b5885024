//! Coarse tiled background used by the amp-offset engine.
//!
//! The image is cut into `bin_size × bin_size` bins (the last bin in each
//! direction may be partial). Each bin gets a sigma-clipped median of its
//! finite pixels, and the map is bilinearly interpolated between bin
//! centres, held constant beyond the outermost centres.


use common::buffer2::Buffer2;
use rayon::prelude::*;

use crate::math::statistics::sigma_clipped_median_f32;

const CLIP_SIGMA: f32 = 3.0;
const CLIP_ITERATIONS: usize = 3;

/// Per-bin background levels and the geometry needed to interpolate them.
#[derive(Debug, Clone)]
pub struct Background {
    bins: Buffer2<f32>,
    centers_x: Vec<f64>,
    centers_y: Vec<f64>,
    width: usize,
    height: usize,
}

/// Interpolation stencil along one axis: two bin indices and the weight of the second.
#[derive(Debug, Clone, Copy)]
struct Stencil {
    lo: usize,
    hi: usize,
    t: f64,
}

fn bin_ranges(len: usize, bin_size: usize) -> Vec<(usize, usize)> {
    (0..len.div_ceil(bin_size))
        .map(|i| (i * bin_size, ((i + 1) * bin_size).min(len)))
        .collect()
}

fn stencils(len: usize, centers: &[f64]) -> Vec<Stencil> {
    let last = centers.len() - 1;
    (0..len)
        .map(|p| {
            let p = p as f64;
            if p <= centers[0] {
                return Stencil { lo: 0, hi: 0, t: 0.0 };
            }
            if p >= centers[last] {
                return Stencil {
                    lo: last,
                    hi: last,
                    t: 0.0,
                };
            }
            let hi = centers.partition_point(|&c| c <= p);
            let lo = hi - 1;
            Stencil {
                lo,
                hi,
                t: (p - centers[lo]) / (centers[hi] - centers[lo]),
            }
        })
        .collect()
}

impl Background {
    /// Fit bins over `image`, ignoring non-finite pixels.
    ///
    /// Bins without finite pixels take the median of the valid bins.
    /// Returns `None` when no bin has a finite pixel.
    pub fn estimate(image: &Buffer2<f32>, bin_size: usize) -> Option<Self> {
        assert!(bin_size > 0, "bin size must be positive");
        let width = image.width();
        let height = image.height();
        if width == 0 || height == 0 {
            return None;
        }

        let ranges_x = bin_ranges(width, bin_size);
        let ranges_y = bin_ranges(height, bin_size);
        let bins_x = ranges_x.len();

        let levels: Vec<f32> = (0..ranges_x.len() * ranges_y.len())
            .into_par_iter()
            .map_init(
                || Vec::with_capacity(bin_size * bin_size),
                |values, idx| {
                    let (x_start, x_end) = ranges_x[idx % bins_x];
                    let (y_start, y_end) = ranges_y[idx / bins_x];
                    values.clear();
                    for y in y_start..y_end {
                        values.extend_from_slice(&image.row(y)[x_start..x_end]);
                    }
                    sigma_clipped_median_f32(values, CLIP_SIGMA, CLIP_ITERATIONS)
                },
            )
            .collect();

        let mut valid: Vec<f32> = levels.iter().copied().filter(|v| v.is_finite()).collect();
        if valid.is_empty() {
            return None;
        }
        let fill = crate::math::statistics::median_f32_mut(&mut valid);
        let levels = levels
            .into_iter()
            .map(|v| if v.is_finite() { v } else { fill })
            .collect();

        let center = |&(start, end): &(usize, usize)| (start + end - 1) as f64 * 0.5;
        Some(Self {
            bins: Buffer2::new(bins_x, ranges_y.len(), levels),
            centers_x: ranges_x.iter().map(center).collect(),
            centers_y: ranges_y.iter().map(center).collect(),
            width,
            height,
        })
    }

    #[inline]
    pub fn bins(&self) -> &Buffer2<f32> {
        &self.bins
    }

    /// Render the interpolated background at full resolution.
    pub fn to_buffer(&self) -> Buffer2<f32> {
        let sx = stencils(self.width, &self.centers_x);
        let sy = stencils(self.height, &self.centers_y);
        let mut out = Buffer2::new_default(self.width, self.height);

        out.par_rows_mut().enumerate().for_each(|(y, row)| {
            let Stencil { lo: j0, hi: j1, t: ty } = sy[y];
            let lower = self.bins.row(j0);
            let upper = self.bins.row(j1);
            for (v, s) in row.iter_mut().zip(sx.iter()) {
                let bottom = lower[s.lo] as f64 * (1.0 - s.t) + lower[s.hi] as f64 * s.t;
                let top = upper[s.lo] as f64 * (1.0 - s.t) + upper[s.hi] as f64 * s.t;
                *v = (bottom * (1.0 - ty) + top * ty) as f32;
            }
        });
        out
    }

    /// Subtract the interpolated background in place; NaN pixels stay NaN.
    pub fn subtract_from(&self, image: &mut Buffer2<f32>) {
        assert_eq!(image.width(), self.width, "width mismatch");
        assert_eq!(image.height(), self.height, "height mismatch");
        let model = self.to_buffer();
        image.zip_apply(&model, |v, bg| *v -= *bg);
    }
}
