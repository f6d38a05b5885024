//! Synthetic exposures for unit tests.

use std::sync::Arc;

use common::buffer2::Buffer2;
use glam::{DAffine2, DVec2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::camera::{Detector, PIXEL_SIZE_MM};
use crate::image::{Exposure, Image, MaskedImage};

/// Pixel to focal-plane map with 15 µm pixels and the CCD's lower-left corner at `origin_mm`.
pub(crate) fn focal_plane_transform(origin_mm: DVec2) -> DAffine2 {
    DAffine2::from_scale_angle_translation(DVec2::splat(PIXEL_SIZE_MM), 0.0, origin_mm)
}

pub(crate) fn small_detector(id: u32, amp_width: usize, height: usize) -> Arc<Detector> {
    Arc::new(Detector::four_amp(
        id,
        format!("ccd{id}"),
        amp_width,
        height,
        focal_plane_transform(DVec2::ZERO),
    ))
}

/// Exposure covering the detector bbox with pixels from `f(x, y)` (parent coordinates).
pub(crate) fn exposure_from_fn(
    detector: Arc<Detector>,
    f: impl FnMut(usize, usize) -> f32,
) -> Exposure {
    let bbox = detector.bbox;
    let data = Buffer2::from_fn(bbox.width(), bbox.height(), f);
    let image = Image::from_buffer(bbox.min, data);
    Exposure::new(MaskedImage::from_image(image), detector)
}

pub(crate) fn uniform_exposure(detector: Arc<Detector>, value: f32) -> Exposure {
    exposure_from_fn(detector, |_, _| value)
}

/// Per-amp constant levels plus seeded Gaussian noise.
pub(crate) fn amp_levels_exposure(
    detector: Arc<Detector>,
    levels: &[f32],
    noise_sigma: f32,
    seed: u64,
) -> Exposure {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, noise_sigma.max(f32::MIN_POSITIVE)).unwrap();
    let amps = detector.amplifiers.clone();
    exposure_from_fn(detector, |x, y| {
        let level = amps
            .iter()
            .position(|a| a.bbox.contains(x as i32, y as i32))
            .map_or(0.0, |i| levels[i]);
        if noise_sigma > 0.0 {
            level + normal.sample(&mut rng)
        } else {
            level
        }
    })
}
