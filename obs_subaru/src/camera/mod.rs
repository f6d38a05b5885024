//! Read-only description of CCDs and their amplifiers.

mod geometry;


use std::path::PathBuf;
use std::sync::Arc;

use glam::{DAffine2, DVec2, IVec2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geom::Box2I;

pub use geometry::CameraGeometry;

/// HSC assembled CCD width in pixels.
pub const HSC_CCD_WIDTH: usize = 2048;
/// HSC assembled CCD height in pixels.
pub const HSC_CCD_HEIGHT: usize = 4176;
/// Number of readout channels per CCD.
pub const AMPS_PER_CCD: usize = 4;
/// Physical pixel pitch in millimetres (15 µm).
pub const PIXEL_SIZE_MM: f64 = 0.015;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Detector {detector}: amplifier {amp} bbox {bbox} lies outside detector bbox {detector_bbox}")]
    AmpOutsideDetector {
        detector: u32,
        amp: usize,
        bbox: Box2I,
        detector_bbox: Box2I,
    },

    #[error("Detector {detector}: amplifiers {first} and {second} overlap")]
    OverlappingAmplifiers {
        detector: u32,
        first: usize,
        second: usize,
    },

    #[error("Detector {detector}: amplifiers cover {covered} of {expected} pixels")]
    IncompleteCoverage {
        detector: u32,
        covered: usize,
        expected: usize,
    },

    #[error("Detector {0} has no amplifiers")]
    NoAmplifiers(u32),

    #[error("Duplicate detector id {0}")]
    DuplicateDetector(u32),

    #[error("Unknown detector id {0}")]
    UnknownDetector(u32),

    #[error("Failed to read camera geometry '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    FileFormat(#[from] common::FileExtensionError),

    #[error("Failed to parse camera geometry: {0}")]
    Parse(#[from] common::SerdeFormatError),
}

/// Corner of the amplifier nearest its output node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadoutCorner {
    LowerLeft,
    LowerRight,
    UpperRight,
    UpperLeft,
}

impl ReadoutCorner {
    /// True when columns are read out right to left.
    #[inline]
    pub fn reads_right_to_left(self) -> bool {
        matches!(self, ReadoutCorner::LowerRight | ReadoutCorner::UpperRight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amplifier {
    pub name: String,
    /// Data region in assembled, trimmed coordinates.
    pub bbox: Box2I,
    pub readout_corner: ReadoutCorner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detector {
    pub id: u32,
    pub name: String,
    pub bbox: Box2I,
    pub amplifiers: Vec<Amplifier>,
    /// Pixel (parent coordinates) to focal-plane millimetres.
    pub pixels_to_focal_plane: DAffine2,
}

impl Detector {
    /// Standard HSC layout: four 512×4176 amps, odd amps read from the right.
    pub fn hsc(id: u32, name: impl Into<String>, pixels_to_focal_plane: DAffine2) -> Self {
        Self::four_amp(
            id,
            name,
            HSC_CCD_WIDTH / AMPS_PER_CCD,
            HSC_CCD_HEIGHT,
            pixels_to_focal_plane,
        )
    }

    /// Four side-by-side `amp_width × height` amps with the HSC readout pattern.
    pub fn four_amp(
        id: u32,
        name: impl Into<String>,
        amp_width: usize,
        height: usize,
        pixels_to_focal_plane: DAffine2,
    ) -> Self {
        let amplifiers = (0..AMPS_PER_CCD)
            .map(|i| Amplifier {
                name: format!("A{}", i + 1),
                bbox: Box2I::from_corner_size((i * amp_width) as i32, 0, amp_width, height),
                readout_corner: if i % 2 == 0 {
                    ReadoutCorner::LowerLeft
                } else {
                    ReadoutCorner::LowerRight
                },
            })
            .collect();
        Self {
            id,
            name: name.into(),
            bbox: Box2I::from_corner_size(0, 0, amp_width * AMPS_PER_CCD, height),
            amplifiers,
            pixels_to_focal_plane,
        }
    }

    /// Amplifier bboxes must lie inside the detector, be pairwise disjoint and tile it.
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.amplifiers.is_empty() {
            return Err(CameraError::NoAmplifiers(self.id));
        }
        for (i, amp) in self.amplifiers.iter().enumerate() {
            if !self.bbox.contains_box(&amp.bbox) {
                return Err(CameraError::AmpOutsideDetector {
                    detector: self.id,
                    amp: i,
                    bbox: amp.bbox,
                    detector_bbox: self.bbox,
                });
            }
            for (j, other) in self.amplifiers.iter().enumerate().skip(i + 1) {
                if amp.bbox.overlaps(&other.bbox) {
                    return Err(CameraError::OverlappingAmplifiers {
                        detector: self.id,
                        first: i,
                        second: j,
                    });
                }
            }
        }
        let covered: usize = self.amplifiers.iter().map(|a| a.bbox.area()).sum();
        if covered != self.bbox.area() {
            return Err(CameraError::IncompleteCoverage {
                detector: self.id,
                covered,
                expected: self.bbox.area(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn num_amplifiers(&self) -> usize {
        self.amplifiers.len()
    }

    /// Columns where amplifier `i` ends and `i + 1` begins.
    pub fn amp_edges(&self) -> Vec<i32> {
        self.amplifiers
            .windows(2)
            .map(|pair| pair[1].bbox.x0())
            .collect()
    }

    #[inline]
    pub fn focal_plane_position(&self, x: f64, y: f64) -> DVec2 {
        self.pixels_to_focal_plane.transform_point2(DVec2::new(x, y))
    }

    /// Focal-plane positions of the four corner pixels.
    pub fn focal_plane_corners(&self) -> [DVec2; 4] {
        self.bbox
            .corners()
            .map(|c: IVec2| self.focal_plane_position(c.x as f64, c.y as f64))
    }
}

/// Source of detector descriptions by CCD id.
pub trait DetectorProvider {
    fn get_detector(&self, ccd_id: u32) -> Result<Arc<Detector>, CameraError>;
}
