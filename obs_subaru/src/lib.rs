//! Electronic-artifact correction for Hyper Suprime-Cam and Suprime-Cam CCDs.
//!
//! Three corrections run on one assembled CCD exposure at a time:
//! - inter-amplifier crosstalk removal with masking of affected pixels
//! - amp-boundary pedestal (amp offset) equalisation
//! - vignetting and bad-amplifier masking of flats
//!
//! ```rust,ignore
//! use obs_subaru::{IsrConfig, correct};
//!
//! let config = IsrConfig::load(Path::new("isr.yaml"))?;
//! let report = correct(&mut exposure, &config)?;
//! println!("steps: {:?}, pedestals: {:?}", report.steps, report.pedestals);
//! ```

pub mod background;
pub mod camera;
pub mod detection;
pub mod geom;
pub mod image;
pub mod isr;
pub mod math;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Image model
// ============================================================================

pub use geom::Box2I;
pub use image::{
    Exposure, Image, Mask, MaskError, MaskPlane, MaskPlaneDict, MaskedImage, MetadataValue,
    PropertyList,
};

// ============================================================================
// Camera
// ============================================================================

pub use camera::{
    Amplifier, CameraError, CameraGeometry, Detector, DetectorProvider, ReadoutCorner,
};

// ============================================================================
// Corrections
// ============================================================================

pub use detection::{SourceDetector, ThresholdDetector};
pub use isr::{
    AmpOffsetConfig, BadAmp, CorrectionReport, CrosstalkConfig, FlatConfig, IsrConfig, IsrError,
    VignetteConfig, apply_amp_offset, apply_amp_offset_with_detector, apply_crosstalk, correct,
    correct_many, finish_flat_exposure, mask_vignetted_and_bad_amps,
};
