//! Error type for the correction engines and their configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::camera::CameraError;
use crate::geom::Box2I;
use crate::image::MaskError;

#[derive(Debug, Error)]
pub enum IsrError {
    #[error("{name} must be a {expected_rows}x{expected_cols} matrix, got {rows} rows with lengths {row_lengths:?}")]
    MatrixShape {
        name: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        row_lengths: Vec<usize>,
    },

    #[error("{name}[{row}][{col}] must be finite, got {value}")]
    NonFiniteCoefficient {
        name: &'static str,
        row: usize,
        col: usize,
        value: f64,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Unknown mask plane '{0}'")]
    UnknownMaskPlane(String),

    #[error("Detector {ccd} has no amplifier {amp} (it has {count})")]
    UnknownAmplifier { ccd: u32, amp: usize, count: usize },

    #[error("Detector {ccd}: amplifier {amp} bbox {bbox} lies outside image {image}")]
    AmpOutsideImage {
        ccd: u32,
        amp: usize,
        bbox: Box2I,
        image: Box2I,
    },

    #[error("Detector {ccd}: amplifiers must share one size, amp {amp} is {width}x{height}")]
    AmpSizeMismatch {
        ccd: u32,
        amp: usize,
        width: usize,
        height: usize,
    },

    #[error("Flat combination needs at least one exposure")]
    NoFlats,

    #[error("Flat {index} has bbox {actual}, expected {expected}")]
    FlatGeometryMismatch {
        index: usize,
        expected: Box2I,
        actual: Box2I,
    },

    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    FileFormat(#[from] common::FileExtensionError),

    #[error("Failed to parse config: {0}")]
    ParseConfig(#[from] common::SerdeFormatError),

    #[error(transparent)]
    Mask(#[from] MaskError),

    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl IsrError {
    /// Lift a plane lookup failure into the configuration-level variant.
    pub(crate) fn from_plane_lookup(err: MaskError) -> Self {
        match err {
            MaskError::UnknownPlane(name) => IsrError::UnknownMaskPlane(name),
            other => IsrError::Mask(other),
        }
    }
}
