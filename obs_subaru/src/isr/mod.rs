//! Instrument signature removal steps for single HSC/Suprime-Cam CCDs.

pub mod amp_offset;
pub mod config;
pub mod correct;
pub mod crosstalk;
mod error;
pub mod flat;

pub use amp_offset::{
    AmpOffsetResult, BoundaryEstimate, apply_amp_offset, apply_amp_offset_with,
    apply_amp_offset_with_detector, pedestal_key, solve_pedestals,
};
pub use config::{
    AmpOffsetConfig, BackgroundConfig, BadAmp, CrosstalkConfig, FlatConfig, IsrConfig,
    VignetteConfig,
};
pub use correct::{CorrectionReport, IsrStep, correct, correct_many};
pub use crosstalk::{CrosstalkResult, apply_crosstalk, apply_crosstalk_config};
pub use error::IsrError;
pub use flat::{
    FlatMaskResult, VignetteCoverage, combine_flats, finish_flat, finish_flat_exposure,
    mask_vignetted_and_bad_amps,
};
