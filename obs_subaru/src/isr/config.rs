//! Serde-loadable configuration for the correction engines.
//!
//! Every struct uses camelCase field names and falls back to its `Default`
//! for missing fields, so a YAML file only lists what it overrides.

use std::path::Path;

use common::FileFormat;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::error::IsrError;
use crate::camera::AMPS_PER_CCD;
use crate::image::MaskPlane;

/// Rows in the Suprime-Cam preamp/SIG-board gain table.
pub const GAIN_TABLE_ROWS: usize = 10;

/// Top-level configuration for [`correct`](super::correct).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IsrConfig {
    pub crosstalk: Option<CrosstalkConfig>,
    pub amp_offset: AmpOffsetConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrosstalkConfig {
    /// Primary coefficients, `[victim][source]`.
    pub coefficients1: Vec<Vec<f64>>,
    /// Secondary (two columns later in readout order) coefficients.
    pub coefficients2: Vec<Vec<f64>>,
    /// Effective gain per `[ccd_id][amp]`.
    pub gains_preamp_sigboard: Vec<Vec<f64>>,
    /// Source pixels above this level flag their victims.
    pub min_pixel_to_mask: f64,
    pub crosstalk_mask_plane: String,
}

impl Default for CrosstalkConfig {
    fn default() -> Self {
        Self {
            coefficients1: vec![vec![0.0; AMPS_PER_CCD]; AMPS_PER_CCD],
            coefficients2: vec![vec![0.0; AMPS_PER_CCD]; AMPS_PER_CCD],
            gains_preamp_sigboard: vec![vec![1.0; AMPS_PER_CCD]; GAIN_TABLE_ROWS],
            min_pixel_to_mask: 45000.0,
            crosstalk_mask_plane: "CROSSTALK".to_string(),
        }
    }
}

impl CrosstalkConfig {
    /// HSC primary coefficients; no secondary term, unit gains.
    pub fn hsc() -> Self {
        Self {
            coefficients1: vec![
                vec![0.0, -125e-6, -149e-6, -156e-6],
                vec![-124e-6, 0.0, -132e-6, -157e-6],
                vec![-171e-6, -134e-6, 0.0, -153e-6],
                vec![-157e-6, -151e-6, -137e-6, 0.0],
            ],
            ..Self::default()
        }
    }

    /// True when any coefficient is nonzero.
    pub fn is_nonzero(&self) -> bool {
        self.coefficients1
            .iter()
            .chain(self.coefficients2.iter())
            .flatten()
            .any(|&c| c != 0.0)
    }

    pub fn validate(&self) -> Result<(), IsrError> {
        square_matrix("coefficients1", &self.coefficients1)?;
        square_matrix("coefficients2", &self.coefficients2)?;
        gain_table(&self.gains_preamp_sigboard)?;
        if !self.min_pixel_to_mask.is_finite() {
            return Err(IsrError::InvalidConfig {
                field: "minPixelToMask",
                reason: format!("must be finite, got {}", self.min_pixel_to_mask),
            });
        }
        non_empty_name("crosstalkMaskPlane", &self.crosstalk_mask_plane)
    }
}

/// Coarse background fitted before measuring amp edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackgroundConfig {
    pub bin_size: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { bin_size: 512 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AmpOffsetConfig {
    pub enabled: bool,
    /// Columns sampled on each side of an amp boundary.
    pub amp_edge_width: usize,
    /// Columns skipped next to the boundary.
    pub amp_edge_inset: usize,
    /// Rows in the rolling mean (odd).
    pub amp_edge_window: usize,
    /// Minimum fraction of usable rows for a boundary to count.
    pub amp_edge_min_frac: f64,
    /// Largest accepted boundary jump, ADU.
    pub amp_edge_max_offset: f64,
    pub do_background: bool,
    pub do_detection: bool,
    pub ignored_pixel_mask: Vec<String>,
    pub background: BackgroundConfig,
}

impl Default for AmpOffsetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            amp_edge_width: 64,
            amp_edge_inset: 5,
            amp_edge_window: 2139,
            amp_edge_min_frac: 0.5,
            amp_edge_max_offset: 5.0,
            do_background: false,
            do_detection: false,
            ignored_pixel_mask: MaskPlane::iter().map(|p| p.to_string()).collect(),
            background: BackgroundConfig::default(),
        }
    }
}

impl AmpOffsetConfig {
    pub fn validate(&self) -> Result<(), IsrError> {
        if self.amp_edge_width == 0 {
            return Err(IsrError::InvalidConfig {
                field: "ampEdgeWidth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.amp_edge_window == 0 || self.amp_edge_window % 2 == 0 {
            return Err(IsrError::InvalidConfig {
                field: "ampEdgeWindow",
                reason: format!("must be a positive odd number, got {}", self.amp_edge_window),
            });
        }
        if !(0.0..=1.0).contains(&self.amp_edge_min_frac) {
            return Err(IsrError::InvalidConfig {
                field: "ampEdgeMinFrac",
                reason: format!("must lie in [0, 1], got {}", self.amp_edge_min_frac),
            });
        }
        if !self.amp_edge_max_offset.is_finite() || self.amp_edge_max_offset < 0.0 {
            return Err(IsrError::InvalidConfig {
                field: "ampEdgeMaxOffset",
                reason: format!(
                    "must be finite and non-negative, got {}",
                    self.amp_edge_max_offset
                ),
            });
        }
        if self.background.bin_size == 0 {
            return Err(IsrError::InvalidConfig {
                field: "background.binSize",
                reason: "must be at least 1".to_string(),
            });
        }
        for name in &self.ignored_pixel_mask {
            non_empty_name("ignoredPixelMask", name)?;
        }
        Ok(())
    }
}

/// Circular illuminated region of the focal plane, millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VignetteConfig {
    pub x_center: f64,
    pub y_center: f64,
    pub radius: f64,
}

impl Default for VignetteConfig {
    fn default() -> Self {
        Self {
            x_center: 0.0,
            y_center: 0.0,
            radius: 270.0,
        }
    }
}

impl VignetteConfig {
    pub fn validate(&self) -> Result<(), IsrError> {
        if !self.x_center.is_finite() || !self.y_center.is_finite() {
            return Err(IsrError::InvalidConfig {
                field: "vignette centre",
                reason: format!("must be finite, got ({}, {})", self.x_center, self.y_center),
            });
        }
        if self.radius.is_nan() || self.radius < 0.0 {
            return Err(IsrError::InvalidConfig {
                field: "vignette.radius",
                reason: format!("must be non-negative, got {}", self.radius),
            });
        }
        Ok(())
    }
}

/// One known-bad amplifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadAmp {
    pub ccd: u32,
    pub amp: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlatConfig {
    pub vignette: VignetteConfig,
    pub bad_amps: Vec<BadAmp>,
    pub mask_plane: String,
    /// Treat a bad-amp entry naming a missing amplifier as an error.
    pub strict: bool,
}

impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            vignette: VignetteConfig::default(),
            bad_amps: Vec::new(),
            mask_plane: MaskPlane::NoData.to_string(),
            strict: false,
        }
    }
}

impl FlatConfig {
    pub fn validate(&self) -> Result<(), IsrError> {
        self.vignette.validate()?;
        non_empty_name("maskPlane", &self.mask_plane)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, IsrError> {
        from_text(text, FileFormat::Yaml)
    }

    pub fn load(path: &Path) -> Result<Self, IsrError> {
        load_file(path)
    }
}

impl IsrConfig {
    pub fn validate(&self) -> Result<(), IsrError> {
        if let Some(crosstalk) = &self.crosstalk {
            crosstalk.validate()?;
        }
        self.amp_offset.validate()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, IsrError> {
        from_text(text, FileFormat::Yaml)
    }

    /// Load a `.yaml`/`.yml`/`.json` file.
    pub fn load(path: &Path) -> Result<Self, IsrError> {
        load_file(path)
    }

    pub fn to_yaml(&self) -> Result<String, IsrError> {
        Ok(common::serialize(self, FileFormat::Yaml)?)
    }
}

fn from_text<T: DeserializeOwned>(text: &str, format: FileFormat) -> Result<T, IsrError> {
    Ok(common::deserialize(text, format)?)
}

fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, IsrError> {
    let format = FileFormat::from_file_name(&path.to_string_lossy())?;
    let text = std::fs::read_to_string(path).map_err(|source| IsrError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    from_text(&text, format)
}

fn non_empty_name(field: &'static str, name: &str) -> Result<(), IsrError> {
    if name.trim().is_empty() {
        return Err(IsrError::InvalidConfig {
            field,
            reason: "mask plane name must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Checked 4×4 coefficient matrix.
pub(crate) fn square_matrix(
    name: &'static str,
    rows: &[Vec<f64>],
) -> Result<[[f64; AMPS_PER_CCD]; AMPS_PER_CCD], IsrError> {
    if rows.len() != AMPS_PER_CCD || rows.iter().any(|r| r.len() != AMPS_PER_CCD) {
        return Err(IsrError::MatrixShape {
            name,
            expected_rows: AMPS_PER_CCD,
            expected_cols: AMPS_PER_CCD,
            rows: rows.len(),
            row_lengths: rows.iter().map(Vec::len).collect(),
        });
    }
    let mut out = [[0.0; AMPS_PER_CCD]; AMPS_PER_CCD];
    for (i, row) in rows.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            if !value.is_finite() {
                return Err(IsrError::NonFiniteCoefficient {
                    name,
                    row: i,
                    col: j,
                    value,
                });
            }
            // Self-crosstalk is meaningless; the diagonal is ignored.
            out[i][j] = if i == j { 0.0 } else { value };
        }
    }
    Ok(out)
}

/// Checked gain table: any number of rows (indexed by CCD id), 4 positive finite gains each.
pub(crate) fn gain_table(rows: &[Vec<f64>]) -> Result<Vec<[f64; AMPS_PER_CCD]>, IsrError> {
    if rows.len() > GAIN_TABLE_ROWS || rows.iter().any(|r| r.len() != AMPS_PER_CCD) {
        return Err(IsrError::MatrixShape {
            name: "gainsPreampSigboard",
            expected_rows: GAIN_TABLE_ROWS,
            expected_cols: AMPS_PER_CCD,
            rows: rows.len(),
            row_lengths: rows.iter().map(Vec::len).collect(),
        });
    }
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let mut gains = [0.0; AMPS_PER_CCD];
            for (j, &value) in row.iter().enumerate() {
                if !value.is_finite() || value <= 0.0 {
                    return Err(IsrError::NonFiniteCoefficient {
                        name: "gainsPreampSigboard",
                        row: i,
                        col: j,
                        value,
                    });
                }
                gains[j] = value;
            }
            Ok(gains)
        })
        .collect()
}
