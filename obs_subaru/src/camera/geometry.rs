use std::path::Path;
use std::sync::Arc;

use common::FileFormat;
use glam::{DAffine2, DVec2};
use serde::{Deserialize, Serialize};

use super::{
    CameraError, Detector, DetectorProvider, HSC_CCD_HEIGHT, HSC_CCD_WIDTH, PIXEL_SIZE_MM,
};

/// Gap between neighbouring CCDs in the synthetic grid layout, mm.
const GRID_GAP_MM: f64 = 1.0;

/// Whole-camera geometry: every detector with its focal-plane mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraGeometry {
    pub name: String,
    pub detectors: Vec<Detector>,
}

impl CameraGeometry {
    /// `columns × rows` HSC CCDs on a regular grid centred on the optical axis.
    ///
    /// Ids run row-major from the lower-left CCD. The real HSC focal plane is
    /// not rectangular; this layout is for tests and quick-look processing.
    pub fn hsc_grid(columns: usize, rows: usize) -> Self {
        let ccd_size = DVec2::new(HSC_CCD_WIDTH as f64, HSC_CCD_HEIGHT as f64) * PIXEL_SIZE_MM;
        let pitch = ccd_size + DVec2::splat(GRID_GAP_MM);
        let grid_origin = -pitch * DVec2::new(columns as f64, rows as f64) * 0.5
            + DVec2::splat(GRID_GAP_MM * 0.5);

        let detectors = (0..rows)
            .flat_map(|row| (0..columns).map(move |col| (col, row)))
            .enumerate()
            .map(|(id, (col, row))| {
                let lower_left = grid_origin + pitch * DVec2::new(col as f64, row as f64);
                let transform = DAffine2::from_scale_angle_translation(
                    DVec2::splat(PIXEL_SIZE_MM),
                    0.0,
                    lower_left,
                );
                Detector::hsc(id as u32, format!("{}_{}", col, row), transform)
            })
            .collect();

        Self {
            name: "HSC".to_string(),
            detectors,
        }
    }

    pub fn from_str(text: &str, format: FileFormat) -> Result<Self, CameraError> {
        let camera: Self = common::deserialize(text, format)?;
        camera.validate()?;
        Ok(camera)
    }

    /// Load from a `.yaml`/`.yml`/`.json` file.
    pub fn load(path: &Path) -> Result<Self, CameraError> {
        let format = FileFormat::from_file_name(&path.to_string_lossy())?;
        let text = std::fs::read_to_string(path).map_err(|source| CameraError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&text, format)
    }

    pub fn to_string(&self, format: FileFormat) -> Result<String, CameraError> {
        Ok(common::serialize(self, format)?)
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        for (i, detector) in self.detectors.iter().enumerate() {
            detector.validate()?;
            if self.detectors[..i].iter().any(|d| d.id == detector.id) {
                return Err(CameraError::DuplicateDetector(detector.id));
            }
        }
        Ok(())
    }

    pub fn detector(&self, ccd_id: u32) -> Option<&Detector> {
        self.detectors.iter().find(|d| d.id == ccd_id)
    }
}

impl DetectorProvider for CameraGeometry {
    fn get_detector(&self, ccd_id: u32) -> Result<Arc<Detector>, CameraError> {
        self.detector(ccd_id)
            .cloned()
            .map(Arc::new)
            .ok_or(CameraError::UnknownDetector(ccd_id))
    }
}
