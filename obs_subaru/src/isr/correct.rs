//! Per-CCD correction driver.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use strum_macros::{Display, IntoStaticStr};

use super::amp_offset::apply_amp_offset;
use super::config::IsrConfig;
use super::crosstalk::{CrosstalkResult, apply_crosstalk_config};
use super::error::IsrError;
use crate::image::Exposure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum IsrStep {
    Crosstalk,
    AmpOffset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionReport {
    pub ccd: u32,
    /// Steps that ran, in order.
    pub steps: Vec<IsrStep>,
    pub crosstalk: Option<CrosstalkResult>,
    /// `None` when the amp-offset step was disabled or found nothing to measure.
    pub pedestals: Option<Vec<f64>>,
    pub timings: Vec<(IsrStep, Duration)>,
}

impl CorrectionReport {
    pub fn ran(&self, step: IsrStep) -> bool {
        self.steps.contains(&step)
    }

    pub fn total_time(&self) -> Duration {
        self.timings.iter().map(|(_, t)| *t).sum()
    }

    fn record(&mut self, step: IsrStep, elapsed: Duration) {
        tracing::debug!(%step, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "step done");
        self.steps.push(step);
        self.timings.push((step, elapsed));
    }
}

/// Run crosstalk then amp-offset correction on one exposure.
///
/// The configuration is validated before anything is touched. A failing
/// step stops the sequence.
pub fn correct(exposure: &mut Exposure, config: &IsrConfig) -> Result<CorrectionReport, IsrError> {
    config.validate()?;
    let ccd = exposure.detector().id;
    let _span = tracing::info_span!("correct", ccd).entered();

    let mut report = CorrectionReport {
        ccd,
        ..Default::default()
    };

    if let Some(crosstalk) = config.crosstalk.as_ref().filter(|c| c.is_nonzero()) {
        let start = Instant::now();
        let result = apply_crosstalk_config(exposure, crosstalk)?;
        report.record(IsrStep::Crosstalk, start.elapsed());
        report.crosstalk = Some(result);
    }

    if config.amp_offset.enabled {
        let start = Instant::now();
        let result = apply_amp_offset(exposure, &config.amp_offset)?;
        report.record(IsrStep::AmpOffset, start.elapsed());
        report.pedestals = result.map(|r| r.pedestals);
    }

    tracing::info!(
        steps = ?report.steps,
        elapsed_ms = report.total_time().as_secs_f64() * 1000.0,
        "correction finished"
    );
    Ok(report)
}

/// Correct independent exposures in parallel, one result per exposure.
pub fn correct_many(
    exposures: &mut [Exposure],
    config: &IsrConfig,
) -> Vec<Result<CorrectionReport, IsrError>> {
    exposures
        .par_iter_mut()
        .map(|exposure| correct(exposure, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isr::config::CrosstalkConfig;
    use crate::testing::{amp_levels_exposure, exposure_from_fn, small_detector};

    const AMP_W: usize = 80;
    const AMP_H: usize = 200;

    fn amp_offset_config() -> IsrConfig {
        let mut config = IsrConfig::default();
        config.amp_offset.enabled = true;
        config.amp_offset.amp_edge_window = 21;
        config
    }

    fn stepped_exposure() -> Exposure {
        amp_levels_exposure(small_detector(0, AMP_W, AMP_H), &[0.0, 1.5, 3.5, 5.0], 0.0, 1)
    }

    #[test]
    fn test_default_config_does_nothing() {
        let mut exposure = stepped_exposure();
        let before = exposure.masked_image.clone();
        let report = correct(&mut exposure, &IsrConfig::default()).unwrap();
        assert!(report.steps.is_empty());
        assert!(report.pedestals.is_none());
        assert_eq!(exposure.masked_image, before);
    }

    #[test]
    fn test_amp_offset_step_runs_when_enabled() {
        let mut exposure = stepped_exposure();
        let report = correct(&mut exposure, &amp_offset_config()).unwrap();
        assert_eq!(report.steps, vec![IsrStep::AmpOffset]);
        let pedestals = report.pedestals.clone().unwrap();
        for (p, e) in pedestals.iter().zip([-2.5, -1.0, 1.0, 2.5]) {
            assert!((p - e).abs() < 1e-6, "{pedestals:?}");
        }
        assert_eq!(report.timings.len(), 1);
        assert!(report.ran(IsrStep::AmpOffset));
        assert!(!report.ran(IsrStep::Crosstalk));
    }

    #[test]
    fn test_zero_crosstalk_matrix_is_skipped() {
        let mut config = IsrConfig::default();
        config.crosstalk = Some(CrosstalkConfig {
            coefficients1: vec![vec![0.0; 4]; 4],
            coefficients2: vec![vec![0.0; 4]; 4],
            ..CrosstalkConfig::hsc()
        });
        let mut exposure = amp_levels_exposure(small_detector(0, 16, 12), &[100.0; 4], 0.0, 1);
        let report = correct(&mut exposure, &config).unwrap();
        assert!(!report.ran(IsrStep::Crosstalk));
        assert!(report.crosstalk.is_none());
    }

    #[test]
    fn test_both_steps_run_in_order() {
        let mut config = amp_offset_config();
        config.crosstalk = Some(CrosstalkConfig::hsc());
        let mut exposure =
            amp_levels_exposure(small_detector(0, AMP_W, AMP_H), &[100.0; 4], 0.0, 1);
        let report = correct(&mut exposure, &config).unwrap();
        assert_eq!(report.steps, vec![IsrStep::Crosstalk, IsrStep::AmpOffset]);
        assert_eq!(report.timings[0].0, IsrStep::Crosstalk);
        assert!(report.crosstalk.unwrap().applied);
    }

    #[test]
    fn test_invalid_config_leaves_exposure_untouched() {
        let mut config = amp_offset_config();
        config.crosstalk = Some(CrosstalkConfig {
            coefficients1: vec![vec![0.0; 3]; 4],
            ..CrosstalkConfig::hsc()
        });
        let mut exposure = stepped_exposure();
        let before = exposure.masked_image.clone();
        let err = correct(&mut exposure, &config).unwrap_err();
        assert!(matches!(err, IsrError::MatrixShape { .. }));
        assert_eq!(exposure.masked_image, before);
        assert!(exposure.metadata.is_empty());
    }

    #[test]
    fn test_crosstalk_failure_stops_the_sequence() {
        let mut config = amp_offset_config();
        config.crosstalk = Some(CrosstalkConfig::hsc());
        let detector = small_detector(0, AMP_W, AMP_H);
        let mut exposure = exposure_from_fn(detector.clone(), |_, _| 1.0);
        let mut widened = (*detector).clone();
        widened.amplifiers[3].bbox.max.x += 4;
        exposure.set_detector(std::sync::Arc::new(widened));

        let err = correct(&mut exposure, &config).unwrap_err();
        assert!(matches!(err, IsrError::AmpOutsideImage { .. }));
        assert!(exposure.metadata.is_empty());
    }

    #[test]
    fn test_correct_many_matches_serial() {
        let config = amp_offset_config();
        let make = |ccd: u32| {
            let detector = small_detector(ccd, AMP_W, AMP_H);
            amp_levels_exposure(detector, &[0.0, 1.0, 2.0, 3.0], 0.5, u64::from(ccd))
        };
        let mut batch: Vec<Exposure> = (0..4).map(make).collect();
        let results = correct_many(&mut batch, &config);

        assert_eq!(results.len(), 4);
        for (ccd, (result, corrected)) in results.into_iter().zip(&batch).enumerate() {
            let mut serial = make(ccd as u32);
            let expected = correct(&mut serial, &config).unwrap();
            let report = result.unwrap();
            assert_eq!(report.ccd, ccd as u32);
            assert_eq!(report.pedestals, expected.pedestals);
            assert_eq!(corrected.masked_image, serial.masked_image);
        }
    }

    #[test]
    fn test_step_names() {
        assert_eq!(IsrStep::AmpOffset.to_string(), "amp_offset");
        let name: &'static str = IsrStep::Crosstalk.into();
        assert_eq!(name, "crosstalk");
    }
}
