//! Proportional dosing: how many pump steps to run for a given pH shortfall.
//!
//! steps = clamp(round(gain * error), min_dose_steps, floor(max_time / step_period))
//!
//! The ceiling is derived from the same `STEP_PERIOD` the pump drivers pulse
//! at, so a computed dose always fits inside the driver's own cutoff.

use reactor_traits::STEP_PERIOD;

use crate::error::ReactorError;
use crate::util::round_to;

/// Proportional dosing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DosingAlgorithm {
    /// Steps per 1.0 pH unit of error.
    pub gain_steps_per_ph: f64,
    /// Floor for any non-zero dose; overcomes tubing back-pressure.
    pub min_dose_steps: u32,
    /// Calibrated pump constant: steps per millilitre delivered.
    pub steps_per_ml: f64,
    /// Seconds per step; must equal the driver's pulse period.
    pub seconds_per_step: f64,
}

impl Default for DosingAlgorithm {
    fn default() -> Self {
        Self {
            gain_steps_per_ph: 50.0,
            min_dose_steps: 10,
            steps_per_ml: 100.0,
            seconds_per_step: STEP_PERIOD.as_secs_f64(),
        }
    }
}

impl DosingAlgorithm {
    /// Largest dose that fits in `max_time_sec`.
    pub fn max_steps(&self, max_time_sec: f64) -> u32 {
        if !(max_time_sec.is_finite() && max_time_sec > 0.0 && self.seconds_per_step > 0.0) {
            return 0;
        }
        // tolerate float noise such as 30 / 0.002 = 14999.999...
        let raw = (max_time_sec / self.seconds_per_step + 1e-9).floor();
        if raw >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            raw as u32
        }
    }

    /// Steps for a pH shortfall of `ph_error` (threshold minus reading).
    ///
    /// Zero when the error is not positive. When the time budget cannot fit even
    /// `min_dose_steps`, the budget wins and the result is the time ceiling.
    pub fn calculate_steps(&self, ph_error: f64, max_time_sec: f64) -> u32 {
        if !(ph_error.is_finite() && ph_error > 0.0) {
            return 0;
        }
        let max_steps = self.max_steps(max_time_sec);
        let raw = self.gain_steps_per_ph * ph_error;
        let rounded = if raw.is_finite() {
            raw.round().clamp(0.0, f64::from(u32::MAX)) as u32
        } else {
            u32::MAX
        };
        let steps = rounded.max(self.min_dose_steps).min(max_steps);
        tracing::debug!(
            error = ph_error,
            raw,
            steps,
            min = self.min_dose_steps,
            max = max_steps,
            "calculate_steps"
        );
        steps
    }

    /// Estimated delivered volume for `steps`, rounded to 0.001 ml.
    pub fn calculate_volume_ml(&self, steps: u32) -> Result<f64, ReactorError> {
        if !(self.steps_per_ml.is_finite() && self.steps_per_ml > 0.0) {
            return Err(ReactorError::Config(format!(
                "steps_per_ml must be a positive number, got {}",
                self.steps_per_ml
            )));
        }
        Ok(round_to(f64::from(steps) / self.steps_per_ml, 3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.3, 30.0, 15)]
    #[case(0.05, 30.0, 10)] // floor
    #[case(1.0, 30.0, 50)]
    #[case(1000.0, 30.0, 15_000)] // ceiling
    #[case(0.3, 0.01, 5)] // budget below floor
    #[case(0.0, 30.0, 0)]
    #[case(-0.4, 30.0, 0)]
    #[case(f64::NAN, 30.0, 0)]
    fn step_table(#[case] err: f64, #[case] max_t: f64, #[case] expected: u32) {
        assert_eq!(
            DosingAlgorithm::default().calculate_steps(err, max_t),
            expected
        );
    }

    #[test]
    fn max_steps_matches_step_period() {
        let algo = DosingAlgorithm::default();
        assert_eq!(algo.max_steps(30.0), 15_000);
        assert_eq!(algo.max_steps(0.0), 0);
        assert_eq!(algo.max_steps(-3.0), 0);
    }

    #[test]
    fn volume_uses_pump_constant() {
        let algo = DosingAlgorithm::default();
        assert_eq!(algo.calculate_volume_ml(15).unwrap(), 0.15);
        assert_eq!(algo.calculate_volume_ml(1234).unwrap(), 12.34);
    }

    #[test]
    fn volume_rejects_non_positive_constant() {
        let algo = DosingAlgorithm {
            steps_per_ml: 0.0,
            ..DosingAlgorithm::default()
        };
        assert!(matches!(
            algo.calculate_volume_ml(10),
            Err(ReactorError::Config(_))
        ));
    }
}
