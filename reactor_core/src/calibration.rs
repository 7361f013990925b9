//! Per-compartment probe calibration.

use chrono::{DateTime, TimeDelta, Utc};
use reactor_traits::CompartmentId;
use reactor_traits::nernst::{IDEAL_INTERCEPT_V, IDEAL_SLOPE_V_PER_PH};
use std::collections::BTreeMap;

use crate::error::ReactorError;

/// Calibrations older than this many hours should be redone before trusting dosing.
pub const STALE_AFTER_HOURS: i64 = 48;

/// Linear probe model at 25 °C: V = intercept + slope * (pH - 7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// volts per pH unit, typically negative
    pub slope: f64,
    /// volts at pH 7
    pub intercept: f64,
    /// `None` for the ideal default (no record on file)
    pub calibrated_at: Option<DateTime<Utc>>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            slope: IDEAL_SLOPE_V_PER_PH,
            intercept: IDEAL_INTERCEPT_V,
            calibrated_at: None,
        }
    }
}

impl Calibration {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self {
            slope,
            intercept,
            calibrated_at: None,
        }
    }

    /// Solve the line through two buffer readings `(volts, ph)`.
    pub fn from_two_points(p1: (f64, f64), p2: (f64, f64)) -> Result<Self, ReactorError> {
        let ((v1, ph1), (v2, ph2)) = (p1, p2);
        if ![v1, ph1, v2, ph2].iter().all(|x| x.is_finite()) {
            return Err(ReactorError::Config(
                "calibration points must be finite".into(),
            ));
        }
        if ph1 == ph2 {
            return Err(ReactorError::Config(
                "buffer pH values must be different".into(),
            ));
        }
        let slope = (v2 - v1) / (ph2 - ph1);
        if slope == 0.0 {
            return Err(ReactorError::Config(
                "buffer voltages are identical; probe is not responding".into(),
            ));
        }
        let intercept = v1 - slope * (ph1 - 7.0);
        Ok(Self::new(slope, intercept))
    }

    /// A zero or non-finite slope cannot be inverted into a pH.
    pub fn check(&self) -> Result<(), ReactorError> {
        if !self.slope.is_finite() || self.slope == 0.0 {
            return Err(ReactorError::Config(format!(
                "calibration slope {} must be finite and non-zero",
                self.slope
            )));
        }
        if !self.intercept.is_finite() {
            return Err(ReactorError::Config(format!(
                "calibration intercept {} must be finite",
                self.intercept
            )));
        }
        Ok(())
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.calibrated_at = Some(when);
        self
    }

    /// True for missing timestamps and for calibrations older than [`STALE_AFTER_HOURS`].
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.calibrated_at {
            Some(t) => now.signed_duration_since(t) > TimeDelta::hours(STALE_AFTER_HOURS),
            None => true,
        }
    }
}

/// Full calibration state; compartments without an entry use [`Calibration::default`].
pub type CalibrationSet = BTreeMap<CompartmentId, Calibration>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn two_point_solve_matches_buffers() {
        // pH 7 buffer at +5 mV, pH 4 buffer at +180 mV
        let c = Calibration::from_two_points((0.005, 7.0), (0.180, 4.0)).unwrap();
        assert!((c.slope - (-0.058_333_333)).abs() < 1e-6);
        assert!((c.intercept - 0.005).abs() < 1e-12);
    }

    #[test]
    fn two_point_rejects_equal_buffers() {
        let err = Calibration::from_two_points((0.0, 7.0), (0.1, 7.0)).unwrap_err();
        assert!(matches!(err, ReactorError::Config(_)));
        let err = Calibration::from_two_points((0.1, 7.0), (0.1, 4.0)).unwrap_err();
        assert!(err.to_string().contains("not responding"));
    }

    #[test]
    fn staleness_uses_48h_window() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let c = Calibration::default().at(t0);
        assert!(!c.is_stale(t0 + TimeDelta::hours(47)));
        assert!(c.is_stale(t0 + TimeDelta::hours(49)));
        assert!(Calibration::default().is_stale(t0));
    }
}
