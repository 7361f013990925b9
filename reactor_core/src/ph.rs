//! Voltage to pH conversion with temperature compensation.
//!
//! Calibrations are taken at 25 °C; the reactor runs at 37 °C, so the stored
//! slope is scaled by the ratio of absolute temperatures before use:
//!
//!   live_slope = slope * (310.15 / 298.15)
//!   pH = 7 + (voltage - intercept) / live_slope
//!
//! With the usual negative slope, pH falls as voltage rises, and a reading
//! equal to the intercept is exactly pH 7.

use reactor_traits::CompartmentId;
use reactor_traits::nernst::live_slope;
use std::sync::Arc;

use crate::calibration::{Calibration, CalibrationSet};
use crate::error::ReactorError;
use crate::util::round_to;

/// Convert one reading with an explicit calibration. Result is rounded to 0.01 pH.
pub fn voltage_to_ph(cal: &Calibration, voltage: f64) -> Result<f64, ReactorError> {
    if !cal.slope.is_finite() || cal.slope == 0.0 {
        return Err(ReactorError::Config(format!(
            "calibration slope must be finite and non-zero, got {}",
            cal.slope
        )));
    }
    if !cal.intercept.is_finite() {
        return Err(ReactorError::Config(format!(
            "calibration intercept must be finite, got {}",
            cal.intercept
        )));
    }
    if !voltage.is_finite() {
        return Err(ReactorError::Hardware(format!(
            "non-finite probe voltage {voltage}"
        )));
    }
    let ph = 7.0 + (voltage - cal.intercept) / live_slope(cal.slope);
    Ok(round_to(ph, 2))
}

/// Holds the active calibration set and converts probe voltages.
///
/// `reload` swaps the whole set at once; a snapshot taken before a reload keeps
/// seeing the old set in full.
#[derive(Debug, Clone, Default)]
pub struct PhEngine {
    calibrations: Arc<CalibrationSet>,
}

impl PhEngine {
    pub fn new(calibrations: CalibrationSet) -> Self {
        Self {
            calibrations: Arc::new(calibrations),
        }
    }

    pub fn reload(&mut self, calibrations: CalibrationSet) {
        tracing::info!(
            compartments = ?calibrations.keys().collect::<Vec<_>>(),
            "calibrations reloaded"
        );
        self.calibrations = Arc::new(calibrations);
    }

    pub fn snapshot(&self) -> Arc<CalibrationSet> {
        Arc::clone(&self.calibrations)
    }

    /// Calibration in effect for `compartment` (ideal default when none is on file).
    pub fn calibration(&self, compartment: CompartmentId) -> Calibration {
        self.calibrations
            .get(&compartment)
            .copied()
            .unwrap_or_default()
    }

    pub fn voltage_to_ph(
        &self,
        compartment: CompartmentId,
        voltage: f64,
    ) -> Result<f64, ReactorError> {
        voltage_to_ph(&self.calibration(compartment), voltage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_calibration_scenario() {
        let engine = PhEngine::default();
        let ph = engine.voltage_to_ph(1, 0.0177).unwrap();
        assert!((ph - 6.70).abs() <= 0.015, "ph = {ph}");
    }

    #[test]
    fn intercept_reads_exactly_neutral() {
        let mut set = CalibrationSet::new();
        set.insert(2, Calibration::new(-0.055, 0.0123));
        let engine = PhEngine::new(set);
        assert_eq!(engine.voltage_to_ph(2, 0.0123).unwrap(), 7.00);
    }

    #[test]
    fn zero_slope_is_a_configuration_error() {
        let mut set = CalibrationSet::new();
        set.insert(1, Calibration::new(0.0, 0.0));
        let engine = PhEngine::new(set);
        let err = engine.voltage_to_ph(1, 0.01).unwrap_err();
        assert!(matches!(err, ReactorError::Config(_)), "{err}");
    }

    #[test]
    fn snapshot_survives_reload() {
        let mut set = CalibrationSet::new();
        set.insert(1, Calibration::new(-0.05, 0.0));
        let mut engine = PhEngine::new(set);
        let before = engine.snapshot();

        let mut next = CalibrationSet::new();
        next.insert(3, Calibration::new(-0.06, 0.01));
        engine.reload(next);

        assert!(before.contains_key(&1));
        assert!(!engine.snapshot().contains_key(&1));
        // compartment 1 falls back to the ideal pair after the wholesale replace
        assert_eq!(engine.calibration(1), Calibration::default());
    }
}
