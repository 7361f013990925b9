//! Electrochemical constants shared by the pH engine and the simulated probe.

/// Ideal glass-electrode slope at 25 °C, volts per pH unit.
pub const IDEAL_SLOPE_V_PER_PH: f64 = -0.05916;
/// Ideal probe output at pH 7, volts.
pub const IDEAL_INTERCEPT_V: f64 = 0.0;
/// Calibration reference temperature (25 °C) in kelvin.
pub const REFERENCE_TEMP_K: f64 = 298.15;
/// Reactor operating temperature (37 °C) in kelvin.
pub const OPERATING_TEMP_K: f64 = 310.15;

/// Scale a 25 °C slope to the operating temperature.
#[inline]
pub fn live_slope(slope_25c: f64) -> f64 {
    slope_25c * (OPERATING_TEMP_K / REFERENCE_TEMP_K)
}

/// Voltage an ideal probe would report at `ph` when running at operating temperature.
///
/// V = intercept + live_slope * (pH - 7): acidic samples read positive.
#[inline]
pub fn ideal_voltage(ph: f64) -> f64 {
    IDEAL_INTERCEPT_V + live_slope(IDEAL_SLOPE_V_PER_PH) * (ph - 7.0)
}
