//! Small numeric helpers shared by the engine modules.

/// Round to `places` decimal places, half away from zero.
#[inline]
pub fn round_to(x: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (x * m).round() / m
}
