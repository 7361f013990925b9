//! Maps `Box<dyn Error>` from trait boundaries to typed `ReactorError`.
//!
//! The traits in `reactor_traits` use `Box<dyn Error + Send + Sync>` so any
//! driver can plug in; this module converts those to our typed error enum,
//! with an optional feature-gated path for `reactor_hardware::HwError`.

use crate::error::ReactorError;

/// Map a trait-boundary error to a typed `ReactorError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ReactorError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<reactor_hardware::error::HwError>() {
            return match hw {
                reactor_hardware::error::HwError::Timeout => {
                    ReactorError::HardwareTimeout(hw.to_string())
                }
                reactor_hardware::error::HwError::InvalidCompartment(id) => {
                    ReactorError::UnknownCompartment(*id)
                }
                other => ReactorError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        ReactorError::HardwareTimeout(s)
    } else {
        ReactorError::Hardware(s)
    }
}
