//! Human-readable error descriptions and structured JSON error formatting.

use reactor_core::ReactorError;
use reactor_hardware::error::HwError;

/// Stable failure classes, one exit code each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Config,
    Store,
    Hardware,
    Bus,
    Other,
}

impl FailureClass {
    pub fn name(self) -> &'static str {
        match self {
            FailureClass::Config => "Config",
            FailureClass::Store => "StoreUnavailable",
            FailureClass::Hardware => "Hardware",
            FailureClass::Bus => "Bus",
            FailureClass::Other => "Error",
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            FailureClass::Other => 1,
            FailureClass::Config => 3,
            FailureClass::Store => 4,
            FailureClass::Hardware => 5,
            FailureClass::Bus => 6,
        }
    }
}

fn reactor_error(err: &eyre::Report) -> Option<&ReactorError> {
    err.chain().find_map(|e| e.downcast_ref::<ReactorError>())
}

pub fn classify(err: &eyre::Report) -> FailureClass {
    if let Some(re) = reactor_error(err) {
        return match re {
            ReactorError::Config(_) | ReactorError::UnknownCompartment(_) => FailureClass::Config,
            ReactorError::StoreUnavailable(_) => FailureClass::Store,
            ReactorError::Hardware(_) | ReactorError::HardwareTimeout(_) => FailureClass::Hardware,
            ReactorError::Bus(_) => FailureClass::Bus,
            ReactorError::State(_) => FailureClass::Other,
        };
    }
    if err.chain().any(|e| e.downcast_ref::<HwError>().is_some()) {
        return FailureClass::Hardware;
    }
    FailureClass::Other
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(re) = reactor_error(err) {
        return match re {
            ReactorError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML, or a malformed experiment/calibration file.\nHow to fix: Edit the file named above, then rerun `reactor self-check`."
            ),
            ReactorError::UnknownCompartment(id) => format!(
                "What happened: Compartment {id} does not exist.\nLikely causes: A pump or calibration refers to a compartment outside 1..=3.\nHow to fix: Use compartments 1, 2 or 3."
            ),
            ReactorError::StoreUnavailable(msg) => format!(
                "What happened: The data store could not be reached ({msg}).\nLikely causes: Missing directory, wrong permissions, or a full disk.\nHow to fix: Check [store] dir in the config and that the process can write there."
            ),
            ReactorError::HardwareTimeout(msg) => format!(
                "What happened: A probe read timed out ({msg}).\nLikely causes: ADS1115 not wired correctly, wrong I2C address, or timeout too low.\nHow to fix: Verify [hardware] i2c_bus/adc_address and consider raising loop.sensor_timeout_ms."
            ),
            ReactorError::Hardware(msg) => format!(
                "What happened: Hardware error ({msg}).\nLikely causes: Wrong GPIO pins, missing permissions, or a disconnected probe.\nHow to fix: Check [hardware] in the config and the wiring, then rerun `reactor self-check`."
            ),
            ReactorError::Bus(msg) => format!(
                "What happened: The message bus failed ({msg}).\nLikely causes: The consumer of stdout went away.\nHow to fix: Restart the service with its output connected."
            ),
            ReactorError::State(msg) => format!(
                "What happened: {msg}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(hw) = err.chain().find_map(|e| e.downcast_ref::<HwError>()) {
        return format!(
            "What happened: Failed to initialize hardware ({hw}).\nLikely causes: Incorrect pin numbers, I2C disabled, or insufficient GPIO permissions.\nHow to fix: Fix [hardware] in the config; ensure the process may access GPIO and I2C."
        );
    }

    // Calibration CSV header special-case
    let msg = err.to_string();
    if msg
        .to_ascii_lowercase()
        .contains("calibration csv must have headers")
    {
        return "Invalid headers in calibration CSV. Expected 'compartment,slope,intercept,calibrated_at'.".to_string();
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    classify(err).exit_code()
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": classify(err).name(),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;
    use rstest::rstest;

    #[rstest]
    #[case(ReactorError::Config("x".into()), 3, "Invalid configuration")]
    #[case(ReactorError::StoreUnavailable("x".into()), 4, "data store")]
    #[case(ReactorError::HardwareTimeout("x".into()), 5, "timed out")]
    #[case(ReactorError::Bus("x".into()), 6, "message bus")]
    fn typed_errors_map_to_codes(
        #[case] e: ReactorError,
        #[case] code: i32,
        #[case] needle: &str,
    ) {
        let report: eyre::Report = e.into();
        assert_eq!(exit_code_for_error(&report), code);
        assert!(humanize(&report).contains(needle));
    }

    #[test]
    fn context_does_not_hide_the_class() {
        let r: Result<(), ReactorError> = Err(ReactorError::StoreUnavailable("down".into()));
        let report = r.wrap_err("activate experiment").unwrap_err();
        assert_eq!(exit_code_for_error(&report), 4);
        let json: serde_json::Value = serde_json::from_str(&format_error_json(&report)).unwrap();
        assert_eq!(json["reason"], "StoreUnavailable");
    }

    #[test]
    fn untyped_errors_are_generic() {
        let report = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&report), 1);
        assert!(humanize(&report).starts_with("Something went wrong"));
    }
}
