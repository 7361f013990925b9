//! Runtime configuration for the control loop.
//!
//! Separate from the TOML-deserialized config in `reactor_config`; see
//! `conversions` for the mapping.

use std::time::Duration;

/// Loop timing and failure policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerCfg {
    /// Target period of one control cycle.
    pub cycle: Duration,
    /// Pause after a cycle-level failure before trying again.
    pub recovery_delay: Duration,
    /// Max wait per probe read.
    pub sensor_timeout: Duration,
    /// Consecutive store failures before status reports "degraded".
    pub degraded_after_failures: u32,
    /// Manual dose size when neither the command nor an experiment gives one.
    pub fallback_manual_steps: u32,
    /// Manual dose cutoff when no experiment is active.
    pub fallback_max_pump_time: Duration,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            cycle: Duration::from_secs(1),
            recovery_delay: Duration::from_secs(5),
            sensor_timeout: Duration::from_millis(200),
            degraded_after_failures: 3,
            fallback_manual_steps: 50,
            fallback_max_pump_time: Duration::from_secs(30),
        }
    }
}
