pub mod clock;
pub mod nernst;

pub use clock::{Clock, MonotonicClock};

use std::time::Duration;

/// Reactor compartments are numbered from 1; each has one probe and one pump.
pub type CompartmentId = u8;

/// Time for one full step pulse (high + low) of a dosing pump.
///
/// Drivers pulse at exactly this rate and the dosing algorithm derives its
/// step ceiling from it, so both sides agree on how long a dose takes.
pub const STEP_PERIOD: Duration = Duration::from_millis(2);

/// Estimated wall time for `steps` pulses at [`STEP_PERIOD`].
#[inline]
pub fn estimated_dose_time(steps: u32) -> Duration {
    STEP_PERIOD.saturating_mul(steps)
}

/// Pump rotation. `Forward` pushes base into the compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" | "fwd" | "1" => Ok(Direction::Forward),
            "reverse" | "rev" | "0" => Ok(Direction::Reverse),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Result of a single dose request.
///
/// A cutoff is not an error in the transport sense: the pump did what the
/// safety limit allowed and reports how far it got.
#[derive(Debug, Clone, PartialEq)]
pub enum DoseOutcome {
    /// All requested steps were pulsed.
    Completed { steps: u32, elapsed: Duration },
    /// The dose was refused or stopped because it would exceed `max_time`.
    Cutoff {
        elapsed: Duration,
        steps_done: u32,
        requested: u32,
    },
    /// The driver failed (GPIO, bus, uninitialized pins, ...).
    HardwareFault(String),
}

impl DoseOutcome {
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, DoseOutcome::Completed { .. })
    }
}

/// Voltage source for the per-compartment pH probes.
pub trait Adc {
    fn read_voltage(
        &mut self,
        compartment: CompartmentId,
        timeout: Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;
}

/// Stepper-driven peristaltic pump.
pub trait Pump {
    /// Pulse `steps` steps in `direction`, never running longer than `max_time`.
    fn dose(&mut self, direction: Direction, steps: u32, max_time: Duration) -> DoseOutcome;
}

impl<T: Adc + ?Sized> Adc for Box<T> {
    fn read_voltage(
        &mut self,
        compartment: CompartmentId,
        timeout: Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_voltage(compartment, timeout)
    }
}

impl<T: Pump + ?Sized> Pump for Box<T> {
    fn dose(&mut self, direction: Direction, steps: u32, max_time: Duration) -> DoseOutcome {
        (**self).dose(direction, steps, max_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_time_matches_step_period() {
        assert_eq!(estimated_dose_time(0), Duration::ZERO);
        assert_eq!(estimated_dose_time(15), Duration::from_millis(30));
        assert_eq!(estimated_dose_time(15_000), Duration::from_secs(30));
    }

    #[test]
    fn direction_parses_loosely() {
        assert_eq!("Forward".parse::<Direction>(), Ok(Direction::Forward));
        assert_eq!("rev".parse::<Direction>(), Ok(Direction::Reverse));
        assert!("sideways".parse::<Direction>().is_err());
    }
}
