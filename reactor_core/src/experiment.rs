//! Active experiment configuration and the state manager that caches it.

use reactor_traits::CompartmentId;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ReactorError;
use crate::store::Store;

/// Acceptable pH band for one compartment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhBand {
    pub min_ph: f64,
    pub max_ph: f64,
}

/// One band per reactor compartment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompartmentBands {
    pub c1: PhBand,
    pub c2: PhBand,
    pub c3: PhBand,
}

impl CompartmentBands {
    pub fn uniform(band: PhBand) -> Self {
        Self {
            c1: band,
            c2: band,
            c3: band,
        }
    }

    pub fn get(&self, compartment: CompartmentId) -> Option<&PhBand> {
        match compartment {
            1 => Some(&self.c1),
            2 => Some(&self.c2),
            3 => Some(&self.c3),
            _ => None,
        }
    }
}

/// The single active experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    pub id: String,
    pub name: String,
    pub bands: CompartmentBands,
    /// Telemetry persistence cadence
    pub measurement_interval_mins: u32,
    /// Hard ceiling per dose
    pub max_pump_time_sec: u32,
    /// Minimum time between doses to the same compartment
    pub mixing_cooldown_sec: u32,
    /// Default size of a manual dose
    pub manual_dose_steps: u32,
}

impl ExperimentConfig {
    pub fn measurement_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.measurement_interval_mins) * 60)
    }

    pub fn max_pump_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_pump_time_sec))
    }

    pub fn mixing_cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.mixing_cooldown_sec))
    }

    pub fn threshold(&self, compartment: CompartmentId) -> Option<f64> {
        self.bands.get(compartment).map(|b| b.min_ph)
    }
}

/// Caches the active experiment and the calibration-mode flag.
///
/// Only the control loop's thread touches this; bridged commands reach it by
/// being applied there. `refresh` replaces the cached config by swapping an
/// `Arc`, so a config handed out earlier in a cycle stays whole.
#[derive(Debug, Default)]
pub struct ExperimentState {
    active: Option<Arc<ExperimentConfig>>,
    calibration_mode: Option<CompartmentId>,
    consecutive_failures: u32,
}

impl ExperimentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the active experiment. On store failure the previous config is kept.
    pub fn refresh(&mut self, store: &dyn Store) -> Result<(), ReactorError> {
        match store.get_active_experiment() {
            Ok(next) => {
                let changed = self.active.as_ref().map(|a| a.id.as_str())
                    != next.as_ref().map(|n| n.id.as_str());
                if changed {
                    tracing::info!(
                        experiment = next.as_ref().map(|n| n.id.as_str()),
                        "active experiment changed"
                    );
                }
                self.active = next.map(Arc::new);
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                tracing::warn!(
                    error = %e,
                    failures = self.consecutive_failures,
                    stale = self.active.is_some(),
                    "experiment refresh failed; keeping cached config"
                );
                Err(match e {
                    ReactorError::StoreUnavailable(_) => e,
                    other => ReactorError::StoreUnavailable(other.to_string()),
                })
            }
        }
    }

    pub fn active(&self) -> Option<Arc<ExperimentConfig>> {
        self.active.clone()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref().map(|a| a.id.as_str())
    }

    pub fn get_threshold(&self, compartment: CompartmentId) -> Option<f64> {
        self.active.as_deref().and_then(|a| a.threshold(compartment))
    }

    pub fn set_calibration_mode(&mut self, compartment: Option<CompartmentId>) {
        if self.calibration_mode != compartment {
            tracing::info!(compartment, "calibration mode");
        }
        self.calibration_mode = compartment;
    }

    pub fn calibration_mode(&self) -> Option<CompartmentId> {
        self.calibration_mode
    }

    /// Refresh failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
