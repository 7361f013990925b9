//! `From` implementations bridging `reactor_config` file types to core types.

use reactor_config::{BandToml, CalibrationRow, CompartmentsToml, DosingCfg, ExperimentToml, LoopCfg};
use reactor_traits::STEP_PERIOD;

use crate::calibration::Calibration;
use crate::config::ControllerCfg;
use crate::dosing::DosingAlgorithm;
use crate::experiment::{CompartmentBands, ExperimentConfig, PhBand};

// ── Experiment ──────────────────────────────────────────────────────────────

impl From<BandToml> for PhBand {
    fn from(b: BandToml) -> Self {
        Self {
            min_ph: b.min_ph,
            max_ph: b.max_ph,
        }
    }
}

impl From<PhBand> for BandToml {
    fn from(b: PhBand) -> Self {
        Self {
            min_ph: b.min_ph,
            max_ph: b.max_ph,
        }
    }
}

impl From<ExperimentToml> for ExperimentConfig {
    fn from(e: ExperimentToml) -> Self {
        Self {
            id: e.id,
            name: e.name,
            bands: CompartmentBands {
                c1: e.compartments.c1.into(),
                c2: e.compartments.c2.into(),
                c3: e.compartments.c3.into(),
            },
            measurement_interval_mins: e.measurement_interval_mins,
            max_pump_time_sec: e.max_pump_time_sec,
            mixing_cooldown_sec: e.mixing_cooldown_sec,
            manual_dose_steps: e.manual_dose_steps,
        }
    }
}

impl From<&ExperimentConfig> for ExperimentToml {
    fn from(e: &ExperimentConfig) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            measurement_interval_mins: e.measurement_interval_mins,
            max_pump_time_sec: e.max_pump_time_sec,
            mixing_cooldown_sec: e.mixing_cooldown_sec,
            manual_dose_steps: e.manual_dose_steps,
            compartments: CompartmentsToml {
                c1: e.bands.c1.into(),
                c2: e.bands.c2.into(),
                c3: e.bands.c3.into(),
            },
        }
    }
}

// ── Calibration ─────────────────────────────────────────────────────────────

impl From<&CalibrationRow> for Calibration {
    fn from(r: &CalibrationRow) -> Self {
        Calibration::new(r.slope, r.intercept).at(r.calibrated_at)
    }
}

// ── Dosing / loop ───────────────────────────────────────────────────────────

impl From<&DosingCfg> for DosingAlgorithm {
    fn from(c: &DosingCfg) -> Self {
        Self {
            gain_steps_per_ph: c.gain_steps_per_ph,
            min_dose_steps: c.min_dose_steps,
            steps_per_ml: c.steps_per_ml,
            seconds_per_step: STEP_PERIOD.as_secs_f64(),
        }
    }
}

impl ControllerCfg {
    pub fn from_config(lp: &LoopCfg, dosing: &DosingCfg) -> Self {
        Self {
            cycle: std::time::Duration::from_millis(lp.cycle_ms),
            recovery_delay: std::time::Duration::from_millis(lp.recovery_ms),
            sensor_timeout: std::time::Duration::from_millis(lp.sensor_timeout_ms),
            degraded_after_failures: lp.degraded_after_failures,
            fallback_manual_steps: dosing.fallback_manual_steps,
            fallback_max_pump_time: std::time::Duration::from_secs(u64::from(
                dosing.fallback_max_pump_time_sec,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_toml_round_trips_through_core_type() {
        let band = BandToml {
            min_ph: 6.8,
            max_ph: 7.4,
        };
        let toml_exp = ExperimentToml {
            id: "exp-1".into(),
            name: "batch".into(),
            measurement_interval_mins: 5,
            max_pump_time_sec: 30,
            mixing_cooldown_sec: 60,
            manual_dose_steps: 40,
            compartments: CompartmentsToml {
                c1: band,
                c2: BandToml {
                    min_ph: 6.5,
                    max_ph: 7.0,
                },
                c3: band,
            },
        };
        let core: ExperimentConfig = toml_exp.clone().into();
        assert_eq!(core.threshold(2), Some(6.5));
        assert_eq!(ExperimentToml::from(&core), toml_exp);
    }

    #[test]
    fn dosing_cfg_keeps_driver_step_period() {
        let cfg = DosingCfg::default();
        let algo = DosingAlgorithm::from(&cfg);
        assert_eq!(algo.seconds_per_step, 0.002);
        assert_eq!(algo.min_dose_steps, cfg.min_dose_steps);
    }
}
