#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod ads1115;
pub mod error;
pub mod util;

use reactor_traits::nernst;
use reactor_traits::{Adc, CompartmentId, Direction, DoseOutcome, Pump, estimated_dose_time};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::HwError;

/// Shared simulated reactor contents: the "true" pH of each compartment.
///
/// The simulated ADC reads from it and simulated pumps push it up, so a run
/// against the simulator behaves like a (very idealized) closed loop.
#[derive(Debug, Clone, Default)]
pub struct SimPlant {
    ph: Arc<Mutex<BTreeMap<CompartmentId, f64>>>,
}

impl SimPlant {
    pub fn new(initial: impl IntoIterator<Item = (CompartmentId, f64)>) -> Self {
        Self {
            ph: Arc::new(Mutex::new(initial.into_iter().collect())),
        }
    }

    pub fn set_ph(&self, compartment: CompartmentId, ph: f64) {
        if let Ok(mut map) = self.ph.lock() {
            map.insert(compartment, ph);
        }
    }

    pub fn ph(&self, compartment: CompartmentId) -> Option<f64> {
        self.ph.lock().ok().and_then(|m| m.get(&compartment).copied())
    }

    fn nudge(&self, compartment: CompartmentId, delta: f64) {
        if let Ok(mut map) = self.ph.lock() {
            if let Some(v) = map.get_mut(&compartment) {
                *v = (*v + delta).clamp(0.0, 14.0);
            }
        }
    }
}

/// Simulated probe front-end.
///
/// Voltage is back-computed from the plant pH with the inverse Nernst model at
/// operating temperature, plus a slow +-3 mV sine drift.
pub struct SimulatedAdc {
    plant: SimPlant,
    start: Instant,
    noise: bool,
}

impl SimulatedAdc {
    pub fn new(plant: SimPlant) -> Self {
        Self {
            plant,
            start: Instant::now(),
            noise: true,
        }
    }

    /// Disable drift so readings are exactly the ideal voltage.
    pub fn without_noise(mut self) -> Self {
        self.noise = false;
        self
    }
}

impl Adc for SimulatedAdc {
    fn read_voltage(
        &mut self,
        compartment: CompartmentId,
        _timeout: Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        let ph = self
            .plant
            .ph(compartment)
            .ok_or(HwError::InvalidCompartment(compartment))?;
        let mut v = nernst::ideal_voltage(ph);
        if self.noise {
            let t = self.start.elapsed().as_secs_f64();
            v += (t / 10.0 + f64::from(compartment)).sin() * 0.003;
        }
        let v = (v * 10_000.0).round() / 10_000.0;
        tracing::trace!(compartment, volts = v, "simulated adc read");
        Ok(v)
    }
}

/// Simulated stepper pump.
///
/// Refuses doses whose estimated duration exceeds the limit, exactly like the
/// real driver does before it touches a pin.
pub struct SimulatedPump {
    id: CompartmentId,
    plant: Option<SimPlant>,
    ph_per_step: f64,
    realtime: bool,
}

impl SimulatedPump {
    pub fn new(id: CompartmentId) -> Self {
        Self {
            id,
            plant: None,
            ph_per_step: 0.0,
            realtime: false,
        }
    }

    /// Raise the plant pH of this pump's compartment by `ph_per_step` per forward step.
    pub fn feeding(mut self, plant: SimPlant, ph_per_step: f64) -> Self {
        self.plant = Some(plant);
        self.ph_per_step = ph_per_step;
        self
    }

    /// Block for the estimated dose duration like real hardware would.
    pub fn realtime(mut self, on: bool) -> Self {
        self.realtime = on;
        self
    }
}

impl Pump for SimulatedPump {
    fn dose(&mut self, direction: Direction, steps: u32, max_time: Duration) -> DoseOutcome {
        let expected = estimated_dose_time(steps);
        if expected > max_time {
            tracing::warn!(
                pump = self.id,
                expected_ms = expected.as_millis() as u64,
                max_ms = max_time.as_millis() as u64,
                "simulated pump cutoff"
            );
            return DoseOutcome::Cutoff {
                elapsed: Duration::ZERO,
                steps_done: 0,
                requested: steps,
            };
        }
        tracing::info!(pump = self.id, steps, %direction, "simulated dose");
        if self.realtime {
            std::thread::sleep(expected);
        }
        if let Some(plant) = &self.plant {
            let sign = match direction {
                Direction::Forward => 1.0,
                Direction::Reverse => -1.0,
            };
            plant.nudge(self.id, sign * self.ph_per_step * f64::from(steps));
        }
        DoseOutcome::Completed {
            steps,
            elapsed: expected,
        }
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use hw::{HardwareAdc, HardwarePump};

#[cfg(all(feature = "hardware", target_os = "linux"))]
mod hw {
    use super::*;
    use crate::ads1115::Ads1115;
    use rppal::gpio::{Gpio, OutputPin};

    /// ADS1115 front-end: compartment 1 -> A0, 2 -> A1, 3 -> A2.
    pub struct HardwareAdc {
        ads: Ads1115,
    }

    impl HardwareAdc {
        pub fn new(bus: u8, address: u16) -> crate::error::Result<Self> {
            Ok(Self {
                ads: Ads1115::new(bus, address)?,
            })
        }
    }

    impl Adc for HardwareAdc {
        fn read_voltage(
            &mut self,
            compartment: CompartmentId,
            timeout: Duration,
        ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
            let channel = match compartment {
                1..=3 => compartment - 1,
                other => return Err(Box::new(HwError::InvalidCompartment(other))),
            };
            let mut attempts = 0;
            let max_attempts = 3;
            loop {
                match self.ads.read_single_ended(channel, timeout) {
                    Ok(v) => return Ok((v * 10_000.0).round() / 10_000.0),
                    Err(HwError::Timeout) if attempts < max_attempts => {
                        attempts += 1;
                        tracing::warn!(compartment, retries = attempts, "adc timeout, retrying");
                    }
                    Err(e) => {
                        tracing::error!(compartment, error = %e, "adc read error");
                        return Err(Box::new(e));
                    }
                }
            }
        }
    }

    /// STEP/DIR stepper driver pulsed at `STEP_PERIOD`.
    pub struct HardwarePump {
        id: CompartmentId,
        step: OutputPin,
        dir: OutputPin,
    }

    impl HardwarePump {
        pub fn new(id: CompartmentId, step_pin: u8, dir_pin: u8) -> crate::error::Result<Self> {
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let step = gpio
                .get(step_pin)
                .map_err(|e| HwError::Gpio(e.to_string()))?
                .into_output_low();
            let dir = gpio
                .get(dir_pin)
                .map_err(|e| HwError::Gpio(e.to_string()))?
                .into_output_low();
            tracing::info!(pump = id, step_pin, dir_pin, "stepper pins claimed");
            Ok(Self { id, step, dir })
        }
    }

    impl Pump for HardwarePump {
        fn dose(&mut self, direction: Direction, steps: u32, max_time: Duration) -> DoseOutcome {
            if estimated_dose_time(steps) > max_time {
                return DoseOutcome::Cutoff {
                    elapsed: Duration::ZERO,
                    steps_done: 0,
                    requested: steps,
                };
            }
            match direction {
                Direction::Forward => self.dir.set_high(),
                Direction::Reverse => self.dir.set_low(),
            }
            let half = reactor_traits::STEP_PERIOD / 2;
            tracing::info!(pump = self.id, steps, %direction, "dosing");
            let start = Instant::now();
            for i in 0..steps {
                let elapsed = start.elapsed();
                if elapsed > max_time {
                    self.step.set_low();
                    return DoseOutcome::Cutoff {
                        elapsed,
                        steps_done: i,
                        requested: steps,
                    };
                }
                self.step.set_high();
                std::thread::sleep(half);
                self.step.set_low();
                std::thread::sleep(half);
            }
            DoseOutcome::Completed {
                steps,
                elapsed: start.elapsed(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_adc_tracks_plant_ph() {
        let plant = SimPlant::new([(1, 7.0), (2, 6.5)]);
        let mut adc = SimulatedAdc::new(plant.clone()).without_noise();
        let v7 = adc.read_voltage(1, Duration::from_millis(10)).unwrap();
        assert!(v7.abs() < 1e-9);
        let v65 = adc.read_voltage(2, Duration::from_millis(10)).unwrap();
        // acidic side reads positive with a negative slope
        assert!(v65 > 0.0);
    }

    #[test]
    fn simulated_adc_rejects_unknown_compartment() {
        let mut adc = SimulatedAdc::new(SimPlant::new([(1, 7.0)]));
        let err = adc.read_voltage(9, Duration::from_millis(10)).unwrap_err();
        assert!(err.to_string().contains("compartment 9"));
    }

    #[test]
    fn simulated_pump_cuts_off_over_budget() {
        let mut pump = SimulatedPump::new(1);
        let out = pump.dose(Direction::Forward, 600, Duration::from_secs(1));
        assert_eq!(
            out,
            DoseOutcome::Cutoff {
                elapsed: Duration::ZERO,
                steps_done: 0,
                requested: 600
            }
        );
    }

    #[test]
    fn simulated_pump_feeds_plant() {
        let plant = SimPlant::new([(1, 6.0)]);
        let mut pump = SimulatedPump::new(1).feeding(plant.clone(), 0.01);
        let out = pump.dose(Direction::Forward, 20, Duration::from_secs(1));
        assert!(out.is_completed());
        let ph = plant.ph(1).unwrap();
        assert!((ph - 6.2).abs() < 1e-9, "ph = {ph}");
    }
}
