//! Builder for [`Reactor`].
//!
//! Collaborators are boxed here so the loop itself stays free of generic
//! parameters other than the clock. `build()` validates what it was given and
//! hands back the reactor together with the producer half of its command
//! channel.

use reactor_traits::clock::{Clock, MonotonicClock};
use reactor_traits::{Adc, CompartmentId, Pump, STEP_PERIOD};
use std::collections::BTreeMap;

use crate::bridge::{self, CommandSender};
use crate::bus::Bus;
use crate::config::ControllerCfg;
use crate::dosing::DosingAlgorithm;
use crate::error::{ReactorError, Result};
use crate::experiment::ExperimentState;
use crate::ph::PhEngine;
use crate::pump_worker::{PumpSet, PumpWorker};
use crate::scheduler::{CyclePhase, Reactor};
use crate::store::Store;
use crate::types::COMPARTMENTS;

pub struct ReactorBuilder<C: Clock = MonotonicClock> {
    cfg: ControllerCfg,
    dosing: DosingAlgorithm,
    adc: Option<Box<dyn Adc + Send>>,
    pumps: PumpSet,
    store: Option<Box<dyn Store>>,
    bus: Option<Box<dyn Bus>>,
    clock: C,
}

impl Default for ReactorBuilder<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorBuilder<MonotonicClock> {
    pub fn new() -> Self {
        Self {
            cfg: ControllerCfg::default(),
            dosing: DosingAlgorithm::default(),
            adc: None,
            pumps: BTreeMap::new(),
            store: None,
            bus: None,
            clock: MonotonicClock::new(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> eyre::Report {
    eyre::Report::new(ReactorError::Config(msg.into()))
}

impl<C: Clock> ReactorBuilder<C> {
    pub fn with_config(mut self, cfg: ControllerCfg) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_dosing(mut self, dosing: DosingAlgorithm) -> Self {
        self.dosing = dosing;
        self
    }

    pub fn with_adc(mut self, adc: impl Adc + Send + 'static) -> Self {
        self.adc = Some(Box::new(adc));
        self
    }

    /// Register the pump serving `compartment`. Pump ids equal compartment ids.
    pub fn with_pump(mut self, compartment: CompartmentId, pump: impl Pump + Send + 'static) -> Self {
        self.pumps.insert(compartment, Box::new(pump));
        self
    }

    pub fn with_store(mut self, store: impl Store + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_bus(mut self, bus: impl Bus + 'static) -> Self {
        self.bus = Some(Box::new(bus));
        self
    }

    pub fn with_clock<C2: Clock>(self, clock: C2) -> ReactorBuilder<C2> {
        ReactorBuilder {
            cfg: self.cfg,
            dosing: self.dosing,
            adc: self.adc,
            pumps: self.pumps,
            store: self.store,
            bus: self.bus,
            clock,
        }
    }

    pub fn build(self) -> Result<(Reactor<C>, CommandSender)> {
        let adc = self.adc.ok_or_else(|| invalid("an ADC is required"))?;
        let store = self.store.ok_or_else(|| invalid("a store is required"))?;
        let bus = self.bus.ok_or_else(|| invalid("a message bus is required"))?;
        if let Some(id) = self.pumps.keys().find(|id| !COMPARTMENTS.contains(id)) {
            return Err(invalid(format!("pump {id} does not match a compartment")));
        }
        if self.cfg.cycle.is_zero() {
            return Err(invalid("cycle interval must be > 0"));
        }
        if self.cfg.sensor_timeout.is_zero() {
            return Err(invalid("sensor timeout must be > 0"));
        }
        if !(self.dosing.gain_steps_per_ph.is_finite() && self.dosing.gain_steps_per_ph > 0.0) {
            return Err(invalid("dosing gain must be > 0"));
        }
        if self.dosing.seconds_per_step != STEP_PERIOD.as_secs_f64() {
            return Err(invalid(format!(
                "dosing step period {}s does not match the pump step period {:?}",
                self.dosing.seconds_per_step, STEP_PERIOD
            )));
        }

        let (tx, commands) = bridge::channel();
        let (stop_handle, stop) = bridge::stop_pair();
        tracing::debug!(pumps = self.pumps.len(), cycle = ?self.cfg.cycle, "reactor built");
        let reactor = Reactor {
            cfg: self.cfg,
            dosing: self.dosing,
            ph: PhEngine::default(),
            state: ExperimentState::new(),
            adc,
            pumps: PumpWorker::spawn(self.pumps),
            store,
            bus,
            commands,
            stop,
            stop_handle,
            clock: self.clock,
            last_dose: BTreeMap::new(),
            last_logged: None,
            in_flight: BTreeMap::new(),
            phase: CyclePhase::Idle,
            online: false,
        };
        Ok((reactor, tx))
    }
}
