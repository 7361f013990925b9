//! Test doubles for the hardware and messaging seams.
//!
//! All of them are cheap clones over shared state, so a test keeps one handle
//! for inspection while the controller owns another.

use reactor_traits::{Adc, CompartmentId, Direction, DoseOutcome, Pump, estimated_dose_time};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::bus::{Bus, Outbound};
use crate::error::ReactorError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// ADC returning fixed per-compartment voltages or scripted failures.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAdc {
    voltages: Arc<Mutex<BTreeMap<CompartmentId, Result<f64, String>>>>,
    reads: Arc<Mutex<Vec<CompartmentId>>>,
}

impl ScriptedAdc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_voltage(&self, compartment: CompartmentId, volts: f64) -> &Self {
        lock(&self.voltages).insert(compartment, Ok(volts));
        self
    }

    pub fn fail(&self, compartment: CompartmentId, msg: &str) -> &Self {
        lock(&self.voltages).insert(compartment, Err(msg.to_owned()));
        self
    }

    /// Compartments read so far, in order.
    pub fn reads(&self) -> Vec<CompartmentId> {
        lock(&self.reads).clone()
    }
}

impl Adc for ScriptedAdc {
    fn read_voltage(
        &mut self,
        compartment: CompartmentId,
        _timeout: Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        lock(&self.reads).push(compartment);
        match lock(&self.voltages).get(&compartment) {
            Some(Ok(v)) => Ok(*v),
            Some(Err(msg)) => Err(msg.clone().into()),
            None => Err(format!("no probe on compartment {compartment}").into()),
        }
    }
}

/// Pump that records every call. Outcomes are popped from a script; with an
/// empty script a dose completes in its estimated time.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPump {
    calls: Arc<Mutex<Vec<(Direction, u32, Duration)>>>,
    script: Arc<Mutex<VecDeque<DoseOutcome>>>,
}

impl ScriptedPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome for the next call.
    pub fn then(&self, outcome: DoseOutcome) -> &Self {
        lock(&self.script).push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<(Direction, u32, Duration)> {
        lock(&self.calls).clone()
    }
}

impl Pump for ScriptedPump {
    fn dose(&mut self, direction: Direction, steps: u32, max_time: Duration) -> DoseOutcome {
        lock(&self.calls).push((direction, steps, max_time));
        lock(&self.script)
            .pop_front()
            .unwrap_or(DoseOutcome::Completed {
                steps,
                elapsed: estimated_dose_time(steps),
            })
    }
}

#[derive(Debug, Default)]
struct BusLog {
    connected: bool,
    last_will: Option<Outbound>,
    messages: Vec<Outbound>,
    disconnects: u32,
    failing: bool,
}

/// Bus that keeps every published message.
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    log: Arc<Mutex<BusLog>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, `publish` fails with `ReactorError::Bus`.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.log).failing = failing;
    }

    pub fn messages(&self) -> Vec<Outbound> {
        lock(&self.log).messages.clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Outbound> {
        lock(&self.log)
            .messages
            .iter()
            .filter(|m| m.topic() == topic)
            .cloned()
            .collect()
    }

    pub fn last_will(&self) -> Option<Outbound> {
        lock(&self.log).last_will.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.log).connected
    }

    pub fn disconnects(&self) -> u32 {
        lock(&self.log).disconnects
    }
}

impl Bus for RecordingBus {
    fn connect(&mut self, last_will: &Outbound) -> Result<(), ReactorError> {
        let mut log = lock(&self.log);
        log.connected = true;
        log.last_will = Some(last_will.clone());
        Ok(())
    }

    fn publish(&mut self, msg: &Outbound) -> Result<(), ReactorError> {
        let mut log = lock(&self.log);
        if log.failing {
            return Err(ReactorError::Bus("recording bus set to fail".into()));
        }
        log.messages.push(msg.clone());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ReactorError> {
        let mut log = lock(&self.log);
        log.connected = false;
        log.disconnects += 1;
        Ok(())
    }
}
