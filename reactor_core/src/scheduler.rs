//! The control loop.
//!
//! One `Reactor` runs the cycle `REFRESH → READ_SENSORS → DOSE → LOG_TELEMETRY
//! → PUBLISH → SLEEP` on the thread that calls [`Reactor::run`]. It owns every
//! piece of mutable controller state: cooldown timestamps, the last telemetry
//! write, the experiment cache and the calibration-mode flag. Other threads
//! reach it only through the command channel and the [`StopHandle`].
//!
//! Pump actuation is handed to the [`PumpWorker`]; its reports are applied
//! here, so cooldowns only ever change on this thread. A compartment with a
//! dose still in flight is not dosed again until the report arrives.

use chrono::Utc;
use crossbeam_channel as xch;
use eyre::WrapErr;
use reactor_traits::clock::{Clock, MonotonicClock};
use reactor_traits::{Adc, CompartmentId, Direction, DoseOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::{Command, CommandReceiver, StopHandle, StopSignal};
use crate::bus::{Bus, Outbound, Presence};
use crate::builder::ReactorBuilder;
use crate::config::ControllerCfg;
use crate::dosing::DosingAlgorithm;
use crate::error::{ReactorError, Result};
use crate::experiment::{ExperimentConfig, ExperimentState};
use crate::hw_error::map_hw_error;
use crate::ph::PhEngine;
use crate::pump_worker::{DoseJob, DoseReport, PumpWorker};
use crate::status::StatusReport;
use crate::store::Store;
use crate::types::{COMPARTMENTS, DoseOrigin, EventLevel, EventRecord, PumpAction, SensorReading};

/// Where the loop currently is. Cycle failures are reported with the phase
/// they happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Refresh,
    ReadSensors,
    Dose,
    LogTelemetry,
    Publish,
    Sleep,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Refresh => "refresh",
            CyclePhase::ReadSensors => "read_sensors",
            CyclePhase::Dose => "dose",
            CyclePhase::LogTelemetry => "log_telemetry",
            CyclePhase::Publish => "publish",
            CyclePhase::Sleep => "sleep",
        };
        f.write_str(s)
    }
}

pub struct Reactor<C: Clock = MonotonicClock> {
    pub(crate) cfg: ControllerCfg,
    pub(crate) dosing: DosingAlgorithm,
    pub(crate) ph: PhEngine,
    pub(crate) state: ExperimentState,
    pub(crate) adc: Box<dyn Adc + Send>,
    pub(crate) pumps: PumpWorker,
    pub(crate) store: Box<dyn Store>,
    pub(crate) bus: Box<dyn Bus>,
    pub(crate) commands: CommandReceiver,
    pub(crate) stop: StopSignal,
    pub(crate) stop_handle: StopHandle,
    pub(crate) clock: C,
    pub(crate) last_dose: BTreeMap<CompartmentId, Instant>,
    pub(crate) last_logged: Option<Instant>,
    pub(crate) in_flight: BTreeMap<CompartmentId, u32>,
    pub(crate) phase: CyclePhase,
    pub(crate) online: bool,
}

impl Reactor<MonotonicClock> {
    pub fn builder() -> ReactorBuilder<MonotonicClock> {
        ReactorBuilder::new()
    }
}

impl<C: Clock> Reactor<C> {
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn ph_engine(&self) -> &PhEngine {
        &self.ph
    }

    pub fn experiment(&self) -> &ExperimentState {
        &self.state
    }

    /// Time of the last successful dose to `compartment`.
    pub fn last_dose(&self, compartment: CompartmentId) -> Option<Instant> {
        self.last_dose.get(&compartment).copied()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::new(
            self.state.active_id().map(str::to_owned),
            self.state.consecutive_failures(),
            self.cfg.degraded_after_failures,
        )
    }

    /// Connect, announce presence, load calibrations and the active experiment.
    ///
    /// Store failures here are not fatal: the loop starts on ideal calibrations
    /// and no experiment, and picks both up once the store answers.
    pub fn start(&mut self) -> Result<()> {
        self.bus
            .connect(&Outbound::Presence(Presence::Offline))
            .wrap_err("connect message bus")?;
        self.online = true;
        self.bus
            .publish(&Outbound::Presence(Presence::Online))
            .wrap_err("announce presence")?;
        tracing::info!("reactor online");

        self.reload_calibrations();
        if let Err(e) = self.state.refresh(self.store.as_ref()) {
            tracing::warn!(error = %e, "no experiment loaded at startup");
        }
        Ok(())
    }

    /// Announce offline and disconnect. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if !self.online {
            return;
        }
        self.online = false;
        if let Err(e) = self.bus.publish(&Outbound::Presence(Presence::Offline)) {
            tracing::warn!(error = %e, "failed to announce offline");
        }
        if let Err(e) = self.bus.disconnect() {
            tracing::warn!(error = %e, "bus disconnect failed");
        }
        tracing::info!("reactor offline");
    }

    /// Run until a stop is requested. A failed cycle is logged and followed by
    /// the recovery delay; it never ends the loop.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        while !self.stop.is_stopped() {
            let delay = match self.run_cycle() {
                Ok(()) => self.cfg.cycle,
                Err(e) => {
                    tracing::error!(
                        phase = %self.phase,
                        error = format!("{e:#}"),
                        "cycle failed; recovering"
                    );
                    self.cfg.recovery_delay
                }
            };
            self.idle(delay);
        }
        self.drain_reports();
        self.shutdown();
        Ok(())
    }

    /// One full cycle, without the trailing sleep.
    pub fn run_cycle(&mut self) -> Result<()> {
        self.process_commands();
        self.drain_reports();

        self.phase = CyclePhase::Refresh;
        self.refresh_experiment();
        let active = self.state.active();

        self.phase = CyclePhase::ReadSensors;
        let reading = self.read_sensors();

        self.phase = CyclePhase::Dose;
        if let Some(exp) = &active {
            for (compartment, ph) in reading.iter() {
                self.maybe_dose(exp, compartment, ph);
            }
        }

        self.phase = CyclePhase::LogTelemetry;
        if let Some(exp) = &active {
            self.log_telemetry(exp, &reading);
        }

        self.phase = CyclePhase::Publish;
        self.publish(reading)?;
        self.phase = CyclePhase::Idle;
        Ok(())
    }

    /// Apply every queued command. Returns how many were applied.
    pub fn process_commands(&mut self) -> usize {
        let pending = self.commands.drain();
        let n = pending.len();
        for cmd in pending {
            self.apply_command(cmd);
        }
        n
    }

    /// Block until every submitted dose has reported back, or `timeout` passes.
    /// Returns `true` when nothing is left in flight.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.pumps.reports().recv_timeout(left) {
                Ok(report) => self.apply_report(report),
                Err(_) => break,
            }
        }
        self.in_flight.is_empty()
    }

    fn idle(&mut self, delay: Duration) {
        self.phase = CyclePhase::Sleep;
        let deadline = self.clock.now() + delay;
        let mut senders_gone = false;
        loop {
            if self.stop.is_stopped() {
                break;
            }
            let left = deadline.saturating_duration_since(self.clock.now());
            if left.is_zero() {
                break;
            }
            let commands = if senders_gone {
                xch::never()
            } else {
                self.commands.channel().clone()
            };
            let reports = self.pumps.reports().clone();
            let wake = self.stop.wake().clone();
            xch::select! {
                recv(commands) -> msg => match msg {
                    Ok(cmd) => self.apply_command(cmd),
                    // every sender is gone; keep waiting on stop and pump reports
                    Err(_) => senders_gone = true,
                },
                recv(reports) -> msg => {
                    if let Ok(report) = msg {
                        self.apply_report(report);
                    }
                },
                recv(wake) -> _ => break,
                default(left) => break,
            }
        }
        self.phase = CyclePhase::Idle;
    }

    fn drain_reports(&mut self) {
        let ready: Vec<DoseReport> = self.pumps.reports().try_iter().collect();
        for report in ready {
            self.apply_report(report);
        }
    }

    // ── REFRESH ──────────────────────────────────────────────────────────────

    fn refresh_experiment(&mut self) {
        if self.state.refresh(self.store.as_ref()).is_err()
            && self.state.consecutive_failures() == self.cfg.degraded_after_failures
        {
            self.emit(
                EventLevel::Error,
                format!(
                    "Store unavailable for {} consecutive cycles; running on cached configuration",
                    self.state.consecutive_failures()
                ),
                None,
            );
        }
    }

    fn reload_calibrations(&mut self) {
        match self.store.get_latest_calibrations() {
            Ok(set) => {
                let now = Utc::now();
                for (compartment, cal) in &set {
                    if cal.is_stale(now) {
                        tracing::warn!(
                            compartment,
                            calibrated_at = ?cal.calibrated_at,
                            "calibration is older than 48h"
                        );
                    }
                }
                self.ph.reload(set);
            }
            Err(e) => self.emit(
                EventLevel::Warning,
                format!("Calibration reload failed, keeping current calibrations: {e}"),
                None,
            ),
        }
    }

    // ── READ_SENSORS ─────────────────────────────────────────────────────────

    fn read_sensors(&mut self) -> SensorReading {
        let mut reading = SensorReading::new();
        for compartment in COMPARTMENTS {
            let volts = match self
                .adc
                .read_voltage(compartment, self.cfg.sensor_timeout)
            {
                Ok(v) => v,
                Err(e) => {
                    let err = map_hw_error(&*e);
                    self.emit(
                        EventLevel::Error,
                        format!("Sensor read failed for compartment {compartment}: {err}"),
                        Some(compartment),
                    );
                    continue;
                }
            };
            if self.state.calibration_mode() == Some(compartment) {
                self.publish_quiet(Outbound::RawVoltage {
                    compartment,
                    raw_voltage: volts,
                    timestamp: Utc::now(),
                });
            }
            match self.ph.voltage_to_ph(compartment, volts) {
                Ok(ph) => {
                    tracing::trace!(compartment, volts, ph, "reading");
                    reading.insert(compartment, ph);
                }
                Err(e) => self.emit(
                    EventLevel::Error,
                    format!("pH conversion failed for compartment {compartment}: {e}"),
                    Some(compartment),
                ),
            }
        }
        reading
    }

    // ── DOSE ─────────────────────────────────────────────────────────────────

    fn maybe_dose(&mut self, exp: &ExperimentConfig, compartment: CompartmentId, ph: f64) {
        let Some(threshold) = exp.threshold(compartment) else {
            return;
        };
        if !self.pumps.has_pump(compartment) {
            tracing::debug!(compartment, "no pump; skipping");
            return;
        }
        if self.in_flight.contains_key(&compartment) {
            tracing::debug!(compartment, "dose in flight; skipping");
            return;
        }
        let cooling = self
            .last_dose
            .get(&compartment)
            .is_some_and(|last| self.clock.since(*last) < exp.mixing_cooldown());
        if cooling {
            tracing::debug!(compartment, "mixing cooldown; skipping");
            return;
        }
        if ph >= threshold {
            return;
        }
        let steps = self
            .dosing
            .calculate_steps(threshold - ph, f64::from(exp.max_pump_time_sec));
        if steps == 0 {
            return;
        }
        tracing::info!(compartment, ph, threshold, steps, "auto dose");
        self.submit(DoseJob {
            pump_id: compartment,
            direction: Direction::Forward,
            steps,
            max_time: exp.max_pump_time(),
            origin: DoseOrigin::Auto,
        });
    }

    fn submit(&mut self, job: DoseJob) {
        let pump_id = job.pump_id;
        if job.steps == 0 {
            return;
        }
        match self.pumps.submit(job) {
            Ok(()) => *self.in_flight.entry(pump_id).or_insert(0) += 1,
            Err(e) => self.emit(
                EventLevel::Error,
                format!("Could not dispatch dose to pump {pump_id}: {e}"),
                Some(pump_id),
            ),
        }
    }

    fn apply_report(&mut self, report: DoseReport) {
        let DoseReport { job, outcome } = report;
        let c = job.pump_id;
        if let Some(n) = self.in_flight.get_mut(&c) {
            *n -= 1;
            if *n == 0 {
                self.in_flight.remove(&c);
            }
        }
        match outcome {
            DoseOutcome::Completed { steps, elapsed } => {
                if job.direction == Direction::Forward && steps > 0 {
                    self.last_dose.insert(c, self.clock.now());
                }
                let volume = match self.dosing.calculate_volume_ml(steps) {
                    Ok(ml) => format!("{ml} ml"),
                    Err(e) => {
                        tracing::warn!(error = %e, "volume estimate unavailable");
                        "volume unknown".to_owned()
                    }
                };
                let origin = match job.origin {
                    DoseOrigin::Auto => "Auto",
                    DoseOrigin::Manual => "Manual",
                };
                self.emit(
                    EventLevel::Info,
                    format!(
                        "{origin} dose on compartment {c}: {steps} steps {} ({volume}) in {:.2}s",
                        job.direction,
                        elapsed.as_secs_f64()
                    ),
                    Some(c),
                );
                self.log_pump_action(&job, steps);
            }
            DoseOutcome::Cutoff {
                elapsed,
                steps_done,
                requested,
            } => self.emit(
                EventLevel::Warning,
                format!(
                    "Safety cutoff on compartment {c}: {steps_done}/{requested} steps after {:.2}s (limit {}s)",
                    elapsed.as_secs_f64(),
                    job.max_time.as_secs()
                ),
                Some(c),
            ),
            DoseOutcome::HardwareFault(msg) => self.emit(
                EventLevel::Error,
                format!("Pump {c} hardware fault: {msg}"),
                Some(c),
            ),
        }
    }

    fn log_pump_action(&mut self, job: &DoseJob, steps: u32) {
        let Some(exp) = self.state.active() else {
            return;
        };
        let action = PumpAction {
            pump_id: job.pump_id,
            direction: job.direction,
            steps,
            origin: job.origin,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.log_pump_action(Some(&exp.id), &action) {
            tracing::warn!(error = %e, pump = job.pump_id, "pump action not persisted");
        }
    }

    // ── LOG_TELEMETRY ────────────────────────────────────────────────────────

    fn log_telemetry(&mut self, exp: &Arc<ExperimentConfig>, reading: &SensorReading) {
        if reading.is_empty() {
            return;
        }
        let now = self.clock.now();
        let due = self
            .last_logged
            .is_none_or(|t| self.clock.since(t) >= exp.measurement_interval());
        if !due {
            return;
        }
        match self.store.log_telemetry(&exp.id, reading, Utc::now()) {
            Ok(()) => {
                self.last_logged = Some(now);
                tracing::debug!(experiment = %exp.id, samples = reading.len(), "telemetry logged");
                self.publish_quiet(Outbound::LoggedTelemetry(reading.clone()));
            }
            Err(e) => tracing::warn!(error = %e, "telemetry not persisted; will retry next cycle"),
        }
    }

    // ── PUBLISH ──────────────────────────────────────────────────────────────

    fn publish(&mut self, reading: SensorReading) -> Result<()> {
        self.bus
            .publish(&Outbound::Telemetry(reading))
            .wrap_err("publish telemetry")?;
        let status = self.status();
        self.bus
            .publish(&Outbound::Status(status))
            .wrap_err("publish status")?;
        Ok(())
    }

    fn publish_quiet(&mut self, msg: Outbound) {
        if let Err(e) = self.bus.publish(&msg) {
            tracing::warn!(topic = msg.topic(), error = %e, "publish failed");
        }
    }

    /// Operator-visible event: tracing, bus and store.
    fn emit(&mut self, level: EventLevel, message: String, compartment: Option<CompartmentId>) {
        match level {
            EventLevel::Info => tracing::info!(compartment, "{message}"),
            EventLevel::Warning => tracing::warn!(compartment, "{message}"),
            EventLevel::Error => tracing::error!(compartment, "{message}"),
        }
        let event = EventRecord {
            level,
            message,
            compartment,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.log_event(self.state.active_id(), &event) {
            tracing::debug!(error = %e, "event not persisted");
        }
        self.publish_quiet(Outbound::Event(event));
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    fn apply_command(&mut self, cmd: Command) {
        tracing::debug!(?cmd, "applying command");
        match cmd {
            Command::ManualDose {
                pump_id,
                direction,
                steps,
            } => self.manual_dose(pump_id, direction, steps),
            Command::AutoUpdate => {
                if let Err(e) = self.state.refresh(self.store.as_ref()) {
                    tracing::warn!(error = %e, "auto update could not refresh experiment");
                }
            }
            Command::ExperimentChanged { experiment_id } => {
                if self.state.active_id() == Some(experiment_id.as_str()) {
                    if let Err(e) = self.state.refresh(self.store.as_ref()) {
                        tracing::warn!(error = %e, "experiment change could not be applied");
                    }
                } else {
                    tracing::debug!(experiment = %experiment_id, "change to inactive experiment ignored");
                }
            }
            Command::CalibrationStart { compartment } => {
                if COMPARTMENTS.contains(&compartment) {
                    self.state.set_calibration_mode(Some(compartment));
                } else {
                    tracing::warn!(
                        error = %ReactorError::UnknownCompartment(compartment),
                        "calibration start dropped"
                    );
                }
            }
            Command::CalibrationStop => self.state.set_calibration_mode(None),
            Command::ReloadCalibration => self.reload_calibrations(),
        }
    }

    fn manual_dose(&mut self, pump_id: CompartmentId, direction: Direction, steps: Option<u32>) {
        if !self.pumps.has_pump(pump_id) {
            tracing::warn!(
                error = %ReactorError::UnknownCompartment(pump_id),
                "manual dose dropped"
            );
            return;
        }
        let active = self.state.active();
        let steps = steps
            .or(active.as_ref().map(|a| a.manual_dose_steps))
            .unwrap_or(self.cfg.fallback_manual_steps);
        if steps == 0 {
            tracing::warn!(pump = pump_id, "manual dose of 0 steps dropped");
            return;
        }
        let max_time = active
            .as_ref()
            .map_or(self.cfg.fallback_max_pump_time, |a| a.max_pump_time());
        tracing::info!(pump = pump_id, steps, %direction, "manual dose");
        self.submit(DoseJob {
            pump_id,
            direction,
            steps,
            max_time,
            origin: DoseOrigin::Manual,
        });
    }
}

impl<C: Clock> Drop for Reactor<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
