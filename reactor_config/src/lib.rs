#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration parsing for the reactor controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `ExperimentToml` is the on-disk form of an experiment; it is validated
//!   here and converted into the core's typed experiment config.
//! - Calibration CSV loader enforces headers and rejects unusable slopes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Calibration CSV schema.
///
/// Expected headers:
/// compartment,slope,intercept,calibrated_at
///
/// Example:
/// compartment,slope,intercept,calibrated_at
/// 1,-0.0581,0.0042,2025-03-01T09:30:00Z
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct CalibrationRow {
    pub compartment: u8,
    /// volts per pH unit at 25 °C
    pub slope: f64,
    /// volts at pH 7
    pub intercept: f64,
    pub calibrated_at: DateTime<Utc>,
}

pub const CALIBRATION_HEADERS: [&str; 4] = ["compartment", "slope", "intercept", "calibrated_at"];

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoopCfg {
    /// Pause between control cycles
    pub cycle_ms: u64,
    /// Pause after a failed cycle before retrying
    pub recovery_ms: u64,
    /// Per-read ADC timeout
    pub sensor_timeout_ms: u64,
    /// Consecutive store failures before status reports "degraded"
    pub degraded_after_failures: u32,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            cycle_ms: 1000,
            recovery_ms: 5000,
            sensor_timeout_ms: 200,
            degraded_after_failures: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DosingCfg {
    pub gain_steps_per_ph: f64,
    pub min_dose_steps: u32,
    /// Measured for the pump + tubing combination: steps run / ml collected
    pub steps_per_ml: f64,
    /// Manual dose size when no experiment is active and the command omits steps
    pub fallback_manual_steps: u32,
    /// Cutoff for manual doses when no experiment is active
    pub fallback_max_pump_time_sec: u32,
}

impl Default for DosingCfg {
    fn default() -> Self {
        Self {
            gain_steps_per_ph: 50.0,
            min_dose_steps: 10,
            steps_per_ml: 100.0,
            fallback_manual_steps: 50,
            fallback_max_pump_time_sec: 30,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StoreCfg {
    /// Directory of the file-backed store. Absent = in-memory store.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PumpPins {
    pub step: u8,
    pub dir: u8,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Hardware {
    pub i2c_bus: u8,
    pub adc_address: u16,
    /// Pump pins keyed by compartment ("1", "2", "3")
    pub pumps: BTreeMap<String, PumpPins>,
}

impl Default for Hardware {
    fn default() -> Self {
        let pumps = [("1", 17, 27), ("2", 22, 23), ("3", 24, 25)]
            .into_iter()
            .map(|(id, step, dir)| (id.to_string(), PumpPins { step, dir }))
            .collect();
        Self {
            i2c_bus: 1,
            adc_address: 0x48,
            pumps,
        }
    }
}

impl Hardware {
    /// Pump pins with parsed compartment ids; entries with bad keys are skipped
    /// (validate() rejects them up front).
    pub fn pump_pins(&self) -> Vec<(u8, PumpPins)> {
        self.pumps
            .iter()
            .filter_map(|(k, p)| k.parse::<u8>().ok().map(|id| (id, *p)))
            .collect()
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimCfg {
    /// Starting pH of each simulated compartment
    pub initial_ph: [f64; 3],
    /// pH rise per forward pump step
    pub ph_per_step: f64,
    /// Block for the estimated dose time like real hardware
    pub realtime_pumps: bool,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            initial_ph: [7.0, 7.0, 7.0],
            ph_per_step: 0.002,
            realtime_pumps: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default, rename = "loop")]
    pub control_loop: LoopCfg,
    #[serde(default)]
    pub dosing: DosingCfg,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub hardware: Hardware,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub sim: SimCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Loop
        if self.control_loop.cycle_ms == 0 {
            eyre::bail!("loop.cycle_ms must be >= 1");
        }
        if self.control_loop.cycle_ms > 60 * 1000 {
            eyre::bail!("loop.cycle_ms is unreasonably large (>1min)");
        }
        if self.control_loop.recovery_ms == 0 {
            eyre::bail!("loop.recovery_ms must be >= 1");
        }
        if self.control_loop.sensor_timeout_ms == 0 {
            eyre::bail!("loop.sensor_timeout_ms must be >= 1");
        }
        if self.control_loop.degraded_after_failures == 0 {
            eyre::bail!("loop.degraded_after_failures must be >= 1");
        }

        // Dosing
        if !(self.dosing.gain_steps_per_ph.is_finite() && self.dosing.gain_steps_per_ph > 0.0) {
            eyre::bail!("dosing.gain_steps_per_ph must be > 0");
        }
        if !(self.dosing.steps_per_ml.is_finite() && self.dosing.steps_per_ml > 0.0) {
            eyre::bail!("dosing.steps_per_ml must be > 0");
        }
        if self.dosing.fallback_manual_steps == 0 {
            eyre::bail!("dosing.fallback_manual_steps must be >= 1");
        }
        if self.dosing.fallback_max_pump_time_sec == 0 {
            eyre::bail!("dosing.fallback_max_pump_time_sec must be >= 1");
        }

        // Hardware
        for key in self.hardware.pumps.keys() {
            match key.parse::<u8>() {
                Ok(1..=3) => {}
                _ => eyre::bail!("hardware.pumps key {key:?} is not a compartment (1..=3)"),
            }
        }

        // Sim
        if self.sim.initial_ph.iter().any(|p| !(0.0..=14.0).contains(p)) {
            eyre::bail!("sim.initial_ph values must be in [0, 14]");
        }

        Ok(())
    }
}

/// Acceptable pH band for one compartment.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct BandToml {
    pub min_ph: f64,
    pub max_ph: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct CompartmentsToml {
    pub c1: BandToml,
    pub c2: BandToml,
    pub c3: BandToml,
}

/// On-disk experiment definition.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExperimentToml {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_interval_mins")]
    pub measurement_interval_mins: u32,
    pub max_pump_time_sec: u32,
    pub mixing_cooldown_sec: u32,
    pub manual_dose_steps: u32,
    pub compartments: CompartmentsToml,
}

fn default_interval_mins() -> u32 {
    1
}

pub fn load_experiment_toml(s: &str) -> eyre::Result<ExperimentToml> {
    let exp: ExperimentToml =
        toml::from_str(s).map_err(|e| eyre::eyre!("parse experiment TOML: {e}"))?;
    exp.validate()?;
    Ok(exp)
}

impl ExperimentToml {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.id.trim().is_empty() {
            eyre::bail!("experiment.id must not be empty");
        }
        if self.measurement_interval_mins == 0 {
            eyre::bail!("experiment.measurement_interval_mins must be >= 1");
        }
        if self.max_pump_time_sec == 0 {
            eyre::bail!("experiment.max_pump_time_sec must be >= 1");
        }
        if self.manual_dose_steps == 0 {
            eyre::bail!("experiment.manual_dose_steps must be >= 1");
        }
        let bands = [
            ("c1", self.compartments.c1),
            ("c2", self.compartments.c2),
            ("c3", self.compartments.c3),
        ];
        for (name, band) in bands {
            if !(band.min_ph.is_finite() && band.max_ph.is_finite()) {
                eyre::bail!("compartments.{name} pH limits must be finite");
            }
            if !(0.0..=14.0).contains(&band.min_ph) || !(0.0..=14.0).contains(&band.max_ph) {
                eyre::bail!("compartments.{name} pH limits must be in [0, 14]");
            }
            if band.min_ph > band.max_ph {
                eyre::bail!("compartments.{name}.min_ph must be <= max_ph");
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> eyre::Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre::eyre!("serialize experiment: {e}"))
    }
}

impl CalibrationRow {
    pub fn check(&self) -> eyre::Result<()> {
        if !self.slope.is_finite() || self.slope == 0.0 {
            eyre::bail!("slope must be finite and non-zero");
        }
        if !self.intercept.is_finite() {
            eyre::bail!("intercept must be finite");
        }
        Ok(())
    }
}

/// Load every row of a calibration CSV, enforcing exact headers.
pub fn load_calibration_csv(path: &Path) -> eyre::Result<Vec<CalibrationRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != CALIBRATION_HEADERS {
        eyre::bail!(
            "calibration CSV must have headers '{}', got: {}",
            CALIBRATION_HEADERS.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => {
                row.check()
                    .map_err(|e| eyre::eyre!("CSV row {}: {e}", idx + 2))?;
                rows.push(row);
            }
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    Ok(rows)
}

/// Newest row per compartment (by `calibrated_at`; later rows win ties).
pub fn latest_per_compartment(rows: &[CalibrationRow]) -> BTreeMap<u8, CalibrationRow> {
    let mut out: BTreeMap<u8, CalibrationRow> = BTreeMap::new();
    for row in rows {
        match out.get(&row.compartment) {
            Some(prev) if prev.calibrated_at > row.calibrated_at => {}
            _ => {
                out.insert(row.compartment, *row);
            }
        }
    }
    out
}

/// Append one row, writing headers first when the file is new or empty.
///
/// Rows the loader would refuse are rejected before the file is touched.
pub fn append_calibration_csv(path: &Path, row: &CalibrationRow) -> eyre::Result<()> {
    row.check()?;
    let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?} for append: {}", path, e))?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    wtr.serialize(row)
        .map_err(|e| eyre::eyre!("write calibration row: {e}"))?;
    wtr.flush()?;
    Ok(())
}
