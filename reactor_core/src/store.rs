//! Persistence seam: experiments, calibrations and the three append-only logs.
//!
//! The loop only ever sees `&dyn Store`. Two backends ship here:
//! [`MemoryStore`] for tests and dry runs, [`FileStore`] for a plain data
//! directory on disk. Every backend failure surfaces as
//! [`ReactorError::StoreUnavailable`] so the loop can tell "store down"
//! apart from bad data.

use chrono::{DateTime, Utc};
use reactor_traits::CompartmentId;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::atomic::write_atomic;
use crate::calibration::{Calibration, CalibrationSet};
use crate::error::ReactorError;
use crate::experiment::ExperimentConfig;
use crate::types::{EventRecord, PumpAction, SensorReading};

pub trait Store: Send {
    /// The experiment marked active, if any.
    fn get_active_experiment(&self) -> Result<Option<ExperimentConfig>, ReactorError>;

    /// Newest calibration per compartment.
    fn get_latest_calibrations(&self) -> Result<CalibrationSet, ReactorError>;

    fn log_telemetry(
        &self,
        experiment_id: &str,
        reading: &SensorReading,
        at: DateTime<Utc>,
    ) -> Result<(), ReactorError>;

    fn log_event(
        &self,
        experiment_id: Option<&str>,
        event: &EventRecord,
    ) -> Result<(), ReactorError>;

    fn log_pump_action(
        &self,
        experiment_id: Option<&str>,
        action: &PumpAction,
    ) -> Result<(), ReactorError>;

    /// Make `experiment` the only active one. Replaces any previous activation atomically.
    fn activate_experiment(&self, experiment: ExperimentConfig) -> Result<(), ReactorError>;

    fn save_calibration(
        &self,
        compartment: CompartmentId,
        calibration: &Calibration,
    ) -> Result<(), ReactorError>;
}

impl<T: Store + ?Sized> Store for Box<T> {
    fn get_active_experiment(&self) -> Result<Option<ExperimentConfig>, ReactorError> {
        (**self).get_active_experiment()
    }
    fn get_latest_calibrations(&self) -> Result<CalibrationSet, ReactorError> {
        (**self).get_latest_calibrations()
    }
    fn log_telemetry(
        &self,
        experiment_id: &str,
        reading: &SensorReading,
        at: DateTime<Utc>,
    ) -> Result<(), ReactorError> {
        (**self).log_telemetry(experiment_id, reading, at)
    }
    fn log_event(
        &self,
        experiment_id: Option<&str>,
        event: &EventRecord,
    ) -> Result<(), ReactorError> {
        (**self).log_event(experiment_id, event)
    }
    fn log_pump_action(
        &self,
        experiment_id: Option<&str>,
        action: &PumpAction,
    ) -> Result<(), ReactorError> {
        (**self).log_pump_action(experiment_id, action)
    }
    fn activate_experiment(&self, experiment: ExperimentConfig) -> Result<(), ReactorError> {
        (**self).activate_experiment(experiment)
    }
    fn save_calibration(
        &self,
        compartment: CompartmentId,
        calibration: &Calibration,
    ) -> Result<(), ReactorError> {
        (**self).save_calibration(compartment, calibration)
    }
}

fn unavailable(what: &str, e: impl std::fmt::Display) -> ReactorError {
    ReactorError::StoreUnavailable(format!("{what}: {e}"))
}

// ── MemoryStore ─────────────────────────────────────────────────────────────

/// A telemetry row as kept by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub experiment_id: String,
    pub reading: SensorReading,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    unavailable: bool,
    active: Option<ExperimentConfig>,
    calibrations: CalibrationSet,
    telemetry: Vec<TelemetryRecord>,
    events: Vec<(Option<String>, EventRecord)>,
    pump_actions: Vec<(Option<String>, PumpAction)>,
}

/// In-process store. Clones share state, so a test can keep a handle while the
/// loop owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while `false`, every call fails with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.lock_raw().unavailable = !available;
    }

    pub fn deactivate(&self) {
        self.lock_raw().active = None;
    }

    pub fn telemetry(&self) -> Vec<TelemetryRecord> {
        self.lock_raw().telemetry.clone()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.lock_raw()
            .events
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn pump_actions(&self) -> Vec<PumpAction> {
        self.lock_raw()
            .pump_actions
            .iter()
            .map(|(_, a)| a.clone())
            .collect()
    }

    fn lock_raw(&self) -> MutexGuard<'_, MemoryInner> {
        // a panicked test thread must not wedge the others
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, ReactorError> {
        let g = self.lock_raw();
        if g.unavailable {
            return Err(ReactorError::StoreUnavailable("memory store offline".into()));
        }
        Ok(g)
    }
}

impl Store for MemoryStore {
    fn get_active_experiment(&self) -> Result<Option<ExperimentConfig>, ReactorError> {
        Ok(self.lock()?.active.clone())
    }

    fn get_latest_calibrations(&self) -> Result<CalibrationSet, ReactorError> {
        Ok(self.lock()?.calibrations.clone())
    }

    fn log_telemetry(
        &self,
        experiment_id: &str,
        reading: &SensorReading,
        at: DateTime<Utc>,
    ) -> Result<(), ReactorError> {
        self.lock()?.telemetry.push(TelemetryRecord {
            experiment_id: experiment_id.to_owned(),
            reading: reading.clone(),
            timestamp: at,
        });
        Ok(())
    }

    fn log_event(
        &self,
        experiment_id: Option<&str>,
        event: &EventRecord,
    ) -> Result<(), ReactorError> {
        self.lock()?
            .events
            .push((experiment_id.map(str::to_owned), event.clone()));
        Ok(())
    }

    fn log_pump_action(
        &self,
        experiment_id: Option<&str>,
        action: &PumpAction,
    ) -> Result<(), ReactorError> {
        self.lock()?
            .pump_actions
            .push((experiment_id.map(str::to_owned), action.clone()));
        Ok(())
    }

    fn activate_experiment(&self, experiment: ExperimentConfig) -> Result<(), ReactorError> {
        self.lock()?.active = Some(experiment);
        Ok(())
    }

    fn save_calibration(
        &self,
        compartment: CompartmentId,
        calibration: &Calibration,
    ) -> Result<(), ReactorError> {
        calibration.check()?;
        self.lock()?.calibrations.insert(compartment, *calibration);
        Ok(())
    }
}

// ── FileStore ───────────────────────────────────────────────────────────────

const ACTIVE_FILE: &str = "experiment.toml";
const ARCHIVE_DIR: &str = "experiments";
const CALIBRATION_FILE: &str = "calibrations.csv";
const TELEMETRY_FILE: &str = "telemetry.jsonl";
const EVENTS_FILE: &str = "events.jsonl";
const PUMP_FILE: &str = "pump_actions.jsonl";

/// Store backed by a directory:
///
/// ```text
/// <dir>/experiment.toml        active experiment (absent = none)
/// <dir>/experiments/<id>.toml  every experiment ever activated
/// <dir>/calibrations.csv       append-only calibration history
/// <dir>/telemetry.jsonl
/// <dir>/events.jsonl
/// <dir>/pump_actions.jsonl
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

#[derive(Serialize)]
struct TelemetryLine<'a> {
    experiment_id: &'a str,
    timestamp: DateTime<Utc>,
    readings: &'a SensorReading,
}

#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    experiment_id: Option<&'a str>,
    #[serde(flatten)]
    record: &'a T,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ReactorError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(ARCHIVE_DIR))
            .map_err(|e| unavailable(&format!("create {}", dir.display()), e))?;
        tracing::debug!(dir = %dir.display(), "file store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn append_json(&self, name: &str, value: &impl Serialize) -> Result<(), ReactorError> {
        let mut line = serde_json::to_string(value)
            .map_err(|e| ReactorError::State(format!("serialize {name}: {e}")))?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
            .map_err(|e| unavailable(name, e))?;
        f.write_all(line.as_bytes())
            .map_err(|e| unavailable(name, e))
    }
}

impl Store for FileStore {
    fn get_active_experiment(&self) -> Result<Option<ExperimentConfig>, ReactorError> {
        let path = self.path(ACTIVE_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(ACTIVE_FILE, e)),
        };
        let exp = reactor_config::load_experiment_toml(&text)
            .map_err(|e| ReactorError::Config(format!("{ACTIVE_FILE}: {e}")))?;
        Ok(Some(exp.into()))
    }

    fn get_latest_calibrations(&self) -> Result<CalibrationSet, ReactorError> {
        let path = self.path(CALIBRATION_FILE);
        if !path.exists() {
            return Ok(CalibrationSet::new());
        }
        let rows = reactor_config::load_calibration_csv(&path)
            .map_err(|e| unavailable(CALIBRATION_FILE, e))?;
        Ok(reactor_config::latest_per_compartment(&rows)
            .iter()
            .map(|(c, row)| (*c, Calibration::from(row)))
            .collect())
    }

    fn log_telemetry(
        &self,
        experiment_id: &str,
        reading: &SensorReading,
        at: DateTime<Utc>,
    ) -> Result<(), ReactorError> {
        self.append_json(
            TELEMETRY_FILE,
            &TelemetryLine {
                experiment_id,
                timestamp: at,
                readings: reading,
            },
        )
    }

    fn log_event(
        &self,
        experiment_id: Option<&str>,
        event: &EventRecord,
    ) -> Result<(), ReactorError> {
        self.append_json(
            EVENTS_FILE,
            &Tagged {
                experiment_id,
                record: event,
            },
        )
    }

    fn log_pump_action(
        &self,
        experiment_id: Option<&str>,
        action: &PumpAction,
    ) -> Result<(), ReactorError> {
        self.append_json(
            PUMP_FILE,
            &Tagged {
                experiment_id,
                record: action,
            },
        )
    }

    fn activate_experiment(&self, experiment: ExperimentConfig) -> Result<(), ReactorError> {
        let text = reactor_config::ExperimentToml::from(&experiment)
            .to_toml_string()
            .map_err(|e| ReactorError::Config(e.to_string()))?;
        let archived = self
            .path(ARCHIVE_DIR)
            .join(format!("{}.toml", sanitize_id(&experiment.id)));
        write_atomic(&archived, text.as_bytes()).map_err(|e| unavailable("archive", e))?;
        // single rename: readers see the old or the new experiment, never neither
        write_atomic(&self.path(ACTIVE_FILE), text.as_bytes())
            .map_err(|e| unavailable(ACTIVE_FILE, e))?;
        tracing::info!(experiment = %experiment.id, "experiment activated");
        Ok(())
    }

    fn save_calibration(
        &self,
        compartment: CompartmentId,
        calibration: &Calibration,
    ) -> Result<(), ReactorError> {
        calibration.check()?;
        let row = reactor_config::CalibrationRow {
            compartment,
            slope: calibration.slope,
            intercept: calibration.intercept,
            calibrated_at: calibration.calibrated_at.unwrap_or_else(Utc::now),
        };
        reactor_config::append_calibration_csv(&self.path(CALIBRATION_FILE), &row)
            .map_err(|e| unavailable(CALIBRATION_FILE, e))
    }
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
