//! Wiring: config mapping, hardware and store assembly, and the subcommands.

use chrono::Utc;
use eyre::{Result, WrapErr};
use reactor_config::Config;
use reactor_core::{
    COMPARTMENTS, Calibration, CommandError, CommandSender, ControllerCfg, DosingAlgorithm,
    ExperimentConfig, FileStore, JsonlBus, MemoryStore, PhEngine, Reactor, ReactorError,
    Store,
};
use reactor_traits::{Adc, CompartmentId, Pump};
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

/// Probe front-end plus one pump per configured compartment.
pub struct Hardware {
    pub adc: Box<dyn Adc + Send>,
    pub pumps: Vec<(CompartmentId, Box<dyn Pump + Send>)>,
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn open_hardware(cfg: &Config) -> Result<Hardware> {
    use reactor_hardware::{SimPlant, SimulatedAdc, SimulatedPump};

    let plant = SimPlant::new(COMPARTMENTS.into_iter().zip(cfg.sim.initial_ph));
    let pumps = COMPARTMENTS
        .into_iter()
        .map(|id| {
            let pump = SimulatedPump::new(id)
                .feeding(plant.clone(), cfg.sim.ph_per_step)
                .realtime(cfg.sim.realtime_pumps);
            (id, Box::new(pump) as Box<dyn Pump + Send>)
        })
        .collect();
    tracing::info!(initial_ph = ?cfg.sim.initial_ph, "using simulated hardware");
    Ok(Hardware {
        adc: Box::new(SimulatedAdc::new(plant)),
        pumps,
    })
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn open_hardware(cfg: &Config) -> Result<Hardware> {
    use reactor_hardware::{HardwareAdc, HardwarePump};

    let adc = HardwareAdc::new(cfg.hardware.i2c_bus, cfg.hardware.adc_address)
        .wrap_err("open ADS1115")?;
    let mut pumps: Vec<(CompartmentId, Box<dyn Pump + Send>)> = Vec::new();
    for (id, pins) in cfg.hardware.pump_pins() {
        let pump = HardwarePump::new(id, pins.step, pins.dir)
            .wrap_err_with(|| format!("open pump {id} pins"))?;
        pumps.push((id, Box::new(pump)));
    }
    Ok(Hardware {
        adc: Box::new(adc),
        pumps,
    })
}

/// File store when `[store] dir` is set, otherwise a throwaway in-memory one.
pub fn open_store(cfg: &Config) -> Result<Box<dyn Store>> {
    match &cfg.store.dir {
        Some(dir) => {
            let store = FileStore::open(dir)?;
            tracing::info!(dir = %dir.display(), "file store");
            Ok(Box::new(store))
        }
        None => {
            tracing::warn!("no [store] dir configured; using an in-memory store");
            Ok(Box::new(MemoryStore::new()))
        }
    }
}

/// Commands that change the store need somewhere to persist to.
pub fn require_persistent(cfg: &Config, what: &str) -> Result<()> {
    if cfg.store.dir.is_none() {
        return Err(ReactorError::Config(format!(
            "{what} needs a persistent store; set [store] dir in the config"
        ))
        .into());
    }
    Ok(())
}

/// Import the newest row per compartment from a calibration CSV.
pub fn seed_calibrations(store: &dyn Store, path: &Path) -> Result<usize> {
    let rows = reactor_config::load_calibration_csv(path)?;
    let latest = reactor_config::latest_per_compartment(&rows);
    for (compartment, row) in &latest {
        store
            .save_calibration(*compartment, &Calibration::from(row))
            .wrap_err_with(|| format!("save calibration for compartment {compartment}"))?;
    }
    tracing::info!(rows = rows.len(), compartments = latest.len(), "calibrations seeded");
    Ok(latest.len())
}

/// `reactor run`: build the loop, feed it stdin, and block until stopped.
pub fn run_service(cfg: &Config, store: Box<dyn Store>, exit_on_eof: bool) -> Result<()> {
    let hw = open_hardware(cfg)?;
    let mut builder = Reactor::builder()
        .with_config(ControllerCfg::from_config(&cfg.control_loop, &cfg.dosing))
        .with_dosing(DosingAlgorithm::from(&cfg.dosing))
        .with_adc(hw.adc)
        .with_store(store)
        .with_bus(JsonlBus::new(std::io::stdout()));
    for (id, pump) in hw.pumps {
        builder = builder.with_pump(id, pump);
    }
    let (mut reactor, commands) = builder.build()?;

    let stop = reactor.stop_handle();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received; stopping");
            stop.stop();
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    std::thread::Builder::new()
        .name("reactor-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            if read_commands(stdin.lock(), &commands) && exit_on_eof {
                tracing::info!("stdin closed; stopping");
                stop.stop();
            }
        })
        .wrap_err("spawn stdin reader")?;

    reactor.run()
}

/// Forward `<topic> <json>` lines to the loop. A bare topic means an empty object.
///
/// Returns `true` at end of input and `false` once the loop has gone away.
pub fn read_commands(input: impl BufRead, commands: &CommandSender) -> bool {
    for line in input.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                return true;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (topic, payload) = line
            .split_once(char::is_whitespace)
            .map_or((line, "{}"), |(t, p)| (t, p.trim()));
        if let Err(CommandError::Disconnected) = commands.submit(topic, payload) {
            tracing::debug!("control loop gone; stdin reader exiting");
            return false;
        }
    }
    true
}

/// `reactor self-check`: store reachability, calibration age, and one read per probe.
pub fn self_check(cfg: &Config, store: &dyn Store, json: bool) -> Result<()> {
    let experiment = store
        .get_active_experiment()
        .wrap_err("read active experiment")?;
    let calibrations = store
        .get_latest_calibrations()
        .wrap_err("read calibrations")?;
    let now = Utc::now();

    let mut hw = open_hardware(cfg)?;
    let engine = PhEngine::new(calibrations.clone());
    let timeout = Duration::from_millis(cfg.control_loop.sensor_timeout_ms);

    let mut probes = Vec::new();
    let mut failed = 0usize;
    for id in COMPARTMENTS {
        let stale = calibrations.get(&id).is_none_or(|c| c.is_stale(now));
        if stale {
            tracing::warn!(compartment = id, "calibration missing or older than 48 h");
        }
        let reading = hw
            .adc
            .read_voltage(id, timeout)
            .map_err(|e| reactor_core::hw_error::map_hw_error(e.as_ref()))
            .and_then(|v| engine.voltage_to_ph(id, v).map(|ph| (v, ph)));
        match &reading {
            Ok((v, ph)) => tracing::info!(compartment = id, volts = v, ph, "probe ok"),
            Err(e) => {
                failed += 1;
                tracing::error!(compartment = id, error = %e, "probe read failed");
            }
        }
        probes.push((id, engine.calibration(id), stale, reading));
    }

    if json {
        let probes: Vec<_> = probes
            .iter()
            .map(|(id, cal, stale, reading)| {
                serde_json::json!({
                    "compartment": id,
                    "slope": cal.slope,
                    "intercept": cal.intercept,
                    "calibrated_at": cal.calibrated_at,
                    "stale": stale,
                    "ph": reading.as_ref().ok().map(|r| r.1),
                    "error": reading.as_ref().err().map(ToString::to_string),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "active_experiment": experiment.as_ref().map(|e| e.id.as_str()),
                "probes": probes,
            })
        );
    } else {
        match &experiment {
            Some(e) => println!("active experiment: {} ({})", e.id, e.name),
            None => println!("active experiment: none"),
        }
        for (id, cal, stale, reading) in &probes {
            let age = match cal.calibrated_at {
                Some(t) if *stale => format!("stale, calibrated {}", t.to_rfc3339()),
                Some(t) => format!("calibrated {}", t.to_rfc3339()),
                None => "uncalibrated, ideal probe assumed".to_string(),
            };
            let ph = match reading {
                Ok((v, ph)) => format!("{v:.4} V = pH {ph:.2}"),
                Err(e) => format!("read failed: {e}"),
            };
            println!("compartment {id}: {ph} ({age})");
        }
    }

    if failed > 0 {
        return Err(ReactorError::Hardware(format!("{failed} probe(s) failed to read")).into());
    }
    if !json {
        println!("self-check ok");
    }
    Ok(())
}

/// `reactor experiment activate FILE`
pub fn activate_experiment(store: &dyn Store, file: &Path) -> Result<ExperimentConfig> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| ReactorError::Config(format!("read {}: {e}", file.display())))?;
    let parsed = reactor_config::load_experiment_toml(&text)
        .map_err(|e| ReactorError::Config(format!("{}: {e}", file.display())))?;
    let experiment = ExperimentConfig::from(parsed);
    store
        .activate_experiment(experiment.clone())
        .wrap_err_with(|| format!("activate experiment {}", experiment.id))?;
    tracing::info!(experiment = %experiment.id, "experiment activated");
    Ok(experiment)
}

/// `reactor calibrate`: solve the two-point line and persist it.
pub fn calibrate(
    store: &dyn Store,
    compartment: CompartmentId,
    (v1, ph1): (f64, f64),
    (v2, ph2): (f64, f64),
) -> Result<Calibration> {
    let cal = Calibration::from_two_points((v1, ph1), (v2, ph2))?.at(Utc::now());
    store
        .save_calibration(compartment, &cal)
        .wrap_err_with(|| format!("save calibration for compartment {compartment}"))?;
    tracing::info!(
        compartment,
        slope = cal.slope,
        intercept = cal.intercept,
        "calibration saved"
    );
    Ok(cal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::Command;
    use std::io::Cursor;

    #[test]
    fn stdin_lines_become_commands() {
        let (tx, rx) = reactor_core::bridge::channel();
        let input = "# comment\n\nreactor/control/pump/auto\nreactor/control/pump/manual {\"pump_id\": 2, \"steps\": 5}\nbogus/topic {}\n";
        assert!(read_commands(Cursor::new(input), &tx));
        let got = rx.drain();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], Command::AutoUpdate);
        assert!(matches!(got[1], Command::ManualDose { pump_id: 2, steps: Some(5), .. }));
    }

    #[test]
    fn reader_exits_when_loop_is_gone() {
        let (tx, rx) = reactor_core::bridge::channel();
        drop(rx);
        let input = "reactor/control/pump/auto\nreactor/control/pump/auto\n";
        assert!(!read_commands(Cursor::new(input), &tx));
    }

    #[test]
    fn calibrate_persists_to_store() {
        let store = MemoryStore::new();
        let cal = calibrate(&store, 2, (0.005, 7.0), (0.180, 4.0)).unwrap();
        assert!(cal.slope < 0.0);
        let saved = store.get_latest_calibrations().unwrap();
        assert_eq!(saved[&2].intercept, cal.intercept);
    }

    #[test]
    fn calibrate_rejects_equal_buffers() {
        let store = MemoryStore::new();
        let err = calibrate(&store, 1, (0.0, 7.0), (0.1, 7.0)).unwrap_err();
        assert_eq!(crate::error_fmt::exit_code_for_error(&err), 3);
    }
}
