mod common;

use common::{WAIT, experiment, volts};
use reactor_core::mocks::{RecordingBus, ScriptedAdc, ScriptedPump};
use reactor_core::{Calibration, FileStore, Reactor, ReactorError, Store};
use rstest::rstest;
use std::fs;

#[test]
fn loop_persists_through_the_file_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStore::open(tmp.path().join("data")).unwrap();
    store.activate_experiment(experiment("exp-file")).unwrap();
    store
        .save_calibration(1, &Calibration::default().at(chrono::Utc::now()))
        .unwrap();

    let adc = ScriptedAdc::new();
    adc.set_voltage(1, volts(6.5));
    adc.set_voltage(2, volts(7.1));
    adc.set_voltage(3, volts(7.1));
    let pump = ScriptedPump::new();
    let (mut reactor, _tx) = Reactor::builder()
        .with_adc(adc)
        .with_pump(1, pump.clone())
        .with_store(store.clone())
        .with_bus(RecordingBus::new())
        .build()
        .unwrap();

    reactor.start().unwrap();
    assert_eq!(reactor.experiment().active_id(), Some("exp-file"));
    reactor.run_cycle().unwrap();
    assert!(reactor.wait_idle(WAIT));
    assert_eq!(pump.calls().len(), 1);

    let dir = store.dir();
    let telemetry = fs::read_to_string(dir.join("telemetry.jsonl")).unwrap();
    let line: serde_json::Value = serde_json::from_str(telemetry.trim()).unwrap();
    assert_eq!(line["experiment_id"], "exp-file");
    assert_eq!(line["readings"]["1"], 6.5);

    let pumps = fs::read_to_string(dir.join("pump_actions.jsonl")).unwrap();
    let action: serde_json::Value = serde_json::from_str(pumps.trim()).unwrap();
    assert_eq!(action["pump_id"], 1);
    assert_eq!(action["steps"], 15);
    assert_eq!(action["experiment_id"], "exp-file");

    let events = fs::read_to_string(dir.join("events.jsonl")).unwrap();
    assert!(events.contains("\"INFO\""));
}

#[rstest]
#[case::flat(0.0, 0.0)]
#[case::nan_slope(f64::NAN, 0.0)]
#[case::infinite_intercept(-0.059, f64::INFINITY)]
fn unusable_calibration_is_refused_and_history_stays_readable(
    #[case] slope: f64,
    #[case] intercept: f64,
) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStore::open(tmp.path()).unwrap();
    store
        .save_calibration(1, &Calibration::new(-0.058, 0.004).at(chrono::Utc::now()))
        .unwrap();

    let err = store
        .save_calibration(2, &Calibration::new(slope, intercept))
        .unwrap_err();
    assert!(matches!(err, ReactorError::Config(_)), "got {err:?}");

    let set = store.get_latest_calibrations().unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set[&1].slope, -0.058);
    let csv = fs::read_to_string(tmp.path().join("calibrations.csv")).unwrap();
    assert_eq!(csv.lines().count(), 2);
}
