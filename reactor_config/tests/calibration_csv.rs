use std::fs::File;
use std::io::Write;

use chrono::{TimeZone, Utc};
use reactor_config::{
    CalibrationRow, append_calibration_csv, latest_per_compartment, load_calibration_csv,
};
use rstest::rstest;
use tempfile::tempdir;

fn row(compartment: u8, slope: f64, hour: u32) -> CalibrationRow {
    CalibrationRow {
        compartment,
        slope,
        intercept: 0.001,
        calibrated_at: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
    }
}

#[rstest]
fn loads_rows_with_exact_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calibrations.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "compartment,slope,intercept,calibrated_at").unwrap();
    writeln!(f, "1,-0.0581,0.0042,2025-03-01T09:30:00Z").unwrap();
    writeln!(f, "2,-0.0590,-0.0010,2025-03-01T09:45:00Z").unwrap();
    drop(f);

    let rows = load_calibration_csv(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].compartment, 1);
    assert!((rows[1].intercept + 0.001).abs() < 1e-12);
}

#[rstest]
fn rejects_bad_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calibrations.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "compartment,slope,offset,calibrated_at").unwrap();
    writeln!(f, "1,-0.0581,0.0042,2025-03-01T09:30:00Z").unwrap();
    drop(f);

    let err = load_calibration_csv(&path).expect_err("bad headers");
    assert!(format!("{err}").contains("calibration CSV must have headers"));
}

#[rstest]
#[case("1,0.0,0.0,2025-03-01T09:30:00Z", "slope must be finite and non-zero")]
#[case("1,NaN,0.0,2025-03-01T09:30:00Z", "slope must be finite and non-zero")]
#[case("1,-0.05,0.0,yesterday", "invalid CSV row 2")]
fn rejects_unusable_rows(#[case] line: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calibrations.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "compartment,slope,intercept,calibrated_at").unwrap();
    writeln!(f, "{line}").unwrap();
    drop(f);

    let err = load_calibration_csv(&path).expect_err("row should be rejected");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[rstest]
fn latest_row_per_compartment_wins() {
    let rows = vec![row(1, -0.050, 9), row(2, -0.058, 9), row(1, -0.057, 11), row(1, -0.040, 10)];
    let latest = latest_per_compartment(&rows);
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[&1].slope, -0.057);
    assert_eq!(latest[&2].slope, -0.058);
}

#[rstest]
fn append_writes_header_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calibrations.csv");
    append_calibration_csv(&path, &row(1, -0.059, 9)).unwrap();
    append_calibration_csv(&path, &row(2, -0.058, 10)).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches("compartment,slope").count(), 1);
    let rows = load_calibration_csv(&path).unwrap();
    assert_eq!(rows, vec![row(1, -0.059, 9), row(2, -0.058, 10)]);
}
