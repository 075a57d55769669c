use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use evflow::config::PipelineConfig;
use evflow::output::{ENCODER_FILE, PROCESSED_FILE, REPORT_FILE, SCALER_FILE};
use evflow::pipeline::process_file;
use evflow::table::{COLUMNS, ProcessedRow, read_rows};
use evflow::transform::{MinMaxScaler, StationEncoder};
use evflow::verify::verify;
use evflow::windows::build_windows;

const SESSIONS: &str = "\
Station Name,Port Number,User ID,Start Date,End Date,Charging Time (hh:mm:ss),Total Duration (hh:mm:ss),Energy (kWh),Driver Postal Code
A,1,u1,2020-01-06 10:00,2020-01-06 10:30,0:15:00,0:30:00,2.0,94301
A,2,u2,2020-01-06 10:10,2020-01-06 10:45,0:30:00,0:35:00,3.0,94301
B,1,u3,2020-01-06 09:00,2020-01-06 10:00,0:45:00,1:00:00,6.0,94303
B,1,u4,2020-01-06 11:00,2020-01-06 11:00,0:00:00,0:00:00,1.0,94303
C,1,u5,not a date,2020-01-06 11:00,0:10:00,0:10:00,1.0,94303
D,1,u6,2020-01-06 10:00,2020-01-06 11:00,0:10:00,0:10:00,,94303
";

fn write_input(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("sessions.csv");
    fs::write(&path, SESSIONS).unwrap();
    path
}

fn rows_for<'a>(rows: &'a [ProcessedRow], station: &str) -> Vec<&'a ProcessedRow> {
    rows.iter().filter(|r| r.station_name == station).collect()
}

#[test]
fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path());
    let out = dir.path().join("out");

    let report = process_file(&input, &out, &PipelineConfig::default()).unwrap();

    assert_eq!(report.normalize.raw_rows, 6);
    assert_eq!(report.normalize.dropped_missing_energy, 1);
    assert_eq!(report.normalize.dropped_bad_timestamp, 1);
    assert_eq!(report.normalize.fallback_sessions, 1);
    assert_eq!(report.pii_columns_dropped.len(), 2);
    // A: 10:00..10:45, B: 09:00..11:15 (fallback charge end), minus one tail row each.
    assert_eq!(report.tail_rows_dropped, 2);
    assert_eq!(report.final_rows, 3 + 9);

    for name in [PROCESSED_FILE, SCALER_FILE, ENCODER_FILE, REPORT_FILE] {
        assert!(out.join(name).exists(), "missing {name}");
    }
    let leftovers: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());

    let text = fs::read_to_string(out.join(PROCESSED_FILE)).unwrap();
    assert_eq!(text.lines().next().unwrap(), COLUMNS.join(","));

    let rows = read_rows(&out.join(PROCESSED_FILE)).unwrap();
    assert_eq!(rows.len(), report.final_rows);

    let encoder: StationEncoder =
        serde_json::from_str(&fs::read_to_string(out.join(ENCODER_FILE)).unwrap()).unwrap();
    assert_eq!(encoder.encode("A"), Some(0));
    assert_eq!(encoder.encode("B"), Some(1));
    assert!(rows.iter().all(|r| encoder.decode(r.station_id_encoded) == Some(r.station_name.as_str())));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(REPORT_FILE)).unwrap()).unwrap();
    assert_eq!(written["final_rows"], 12);
    assert_eq!(written["fallback_sessions"], 1);
}

#[test]
fn test_reconstructed_station_state() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path());
    let out = dir.path().join("out");
    process_file(&input, &out, &PipelineConfig::default()).unwrap();

    let rows = read_rows(&out.join(PROCESSED_FILE)).unwrap();
    let scaler: MinMaxScaler =
        serde_json::from_str(&fs::read_to_string(out.join(SCALER_FILE)).unwrap()).unwrap();

    let a = rows_for(&rows, "A");
    let stamps: Vec<String> = a.iter().map(|r| r.timestamp.format("%H:%M").to_string()).collect();
    assert_eq!(stamps, ["10:00", "10:15", "10:30"]);

    // 10:00: A charging at 8 kW. 10:15: B charging at 6 kW, both plugged in.
    let energy: Vec<f64> = a
        .iter()
        .map(|r| scaler.inverse_named("energy_kwh", r.energy_kwh).unwrap())
        .collect();
    assert_relative_eq!(energy[0], 2.0, epsilon = 1e-9);
    assert_relative_eq!(energy[1], 1.5, epsilon = 1e-9);

    let ports: Vec<f64> = a
        .iter()
        .map(|r| scaler.inverse_named("available_ports", r.available_ports).unwrap())
        .collect();
    assert_relative_eq!(ports[0], 1.0, epsilon = 1e-9);
    assert_relative_eq!(ports[1], 0.0, epsilon = 1e-9);
    assert_relative_eq!(ports[2], 1.0, epsilon = 1e-9);

    // Targets are the next row's unscaled values.
    assert_relative_eq!(a[0].future_energy, 1.5, epsilon = 1e-9);
    assert_eq!(a[1].future_available_ports, 1);
    assert_eq!(a[2].future_available_ports, 2);

    for station in ["A", "B"] {
        let capacity = if station == "A" { 2.0 } else { 1.0 };
        for r in rows_for(&rows, station) {
            let available = scaler.inverse_named("available_ports", r.available_ports).unwrap();
            assert!((0.0..=capacity).contains(&available.round()));
            assert!(f64::from(r.future_available_ports) <= capacity);
            assert!(r.future_energy >= 0.0);
        }
    }

    // The last grid point of each station has no target and is absent.
    let b = rows_for(&rows, "B");
    assert_eq!(b.last().unwrap().timestamp.format("%H:%M").to_string(), "11:00");

    for r in &rows {
        for v in r.scaled_values() {
            assert!((0.0..=1.0 + 1e-12).contains(&v), "{v} out of range");
        }
    }
}

#[test]
fn test_runs_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path());
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    process_file(&input, &first, &PipelineConfig::default()).unwrap();
    let config = PipelineConfig {
        threads: Some(3),
        ..Default::default()
    };
    process_file(&input, &second, &config).unwrap();

    for name in [PROCESSED_FILE, SCALER_FILE, ENCODER_FILE, REPORT_FILE] {
        assert_eq!(
            fs::read(first.join(name)).unwrap(),
            fs::read(second.join(name)).unwrap(),
            "{name} differs"
        );
    }
}

#[test]
fn test_missing_input_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let err = process_file(&dir.path().join("absent.csv"), &out, &PipelineConfig::default())
        .unwrap_err();

    assert!(format!("{err:#}").contains("pipeline stage 'load' failed"));
    assert!(!out.join(PROCESSED_FILE).exists());
    assert!(!out.join(SCALER_FILE).exists());
}

#[test]
fn test_failed_run_keeps_previous_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path());
    let out = dir.path().join("out");
    process_file(&input, &out, &PipelineConfig::default()).unwrap();
    let before = fs::read(out.join(PROCESSED_FILE)).unwrap();

    let empty = dir.path().join("empty.csv");
    fs::write(&empty, SESSIONS.lines().next().unwrap()).unwrap();
    assert!(process_file(&empty, &out, &PipelineConfig::default()).is_err());

    assert_eq!(fs::read(out.join(PROCESSED_FILE)).unwrap(), before);
}

#[test]
fn test_processed_table_feeds_verification_and_windows() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path());
    let out = dir.path().join("out");
    process_file(&input, &out, &PipelineConfig::default()).unwrap();

    let report = verify(&out.join(PROCESSED_FILE)).unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings);
    assert_eq!(report.rows, 12);

    let rows = read_rows(&out.join(PROCESSED_FILE)).unwrap();
    let windows = build_windows(&rows, 4);
    // A has 3 rows (no window), B has 9 rows (5 windows).
    assert_eq!(windows.len(), 5);
    assert!(windows.iter().all(|w| w.station == "B" && w.features.len() == 4));
}
