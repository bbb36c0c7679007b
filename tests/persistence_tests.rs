use std::path::PathBuf;

use gsrelay::store::*;
use gsrelay::telemetry::SERIES_KEYS;
use gsrelay::telemetry_log::*;
use gsrelay::*;

fn temp_log(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("gsrelay-{}-{}.csv", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn store_at(start_ms: u64) -> (ManualClock, MemoryStore) {
    let clock = ManualClock::new(start_ms);
    let store = MemoryStore::with_clock("F1", Box::new(clock.clone()));
    (clock, store)
}

#[test]
fn test_series_must_be_declared() {
    let (_, mut store) = store_at(0);

    assert_eq!(
        store.append("accel.x", 1.0),
        Err(StoreError::UnknownSeries("F1.accel.x".to_string()))
    );
    assert!(store.get_last("accel.x").is_err());

    store.declare_series("accel.x", DEFAULT_RETENTION_MS).unwrap();
    assert!(store.is_declared("accel.x"));
    assert_eq!(store.get_last("accel.x").unwrap(), None);
}

#[test]
fn test_store_assigned_timestamps_strictly_increase() {
    let (clock, mut store) = store_at(5_000);
    store.declare_series("gyro.z", DEFAULT_RETENTION_MS).unwrap();

    assert_eq!(store.append("gyro.z", 0.1).unwrap(), 5_000);
    assert_eq!(store.append("gyro.z", 0.2).unwrap(), 5_001);
    clock.advance(10);
    assert_eq!(store.append("gyro.z", 0.3).unwrap(), 5_010);

    assert_eq!(
        store.get_last("gyro.z").unwrap(),
        Some(Sample {
            timestamp: 5_010,
            value: 0.3
        })
    );
}

#[test]
fn test_explicit_timestamps_must_be_ordered() {
    let (_, mut store) = store_at(0);
    store.declare_series("mag.x", DEFAULT_RETENTION_MS).unwrap();

    store.append_with_timestamp("mag.x", 100, 1.0).unwrap();
    assert_eq!(
        store.append_with_timestamp("mag.x", 100, 2.0),
        Err(StoreError::OutOfOrder {
            key: "F1.mag.x".to_string(),
            timestamp: 100,
            last: 100,
        })
    );
    assert!(store.append_with_timestamp("mag.x", 50, 2.0).is_err());
    assert_eq!(store.get_last("mag.x").unwrap().unwrap().value, 1.0);
}

#[test]
fn test_append_reading_is_all_or_nothing() {
    let (clock, mut store) = store_at(1_000);
    for key in SERIES_KEYS.iter().filter(|key| **key != "gps.angle") {
        store.declare_series(key, DEFAULT_RETENTION_MS).unwrap();
    }
    let reading = TelemetryReading {
        accel_z: 9.81,
        gps_angle: 90.0,
        ..TelemetryReading::default()
    };

    assert_eq!(
        store.append_reading(&reading),
        Err(StoreError::UnknownSeries("F1.gps.angle".to_string()))
    );
    for key in SERIES_KEYS {
        assert_eq!(store.len(key), 0, "{key} written by a failed reading");
    }

    store.declare_series("gps.angle", DEFAULT_RETENTION_MS).unwrap();
    clock.advance(5);
    store.append_reading(&reading).unwrap();
    for key in SERIES_KEYS {
        assert_eq!(store.get_last(key).unwrap().unwrap().timestamp, 1_005);
    }
    assert_eq!(store.get_last("gps.angle").unwrap().unwrap().value, 90.0);
}

#[test]
fn test_retention_trims_old_samples() {
    let (_, mut store) = store_at(0);
    store.declare_series("gps.speed", 1_000).unwrap();

    store.append_with_timestamp("gps.speed", 100, 1.0).unwrap();
    store.append_with_timestamp("gps.speed", 500, 2.0).unwrap();
    assert_eq!(store.len("gps.speed"), 2);

    store.append_with_timestamp("gps.speed", 1_200, 3.0).unwrap();
    assert_eq!(store.len("gps.speed"), 2, "sample at 100 falls outside the window");

    // Redeclaring keeps existing data.
    store.declare_series("gps.speed", DEFAULT_RETENTION_MS).unwrap();
    assert_eq!(store.len("gps.speed"), 2);
}

#[test]
fn test_keys_are_namespaced_by_flight() {
    let clock = ManualClock::new(0);
    let mut first = MemoryStore::with_clock("F1", Box::new(clock.clone()));
    let second = MemoryStore::with_clock("F2", Box::new(clock));

    first.set(FREQUENCY_KEY, "915").unwrap();
    assert_eq!(first.get(FREQUENCY_KEY).unwrap().as_deref(), Some("915"));
    assert_eq!(second.get(FREQUENCY_KEY).unwrap(), None);
    assert!(!second.is_declared("bmp280.temp"));
}

#[test]
fn test_csv_log_header_and_rows() {
    let path = temp_log("csv-rows");
    let mut log = CsvLog::create(&path).unwrap();

    let reading = TelemetryReading {
        bmp280_temperature: -3.25,
        gps_angle: 270.5,
        timestamp: 77,
        ..TelemetryReading::default()
    };
    log.append(&reading).unwrap();
    log.append(&reading).unwrap();
    assert_eq!(log.rows(), 2);

    // Rows are on disk before close.
    let csv = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], SERIES_KEYS.join(","));
    assert_eq!(lines[1], csv_row(&reading));

    let row: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(row[0], "-3.25");
    assert_eq!(row[18], "270.5");
    assert_eq!(row[19], "77");
}

#[test]
fn test_csv_log_reopen_does_not_repeat_header() {
    let path = temp_log("csv-reopen");
    let reading = TelemetryReading::default();

    {
        let mut log = CsvLog::create(&path).unwrap();
        log.append(&reading).unwrap();
    }
    {
        let mut log = CsvLog::create(&path).unwrap();
        log.append(&reading).unwrap();
        log.close().unwrap();
    }

    let csv = std::fs::read_to_string(&path).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert_eq!(csv.matches("bmp280.temp").count(), 1);
}

#[test]
fn test_csv_log_rejects_writes_after_close() {
    let path = temp_log("csv-closed");
    let mut log = CsvLog::create(&path).unwrap();

    log.close().unwrap();
    log.close().unwrap();
    assert!(matches!(log.append(&TelemetryReading::default()), Err(LogError::Closed)));
    assert_eq!(log.path(), path.as_path());
}
