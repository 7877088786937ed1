//! File Storage Tests
//!
//! Runs sessions through the engine with the file-backed provider and checks
//! the on-disk layout, CSV contents and the session manifest.

use eis_analytics::engine::SessionEngine;
use eis_analytics::storage::{FileStorageProvider, SessionManifest};
use eis_analytics::types::{Sample, SessionMeta, SessionStatus};
use eis_analytics::EngineConfig;
use std::fs;
use std::path::Path;

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn session_directory_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = SessionEngine::new(EngineConfig::default(), FileStorageProvider::new(tmp.path()));

    engine
        .start_session(SessionMeta::new("B07", "Test_2", 35, 0.05, 0.5, 25.0).with_source("35%.csv", 3))
        .unwrap();
    let dir = engine.snapshot().session_directory.unwrap();
    assert_eq!(dir, tmp.path().join("B07").join("Test_2").join("35%"));

    let started = SessionManifest::load(&dir).unwrap();
    assert_eq!(started.status, SessionStatus::InProgress);
    assert!(started.completed_at.is_none());
    assert_eq!(started.meta.file_name, "35%.csv");

    engine.push_sample(Sample::new(1000.0, 0.02, 0.003, 3.70, 25.0, 3.0, 1)).unwrap();
    // Resistance far above the default bound: rejected, stored and recorded
    engine.push_sample(Sample::new(500.0, 2000.0, 0.003, 3.70, 25.0, 3.0, 2)).unwrap();
    // Voltage step and temperature jump
    engine.push_sample(Sample::new(250.0, 0.02, 0.003, 3.90, 29.0, 3.0, 3)).unwrap();
    // Rejected by validation, never stored as a sample
    let _ = engine.push_sample(Sample::new(-1.0, 0.02, 0.003, 3.90, 29.0, 3.0, 4));
    engine.end_session().unwrap();

    let samples = read_lines(&dir.join("samples.csv"));
    assert_eq!(
        samples[0],
        "RowIndex,FrequencyHz,R_ohm,X_ohm,V,T_degC,Range_ohm,Impedance,CapturedAtUtc"
    );
    assert_eq!(samples.len(), 4);
    assert!(samples[2].starts_with("2,500,2000,"));

    let rejects = read_lines(&dir.join("rejects.csv"));
    assert_eq!(rejects[0], "Timestamp,Reason,RawData");
    assert_eq!(rejects.len(), 3);
    assert!(rejects[1].contains("R_ohm out of bounds"));
    assert!(rejects[2].contains("Invalid FrequencyHz"));

    let events = read_lines(&dir.join("analytics_events.csv"));
    assert_eq!(events[0], "Timestamp,AlertType,Message,Value,Threshold");
    let kinds: Vec<&str> = events[1..]
        .iter()
        .map(|line| line.split(',').nth(1).unwrap_or_default())
        .collect();
    assert!(kinds.contains(&"ResistanceOutOfBounds"));
    assert!(kinds.contains(&"TemperatureSpike"));
    assert!(kinds.contains(&"VoltageSpike"));

    let manifest = SessionManifest::load(&dir).unwrap();
    assert_eq!(manifest.status, SessionStatus::Completed);
    assert!(manifest.completed_at.is_some());
    assert_eq!(manifest.sample_count, 3);
    assert_eq!(manifest.rejected_count, 2);
    assert_eq!(manifest.event_count as usize, events.len() - 1);
}

#[test]
fn restarting_same_session_starts_fresh_files() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = SessionEngine::new(EngineConfig::default(), FileStorageProvider::new(tmp.path()));
    let meta = SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 25.0);

    engine.start_session(meta.clone()).unwrap();
    engine.push_sample(Sample::new(1000.0, 0.02, 0.003, 3.7, 25.0, 3.0, 1)).unwrap();
    engine.end_session().unwrap();

    engine.start_session(meta).unwrap();
    engine.end_session().unwrap();

    let dir = tmp.path().join("B01/Test_1/50%");
    assert_eq!(read_lines(&dir.join("samples.csv")).len(), 1);
    assert_eq!(SessionManifest::load(&dir).unwrap().sample_count, 0);
}

#[test]
fn restart_while_active_does_not_leak_replaced_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = SessionEngine::new(EngineConfig::default(), FileStorageProvider::new(tmp.path()));
    let meta = SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 25.0);

    engine.start_session(meta.clone()).unwrap();
    for row in 1..=3 {
        engine
            .push_sample(Sample::new(1000.0 / row as f64, 0.02, 0.003, 3.7, 25.0, 3.0, row))
            .unwrap();
    }

    // Same battery, test and SoC while the first session is still active
    engine.start_session(meta).unwrap();
    engine.push_sample(Sample::new(10.0, 0.02, 0.003, 3.7, 25.0, 3.0, 99)).unwrap();
    engine.end_session().unwrap();

    let dir = tmp.path().join("B01/Test_1/50%");
    let samples = read_lines(&dir.join("samples.csv"));
    assert_eq!(samples.len(), 2, "got: {samples:?}");
    assert!(samples[1].starts_with("99,"));

    let manifest = SessionManifest::load(&dir).unwrap();
    assert_eq!(manifest.status, SessionStatus::Completed);
    assert_eq!(manifest.sample_count, 1);
}

#[test]
fn unwritable_root_fails_start_with_storage_error() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not_a_dir");
    fs::write(&blocker, "file in the way").unwrap();

    let engine = SessionEngine::new(EngineConfig::default(), FileStorageProvider::new(&blocker));
    let err = engine
        .start_session(SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 25.0))
        .unwrap_err();
    assert_eq!(err.kind(), eis_analytics::ErrorKind::Storage);
}
