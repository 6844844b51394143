//! CSV result storage fed from a real (mock-hardware) acquisition run.

#![cfg(feature = "storage_csv")]

use jv_daq::acquisition::{
    AcquisitionEngine, AcquisitionEvent, AcquisitionParameters, AcquisitionRequest, ResultEvent,
    SubstrateGrid,
};
use jv_daq::hardware::mock::{MockHardwareFactory, MockSourceMeter};
use jv_daq::measurement::MeasurementSettings;
use jv_daq::storage::{CsvResultWriter, ResultSink};
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use tokio::sync::mpsc;

async fn tracked_run(num_tracking_points: u32) -> Vec<ResultEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = AcquisitionEngine::new(MockHardwareFactory::new(MockSourceMeter::new()), tx);
    let parameters = AcquisitionParameters {
        device_label: "cell".to_string(),
        delay_before_measurement: 0.0,
        tracking_enabled: true,
        num_tracking_points,
        operator: "ana".to_string(),
        ..Default::default()
    };
    engine
        .start(AcquisitionRequest {
            parameters,
            layout: SubstrateGrid::single_row(&["cell"]).unwrap(),
            settings: MeasurementSettings::default(),
        })
        .unwrap();
    engine.wait().await.unwrap();

    let mut results = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AcquisitionEvent::Result(result) = event {
            results.push(result);
        }
    }
    results
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    (header, rows)
}

#[tokio::test(start_paused = true)]
async fn test_sweeps_and_tracking_saved_to_separate_files() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("results");
    let mut writer = CsvResultWriter::new(&out);
    writer
        .begin(&AcquisitionParameters {
            operator: "ana".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut written: Vec<PathBuf> = Vec::new();
    for result in tracked_run(3).await {
        if let Some(path) = writer.write(&result).await.unwrap() {
            written.push(path);
        }
    }
    assert!(writer.flush().await.unwrap().is_empty());

    let names: Vec<_> = written.iter().map(|p| file_name(p)).collect();
    assert_eq!(names.len(), 3, "{names:?}");
    assert!(names[0].ends_with("_cell_forward.csv"));
    assert!(names[1].ends_with("_cell_backward.csv"));
    assert!(names[2].ends_with("_cell_tracking.csv"));
    assert!(written.iter().all(|p| p.starts_with(&out)));

    let (header, rows) = read_rows(&written[0]);
    assert_eq!(&header[..3], &["Device", "Acq Date", "Acq Time"]);
    assert_eq!(header.iter().position(|h| h == "V"), Some(10));
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], "cell_forward");
    assert_eq!(rows[1][0], "");
    assert_eq!(rows[0][10], "0");
    assert_eq!(rows[2][10], "1");
    let operator = header.iter().position(|h| h == "Operator").unwrap();
    assert_eq!(rows[0][operator], "ana");
    assert_eq!(rows[1][operator], "");

    let (_, rows) = read_rows(&written[2]);
    let time_step: Vec<f64> = rows.iter().map(|r| r[3].parse().unwrap()).collect();
    assert_eq!(time_step.len(), 3);
    assert_eq!(time_step[0], 0.0);
    assert!(time_step.windows(2).all(|w| w[1] > w[0]));
}

#[tokio::test(start_paused = true)]
async fn test_flush_saves_interrupted_tracking() {
    let dir = tempdir().unwrap();
    let mut writer = CsvResultWriter::new(dir.path());
    writer
        .begin(&AcquisitionParameters::default())
        .await
        .unwrap();

    // Drop the final, persisted tick as if the run had been stopped.
    let mut results = tracked_run(4).await;
    results.pop();
    for result in &results {
        writer.write(result).await.unwrap();
    }
    assert_eq!(writer.pending_devices(), 1);

    let flushed = writer.flush().await.unwrap();
    assert_eq!(flushed.len(), 1);
    assert!(file_name(&flushed[0]).ends_with("_cell_tracking.csv"));
    let (_, rows) = read_rows(&flushed[0]);
    assert_eq!(rows.len(), 3);
    assert_eq!(writer.pending_devices(), 0);
}
