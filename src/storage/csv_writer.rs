//! CSV result writer.
//!
//! One file per persisted result: the record(s) and curve side by side, with
//! the acquisition parameters echoed on the first row.
//!
//! ```text
//! Device,Acq Date,Acq Time,Time step,Voc,Jsc,VPP,MPP,FF,effic,V,J,Acq Min Voltage,...
//! S0_forward,2024-03-07,14-05-09,0,0.75,2.2,0.6,1.3,79.1,0.55,0,2.2,0,...
//! ,,,,,,,,,,0.5,2.1,,...
//! ```
//!
//! Tracking ticks arrive with `persist = false` and are buffered per device;
//! the final, persisted tick writes all of them to one `..._tracking.csv` file.

use async_trait::async_trait;
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::ResultSink;
use crate::acquisition::{AcquisitionParameters, ResultEvent};
use crate::error::DaqError;
use crate::measurement::{JvCurve, PerformanceRecord};

/// Fixed leading columns of every results file.
pub const RESULT_COLUMNS: [&str; 12] = [
    "Device", "Acq Date", "Acq Time", "Time step", "Voc", "Jsc", "VPP", "MPP", "FF", "effic", "V",
    "J",
];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H-%M-%S";

#[derive(Debug)]
struct PendingTrack {
    records: Vec<PerformanceRecord>,
    curve: JvCurve,
}

/// Writes persisted results to CSV files in one directory.
pub struct CsvResultWriter {
    dir: PathBuf,
    parameters: AcquisitionParameters,
    pending: BTreeMap<String, PendingTrack>,
}

impl CsvResultWriter {
    /// Writer targeting `dir`; created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            parameters: AcquisitionParameters::default(),
            pending: BTreeMap::new(),
        }
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of devices with buffered, unpersisted records
    pub fn pending_devices(&self) -> usize {
        self.pending.len()
    }

    fn write_file(
        &self,
        device_id: &str,
        records: &[PerformanceRecord],
        curve: &JvCurve,
    ) -> Result<PathBuf, DaqError> {
        let suffix = if records.len() > 1 { "_tracking" } else { "" };
        let file_name = format!(
            "{}_{}{}.csv",
            Local::now().format("%Y%m%d-%H%M%S"),
            sanitize(device_id),
            suffix
        );
        let path = self.dir.join(file_name);
        let rows = result_rows(device_id, records, curve, &self.parameters);
        write_rows(&self.dir, &path, &rows)?;
        info!(
            device = %device_id,
            records = records.len(),
            "Saved results to '{}'",
            path.display()
        );
        Ok(path)
    }
}

#[async_trait]
impl ResultSink for CsvResultWriter {
    async fn begin(&mut self, parameters: &AcquisitionParameters) -> Result<(), DaqError> {
        self.parameters = parameters.clone();
        self.pending.clear();
        Ok(())
    }

    async fn write(&mut self, result: &ResultEvent) -> Result<Option<PathBuf>, DaqError> {
        let mut records = self
            .pending
            .remove(&result.device_id)
            .map(|p| p.records)
            .unwrap_or_default();
        records.push(result.record);

        if !result.persist {
            debug!(device = %result.device_id, buffered = records.len(), "Buffering result");
            self.pending.insert(
                result.device_id.clone(),
                PendingTrack {
                    records,
                    curve: result.curve.clone(),
                },
            );
            return Ok(None);
        }

        self.write_file(&result.device_id, &records, &result.curve)
            .map(Some)
    }

    async fn flush(&mut self) -> Result<Vec<PathBuf>, DaqError> {
        let pending = std::mem::take(&mut self.pending);
        let mut written = Vec::with_capacity(pending.len());
        for (device_id, track) in pending {
            written.push(self.write_file(&device_id, &track.records, &track.curve)?);
        }
        Ok(written)
    }
}

/// Build the CSV rows (header included) for one device.
///
/// Rows span the longer of `records` and `curve`. The device id and the echoed
/// parameters appear on the first data row only.
pub fn result_rows(
    device_id: &str,
    records: &[PerformanceRecord],
    curve: &JvCurve,
    parameters: &AcquisitionParameters,
) -> Vec<Vec<String>> {
    let echo = parameters.echo_columns();
    let width = RESULT_COLUMNS.len() + echo.len();

    let mut header: Vec<String> = RESULT_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.extend(echo.iter().map(|(name, _)| name.to_string()));

    let n = records.len().max(curve.len());
    let mut rows = Vec::with_capacity(n + 1);
    rows.push(header);

    for i in 0..n {
        let mut row = Vec::with_capacity(width);
        row.push(if i == 0 { device_id.to_string() } else { String::new() });
        match records.get(i) {
            Some(r) => row.extend([
                r.acq_date.format(DATE_FORMAT).to_string(),
                r.acq_time.format(TIME_FORMAT).to_string(),
                r.elapsed_seconds.to_string(),
                r.voc.to_string(),
                r.jsc.to_string(),
                r.vpp.to_string(),
                r.mpp.to_string(),
                r.fill_factor.to_string(),
                r.efficiency.to_string(),
            ]),
            None => row.extend(std::iter::repeat(String::new()).take(9)),
        }
        match curve.points.get(i) {
            Some(p) => row.extend([p.voltage.to_string(), p.current_density.to_string()]),
            None => row.extend([String::new(), String::new()]),
        }
        if i == 0 {
            row.extend(echo.iter().map(|(_, value)| value.clone()));
        } else {
            row.extend(std::iter::repeat(String::new()).take(echo.len()));
        }
        rows.push(row);
    }
    rows
}

fn sanitize(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

#[cfg(feature = "storage_csv")]
fn write_rows(dir: &Path, path: &Path, rows: &[Vec<String>]) -> Result<(), DaqError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| DaqError::Storage(e.to_string()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| DaqError::Storage(format!("Failed to create CSV file: {}", e)))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| DaqError::Storage(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| DaqError::Storage(e.to_string()))?;
    Ok(())
}

#[cfg(not(feature = "storage_csv"))]
fn write_rows(_dir: &Path, _path: &Path, _rows: &[Vec<String>]) -> Result<(), DaqError> {
    Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Performance, SweepDirection};
    use chrono::TimeZone;

    fn record(elapsed: f64) -> PerformanceRecord {
        let perf = Performance {
            voc: 0.75,
            jsc: 2.5,
            vpp: 0.6,
            jpp: 2.0,
            mpp: 1.2,
            fill_factor: 64.0,
            efficiency: 0.5,
        };
        let at = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        PerformanceRecord::at(&perf, elapsed, at)
    }

    fn curve() -> JvCurve {
        JvCurve::from_pairs(SweepDirection::Forward, &[0.0, 0.5, 1.0], &[2.5, 2.0, -1.0])
    }

    #[test]
    fn rows_span_curve_and_echo_parameters_once() {
        let params = AcquisitionParameters {
            operator: "ana".to_string(),
            ..Default::default()
        };
        let rows = result_rows("S1_forward", &[record(0.0)], &curve(), &params);

        assert_eq!(rows.len(), 4);
        assert_eq!(&rows[0][..4], &["Device", "Acq Date", "Acq Time", "Time step"]);
        assert_eq!(rows[0][10], "V");
        assert_eq!(rows[0].last().map(String::as_str), Some("Comments"));
        assert!(rows.iter().all(|r| r.len() == rows[0].len()));

        assert_eq!(rows[1][0], "S1_forward");
        assert_eq!(rows[1][1], "2024-03-07");
        assert_eq!(rows[1][2], "14-05-09");
        assert_eq!(rows[1][4], "0.75");
        assert_eq!(rows[1][12], "0");
        assert!(rows[1].contains(&"ana".to_string()));

        assert_eq!(rows[2][0], "");
        assert_eq!(rows[2][4], "");
        assert_eq!(rows[2][10], "0.5");
        assert_eq!(rows[3][11], "-1");
        assert_eq!(rows[3][12], "");
    }

    #[test]
    fn rows_follow_longer_record_list() {
        let records: Vec<_> = (0..5).map(|k| record(k as f64 * 2.0)).collect();
        let rows = result_rows("S1", &records, &curve(), &AcquisitionParameters::default());
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[5][3], "8");
        assert_eq!(rows[5][10], "");
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize("A1/fwd run"), "A1_fwd_run");
        assert_eq!(sanitize("S-01_forward"), "S-01_forward");
    }
}
