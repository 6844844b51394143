//! Acquisition parameters snapshot.
//!
//! One [`AcquisitionParameters`] value is frozen when a run starts and never
//! changes until it ends. It is validated before any hardware is touched.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppResult, DaqError};
use crate::measurement::{SweepSpec, TrackingSpec};

/// Sweep, averaging and tracking settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParameters {
    /// Lower sweep bound (V)
    pub min_voltage: f64,
    /// Upper sweep bound (V)
    pub max_voltage: f64,
    /// First voltage of each sweep (V)
    pub start_voltage: f64,
    /// Sweep step (V)
    pub step_voltage: f64,
    /// Secondary-channel bias for hardware sweeps (V)
    pub gate_voltage: Option<f64>,
    /// Passes averaged into each curve
    pub num_averaged_scans: u32,
    /// Settle time before each reading (s)
    pub delay_before_measurement: f64,
    /// Track the maximum power point after the sweeps
    pub tracking_enabled: bool,
    /// Tracking ticks per tracked device
    pub num_tracking_points: u32,
    /// Time between tracking ticks (s)
    pub tracking_interval: f64,
    /// Device (or batch) label, echoed in results
    pub device_label: String,
    /// Operator name, echoed in results
    pub operator: String,
    /// Free-form comment, echoed in results
    pub comment: String,
    /// Use the instrument's internal sweep when it has one
    pub prefer_hardware_sweep: bool,
}

impl Default for AcquisitionParameters {
    fn default() -> Self {
        Self {
            min_voltage: 0.0,
            max_voltage: 1.0,
            start_voltage: 0.0,
            step_voltage: 0.5,
            gate_voltage: None,
            num_averaged_scans: 1,
            delay_before_measurement: 1.0,
            tracking_enabled: false,
            num_tracking_points: 5,
            tracking_interval: 2.0,
            device_label: String::new(),
            operator: String::new(),
            comment: String::new(),
            prefer_hardware_sweep: false,
        }
    }
}

impl AcquisitionParameters {
    /// Check every invariant a run relies on.
    ///
    /// A start voltage outside `[min, max]` is reported as
    /// [`DaqError::VoltageRange`]; everything else as [`DaqError::Validation`].
    pub fn validate(&self) -> AppResult<()> {
        let finite = [
            ("min voltage", self.min_voltage),
            ("max voltage", self.max_voltage),
            ("start voltage", self.start_voltage),
            ("step voltage", self.step_voltage),
            ("delay before measurement", self.delay_before_measurement),
            ("tracking interval", self.tracking_interval),
        ];
        if let Some((name, value)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DaqError::Validation(format!("{name} must be finite, got {value}")));
        }
        if matches!(self.gate_voltage, Some(v) if !v.is_finite()) {
            return Err(DaqError::Validation("gate voltage must be finite".to_string()));
        }
        if self.step_voltage <= 0.0 {
            return Err(DaqError::Validation(format!(
                "step voltage must be positive, got {}",
                self.step_voltage
            )));
        }
        if !(self.min_voltage <= self.start_voltage && self.start_voltage <= self.max_voltage) {
            return Err(DaqError::VoltageRange {
                min: self.min_voltage,
                start: self.start_voltage,
                max: self.max_voltage,
            });
        }
        if self.num_averaged_scans == 0 {
            return Err(DaqError::Validation(
                "number of averaged scans must be at least 1".to_string(),
            ));
        }
        if self.delay_before_measurement < 0.0 {
            return Err(DaqError::Validation(
                "delay before measurement cannot be negative".to_string(),
            ));
        }
        if self.num_tracking_points == 0 {
            return Err(DaqError::Validation(
                "number of tracking points must be at least 1".to_string(),
            ));
        }
        if self.tracking_interval < 0.0 {
            return Err(DaqError::Validation(
                "tracking interval cannot be negative".to_string(),
            ));
        }
        if self.device_label.trim().is_empty() {
            return Err(DaqError::Validation("device label is empty".to_string()));
        }
        self.sweep_spec()?.validate()?;
        self.tracking_interval_duration()?;
        Ok(())
    }

    /// Per-point settle time.
    pub fn hold(&self) -> AppResult<Duration> {
        seconds("delay before measurement", self.delay_before_measurement)
    }

    /// Time between tracking ticks.
    pub fn tracking_interval_duration(&self) -> AppResult<Duration> {
        seconds("tracking interval", self.tracking_interval)
    }

    /// Sweep definition for the measurement primitives.
    pub fn sweep_spec(&self) -> AppResult<SweepSpec> {
        Ok(SweepSpec {
            min_voltage: self.min_voltage,
            max_voltage: self.max_voltage,
            start_voltage: self.start_voltage,
            step_voltage: self.step_voltage,
            hold: self.hold()?,
            scans: self.num_averaged_scans,
            gate_voltage: self.gate_voltage,
            prefer_hardware: self.prefer_hardware_sweep,
        })
    }

    /// Tracking definition seeded with `vpp`.
    pub fn tracking_spec(&self, vpp: f64) -> AppResult<TrackingSpec> {
        Ok(TrackingSpec {
            vpp,
            num_points: self.num_tracking_points,
            interval: self.tracking_interval_duration()?,
            hold: self.hold()?,
        })
    }

    /// Parameters echoed next to every persisted result, as `(column, value)`.
    pub fn echo_columns(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Acq Min Voltage", self.min_voltage.to_string()),
            ("Acq Max Voltage", self.max_voltage.to_string()),
            ("Acq Start Voltage", self.start_voltage.to_string()),
            ("Acq Step Voltage", self.step_voltage.to_string()),
            (
                "Acq Gate Voltage",
                self.gate_voltage.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("Acq Num Aver Scans", self.num_averaged_scans.to_string()),
            (
                "Delay Before Meas",
                self.delay_before_measurement.to_string(),
            ),
            ("Num Track Points", self.num_tracking_points.to_string()),
            ("Track Interval", self.tracking_interval.to_string()),
            ("Operator", self.operator.clone()),
            ("Comments", self.comment.clone()),
        ]
    }
}

fn seconds(name: &str, value: f64) -> AppResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        DaqError::Validation(format!("{name} of {value} s is not a valid duration: {e}"))
    })
}
