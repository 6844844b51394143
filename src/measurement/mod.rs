//! Measurement data types and primitives.
//!
//! The types here are what flows out of the acquisition engine: J-V curves,
//! performance figures derived from them, and timestamped records. The
//! [`primitives`] module holds the stateless routines that produce them from a
//! [`SourceMeter`](crate::hardware::SourceMeter), and [`tracking`] the lazy
//! maximum-power-point tracking stream.

pub mod primitives;
pub mod tracking;

pub use primitives::{
    extract_performance, measure_open_circuit_and_short_circuit, performance_at, read_point,
    sweep_voltage, SweepSpec, MAX_SWEEP_POINTS,
};
pub use tracking::{track_max_power_point, TrackingSpec};

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a voltage sweep.
///
/// Forward and backward curves of the same device are kept apart: their
/// difference (hysteresis) is a diagnostic in its own right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweepDirection {
    /// Towards higher voltages; curve ordered by ascending voltage
    Forward,
    /// Towards lower voltages; curve ordered by descending voltage
    Backward,
}

impl SweepDirection {
    /// Suffix appended to a device id in result events.
    pub fn suffix(&self) -> &'static str {
        match self {
            SweepDirection::Forward => "_forward",
            SweepDirection::Backward => "_backward",
        }
    }
}

impl fmt::Display for SweepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepDirection::Forward => write!(f, "forward"),
            SweepDirection::Backward => write!(f, "backward"),
        }
    }
}

/// One `(voltage, current density)` sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JvPoint {
    /// Applied voltage (V)
    pub voltage: f64,
    /// Measured current density, photovoltaic sign convention
    pub current_density: f64,
}

/// A J-V curve from one sweep direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JvCurve {
    /// Direction the curve was acquired in
    pub direction: SweepDirection,
    /// Samples, voltage strictly monotonic in `direction`
    pub points: Vec<JvPoint>,
}

impl JvCurve {
    /// Build a curve from parallel voltage/current slices.
    pub fn from_pairs(direction: SweepDirection, voltages: &[f64], currents: &[f64]) -> Self {
        let points = voltages
            .iter()
            .zip(currents)
            .map(|(&voltage, &current_density)| JvPoint {
                voltage,
                current_density,
            })
            .collect();
        Self { direction, points }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the curve holds no samples
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Voltages in curve order
    pub fn voltages(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.voltage).collect()
    }

    /// Current densities in curve order
    pub fn current_densities(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.current_density).collect()
    }

    /// Sample with the largest `V·J`. The first one wins a tie.
    pub fn max_power_point(&self) -> Option<JvPoint> {
        self.points.iter().copied().fold(None, |best, p| match best {
            Some(b) if b.voltage * b.current_density >= p.voltage * p.current_density => Some(b),
            _ => Some(p),
        })
    }
}

/// Scalar figures of merit derived from a curve or an operating point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    /// Open-circuit voltage
    pub voc: f64,
    /// Short-circuit current density
    pub jsc: f64,
    /// Voltage at the maximum power point
    pub vpp: f64,
    /// Current density at the maximum power point
    pub jpp: f64,
    /// Maximum power density, `vpp·jpp`
    pub mpp: f64,
    /// Fill factor in percent
    pub fill_factor: f64,
    /// Power conversion efficiency, `mpp / power_in`
    pub efficiency: f64,
}

/// Timestamped performance record, one per sweep or tracking tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Local acquisition date
    pub acq_date: NaiveDate,
    /// Local acquisition time
    pub acq_time: NaiveTime,
    /// Seconds since tracking start (0 for sweep records)
    pub elapsed_seconds: f64,
    /// Open-circuit voltage
    pub voc: f64,
    /// Short-circuit current density
    pub jsc: f64,
    /// Voltage at the maximum power point
    pub vpp: f64,
    /// Maximum power density
    pub mpp: f64,
    /// Fill factor in percent
    pub fill_factor: f64,
    /// Power conversion efficiency
    pub efficiency: f64,
}

impl PerformanceRecord {
    /// Stamp `performance` with the given wall-clock time.
    pub fn at(performance: &Performance, elapsed_seconds: f64, now: DateTime<Local>) -> Self {
        Self {
            acq_date: now.date_naive(),
            acq_time: now.time(),
            elapsed_seconds,
            voc: performance.voc,
            jsc: performance.jsc,
            vpp: performance.vpp,
            mpp: performance.mpp,
            fill_factor: performance.fill_factor,
            efficiency: performance.efficiency,
        }
    }

    /// Stamp `performance` with the current local time.
    pub fn now(performance: &Performance, elapsed_seconds: f64) -> Self {
        Self::at(performance, elapsed_seconds, Local::now())
    }
}

/// Inputs the primitives need besides the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSettings {
    /// Incident optical power, irradiance × device area
    pub power_in: f64,
    /// Flip the instrument's sink-convention current so photocurrent is positive
    pub invert_current: bool,
}

impl MeasurementSettings {
    /// Settings from irradiance and device area.
    pub fn new(irradiance: f64, device_area: f64, invert_current: bool) -> Self {
        Self {
            power_in: irradiance * device_area,
            invert_current,
        }
    }

    /// Apply the sign convention to a raw current reading.
    pub fn current_density(&self, raw_current: f64) -> f64 {
        if self.invert_current {
            -raw_current
        } else {
            raw_current
        }
    }
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            power_in: 1.0,
            invert_current: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn curve_max_power_point() {
        let curve = JvCurve::from_pairs(
            SweepDirection::Forward,
            &[0.0, 0.1, 0.2, 0.3],
            &[10.0, 9.0, 7.0, 4.0],
        );
        let mpp = curve.max_power_point().unwrap();
        assert_eq!(mpp.voltage, 0.2);
        assert_eq!(curve.len(), 4);
        assert!(JvCurve::from_pairs(SweepDirection::Backward, &[], &[])
            .max_power_point()
            .is_none());
    }

    #[test]
    fn record_takes_local_date_and_time() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        let perf = Performance {
            voc: 0.7,
            mpp: 1.2,
            ..Default::default()
        };
        let record = PerformanceRecord::at(&perf, 3.5, now);
        assert_eq!(record.acq_date.to_string(), "2024-03-07");
        assert_eq!(record.acq_time.format("%H-%M-%S").to_string(), "14-05-09");
        assert_eq!(record.elapsed_seconds, 3.5);
        assert_eq!(record.voc, 0.7);
    }

    #[test]
    fn settings_power_and_sign() {
        let settings = MeasurementSettings::new(0.1, 0.5, true);
        assert!((settings.power_in - 0.05).abs() < 1e-12);
        assert_eq!(settings.current_density(-2.0e-3), 2.0e-3);
        let raw = MeasurementSettings::new(0.1, 0.5, false);
        assert_eq!(raw.current_density(-2.0e-3), -2.0e-3);
        assert_eq!(SweepDirection::Backward.suffix(), "_backward");
    }
}
