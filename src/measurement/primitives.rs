//! Stateless measurement routines over a source-meter.
//!
//! Everything here borrows the instrument for the duration of one call and
//! keeps no state between calls. Driver errors surface as
//! [`DaqError::MeasurementRead`]; a raised [`StopFlag`] surfaces as
//! [`DaqError::Cancelled`] with the partial data dropped.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::{JvCurve, JvPoint, MeasurementSettings, Performance, SweepDirection};
use crate::cancellation::StopFlag;
use crate::error::{AppResult, DaqError};
use crate::hardware::{HardwareSweep, Output, OutputStatus, SourceMeter, SourceMode};

/// Endpoint tolerance when laying out the voltage grid.
const GRID_TOLERANCE: f64 = 1e-9;

/// Largest number of grid points a single sweep may visit.
pub const MAX_SWEEP_POINTS: usize = 100_000;

/// Voltage sweep definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSpec {
    /// Lowest voltage of the grid (V)
    pub min_voltage: f64,
    /// Highest voltage of the grid (V)
    pub max_voltage: f64,
    /// First voltage visited (V); snapped to the nearest grid point
    pub start_voltage: f64,
    /// Grid spacing (V), strictly positive
    pub step_voltage: f64,
    /// Settle time between setting a voltage and reading the current
    pub hold: Duration,
    /// Number of passes averaged into the curve
    pub scans: u32,
    /// Secondary-channel bias forwarded to hardware sweeps
    pub gate_voltage: Option<f64>,
    /// Use the instrument's own sweep when it offers one
    pub prefer_hardware: bool,
}

impl SweepSpec {
    /// Reject non-finite values, a non-positive step, zero scans, a start
    /// voltage outside `[min, max]` and grids above [`MAX_SWEEP_POINTS`].
    pub fn validate(&self) -> AppResult<()> {
        let values = [
            self.min_voltage,
            self.max_voltage,
            self.start_voltage,
            self.step_voltage,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DaqError::Validation(
                "sweep voltages must be finite numbers".to_string(),
            ));
        }
        if self.step_voltage <= 0.0 {
            return Err(DaqError::Validation(format!(
                "step voltage must be positive, got {}",
                self.step_voltage
            )));
        }
        if self.scans == 0 {
            return Err(DaqError::Validation(
                "number of averaged scans must be at least 1".to_string(),
            ));
        }
        if !(self.min_voltage <= self.start_voltage && self.start_voltage <= self.max_voltage) {
            return Err(DaqError::VoltageRange {
                min: self.min_voltage,
                start: self.start_voltage,
                max: self.max_voltage,
            });
        }
        let points = self.span_steps().floor() + 1.0;
        if points > MAX_SWEEP_POINTS as f64 {
            return Err(DaqError::Validation(format!(
                "sweep needs {points} points, limit is {MAX_SWEEP_POINTS}"
            )));
        }
        Ok(())
    }

    fn span_steps(&self) -> f64 {
        (self.max_voltage - self.min_voltage) / self.step_voltage + GRID_TOLERANCE
    }

    /// Grid covering `[min, max]` inclusive at `step` spacing.
    pub fn voltage_grid(&self) -> AppResult<Vec<f64>> {
        self.validate()?;
        let last = self.span_steps().floor() as usize;
        Ok((0..=last)
            .map(|k| self.min_voltage + k as f64 * self.step_voltage)
            .filter(|v| *v <= self.max_voltage + GRID_TOLERANCE)
            .collect())
    }
}

/// Index of the grid point closest to `voltage`. The lower index wins a tie.
pub fn nearest_index(grid: &[f64], voltage: f64) -> usize {
    grid.iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, dist), (i, v)| {
            let d = (v - voltage).abs();
            if d < dist {
                (i, d)
            } else {
                (best, dist)
            }
        })
        .0
}

/// Order in which grid indices are visited.
///
/// Forward: start → high end, wrap, low end → start-1.
/// Backward: start → low end, wrap, high end → start+1.
/// Each index appears exactly once and the start index always comes first.
pub fn visit_order(len: usize, start: usize, direction: SweepDirection) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let start = start.min(len - 1);
    match direction {
        SweepDirection::Forward => (start..len).chain(0..start).collect(),
        SweepDirection::Backward => (0..=start).rev().chain((start + 1..len).rev()).collect(),
    }
}

/// Incremental mean: equal to `(avg·(n-1) + x)/n`, exact for repeated values.
fn running_mean(average: f64, n: u32, sample: f64) -> f64 {
    average + (sample - average) / f64::from(n)
}

pub(crate) async fn apply_output(smu: &dyn SourceMeter, output: Output) -> AppResult<()> {
    let status = smu.set_output(output).await.map_err(DaqError::read)?;
    if let OutputStatus::Clamped { requested, applied } = status {
        warn!(
            requested,
            applied, "Compliance reached: output clamped to protection limit"
        );
    }
    Ok(())
}

/// Single-point readout as a J-V sample.
pub async fn read_point(
    smu: &dyn SourceMeter,
    settings: &MeasurementSettings,
) -> AppResult<JvPoint> {
    let (voltage, current) = smu.read_values().await.map_err(DaqError::read)?;
    Ok(JvPoint {
        voltage,
        current_density: settings.current_density(current),
    })
}

/// Measure `(Voc, Jsc)` directly.
///
/// Forces 0 A in current mode and reads the voltage, then forces 0 V in voltage
/// mode and reads the current. Leaves the instrument sourcing 0 V.
pub async fn measure_open_circuit_and_short_circuit(
    smu: &dyn SourceMeter,
    settings: &MeasurementSettings,
) -> AppResult<(f64, f64)> {
    smu.set_mode(SourceMode::Current)
        .await
        .map_err(DaqError::read)?;
    apply_output(smu, Output::Current(0.0)).await?;
    let voc = read_point(smu, settings).await?.voltage;

    smu.set_mode(SourceMode::Voltage)
        .await
        .map_err(DaqError::read)?;
    apply_output(smu, Output::Voltage(0.0)).await?;
    let jsc = read_point(smu, settings).await?.current_density;

    debug!(voc, jsc, "Measured open-circuit voltage and short-circuit current");
    Ok((voc, jsc))
}

/// Acquire one J-V curve.
///
/// Uses the instrument's internal sweep when `spec.prefer_hardware` is set and
/// the instrument offers one, otherwise steps the grid in software starting at
/// the configured start voltage. Averages `spec.scans` passes.
pub async fn sweep_voltage(
    smu: &dyn SourceMeter,
    spec: &SweepSpec,
    direction: SweepDirection,
    settings: &MeasurementSettings,
    stop: &StopFlag,
) -> AppResult<JvCurve> {
    spec.validate()?;
    match smu.hardware_sweep() {
        Some(hw) if spec.prefer_hardware => {
            hardware_assisted_sweep(hw, spec, direction, settings, stop).await
        }
        _ => software_sweep(smu, spec, direction, settings, stop).await,
    }
}

async fn software_sweep(
    smu: &dyn SourceMeter,
    spec: &SweepSpec,
    direction: SweepDirection,
    settings: &MeasurementSettings,
    stop: &StopFlag,
) -> AppResult<JvCurve> {
    let grid = spec.voltage_grid()?;
    let order = visit_order(
        grid.len(),
        nearest_index(&grid, spec.start_voltage),
        direction,
    );

    let mut averages = vec![0.0; grid.len()];
    let mut counts = vec![0u32; grid.len()];

    smu.set_mode(SourceMode::Voltage)
        .await
        .map_err(DaqError::read)?;

    for scan in 1..=spec.scans {
        debug!(scan, scans = spec.scans, %direction, "Sweep pass");
        for &i in &order {
            stop.check()?;
            apply_output(smu, Output::Voltage(grid[i])).await?;
            if !spec.hold.is_zero() {
                sleep(spec.hold).await;
            }
            let point = read_point(smu, settings).await?;
            counts[i] += 1;
            averages[i] = running_mean(averages[i], counts[i], point.current_density);
        }
    }

    let mut curve = JvCurve::from_pairs(direction, &grid, &averages);
    if direction == SweepDirection::Backward {
        curve.points.reverse();
    }
    Ok(curve)
}

async fn hardware_assisted_sweep(
    hw: &dyn HardwareSweep,
    spec: &SweepSpec,
    direction: SweepDirection,
    settings: &MeasurementSettings,
    stop: &StopFlag,
) -> AppResult<JvCurve> {
    let grid = spec.voltage_grid()?;
    let (first, last) = match (grid.first(), grid.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(JvCurve::from_pairs(direction, &[], &[])),
    };
    let (start, end, step) = match direction {
        SweepDirection::Forward => (first, last, spec.step_voltage),
        SweepDirection::Backward => (last, first, -spec.step_voltage),
    };

    let mut voltages: Vec<f64> = Vec::new();
    let mut averages = vec![0.0; grid.len()];

    for scan in 1..=spec.scans {
        stop.check()?;
        debug!(scan, start, end, step, "Hardware sweep pass");
        hw.sweep(start, end, step, spec.gate_voltage)
            .await
            .map_err(DaqError::read)?;
        let (v, i) = hw.read_sweep_values().await.map_err(DaqError::read)?;
        if v.len() != grid.len() || i.len() != grid.len() {
            return Err(DaqError::MeasurementRead(format!(
                "hardware sweep returned {} voltages / {} currents, expected {}",
                v.len(),
                i.len(),
                grid.len()
            )));
        }
        for (avg, raw) in averages.iter_mut().zip(&i) {
            *avg = running_mean(*avg, scan, settings.current_density(*raw));
        }
        if voltages.is_empty() {
            voltages = v;
        }
    }

    Ok(JvCurve::from_pairs(direction, &voltages, &averages))
}

/// Derive figures of merit from an operating point.
///
/// FF and efficiency are 0 when Voc or Jsc is 0 (dark or disconnected device),
/// and efficiency is 0 when `power_in` is 0. Never fails.
pub fn performance_at(voc: f64, jsc: f64, vpp: f64, jpp: f64, power_in: f64) -> Performance {
    let mpp = vpp * jpp;
    let (fill_factor, efficiency) = if voc == 0.0 || jsc == 0.0 {
        (0.0, 0.0)
    } else {
        let ff = mpp * 100.0 / (voc * jsc);
        let eff = if power_in == 0.0 { 0.0 } else { mpp / power_in };
        (finite_or_zero(ff), finite_or_zero(eff))
    };
    Performance {
        voc,
        jsc,
        vpp,
        jpp,
        mpp,
        fill_factor,
        efficiency,
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Extract Voc, Jsc, the maximum power point, FF and efficiency from a curve.
///
/// - `Vpp, Jpp` at the sample maximising `V·J`
/// - `Jsc` is J linearly interpolated at 0 V (nearest sample if 0 V is outside the curve)
/// - `Voc` is the first positive→non-positive zero crossing of J, interpolated (0 if none)
pub fn extract_performance(curve: &JvCurve, power_in: f64) -> Performance {
    let Some(peak) = curve.max_power_point() else {
        return Performance::default();
    };

    let mut ascending = curve.points.clone();
    ascending.sort_by(|a, b| a.voltage.total_cmp(&b.voltage));

    let jsc = short_circuit_density(&ascending);
    let voc = open_circuit_voltage(&ascending);

    performance_at(voc, jsc, peak.voltage, peak.current_density, power_in)
}

fn short_circuit_density(ascending: &[JvPoint]) -> f64 {
    match (ascending.first(), ascending.last()) {
        (Some(lo), _) if lo.voltage >= 0.0 => lo.current_density,
        (_, Some(hi)) if hi.voltage <= 0.0 => hi.current_density,
        _ => ascending
            .windows(2)
            .find(|w| w[0].voltage <= 0.0 && 0.0 <= w[1].voltage)
            .map(|w| {
                let (a, b) = (w[0], w[1]);
                interpolate(a.voltage, a.current_density, b.voltage, b.current_density, 0.0)
            })
            .unwrap_or(0.0),
    }
}

fn open_circuit_voltage(ascending: &[JvPoint]) -> f64 {
    ascending
        .windows(2)
        .find(|w| w[0].current_density > 0.0 && w[1].current_density <= 0.0)
        .map(|w| {
            let (a, b) = (w[0], w[1]);
            a.voltage
                + (0.0 - a.current_density) * (b.voltage - a.voltage)
                    / (b.current_density - a.current_density)
        })
        .unwrap_or(0.0)
}

fn interpolate(x0: f64, y0: f64, x1: f64, y1: f64, x: f64) -> f64 {
    if x1 == x0 {
        return y0;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}
