//! Atomic Hardware Capabilities
//!
//! This module defines the fine-grained capability traits the acquisition engine
//! drives. Instead of one monolithic instrument trait, each peripheral implements
//! the capability it actually has:
//!
//! - A source-measure unit implements [`SourceMeter`], and optionally
//!   [`HardwareSweep`] when it can run a staircase sweep internally
//! - A positioning stage implements [`SubstrateStage`]
//! - A relay board implements [`SwitchMatrix`]
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Wire-protocol encoding (SCPI over VISA/GPIB) lives entirely behind these
//! traits. The engine converts their errors into `DaqError` kinds.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn short_circuit_current<S>(smu: &S) -> Result<f64>
//! where
//!     S: SourceMeter + ?Sized,
//! {
//!     smu.set_mode(SourceMode::Voltage).await?;
//!     smu.set_output(Output::Voltage(0.0)).await?;
//!     let (_, current) = smu.read_values().await?;
//!     Ok(current)
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the source-meter sources. The opposite quantity is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceMode {
    /// Source voltage, measure current
    Voltage,
    /// Source current, measure voltage
    Current,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Voltage => write!(f, "VOLT"),
            SourceMode::Current => write!(f, "CURR"),
        }
    }
}

/// Requested output level. One quantity is sourced at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Output {
    /// Output voltage in volts
    Voltage(f64),
    /// Output current in amperes
    Current(f64),
}

impl Output {
    /// Source mode needed to apply this output.
    pub fn mode(&self) -> SourceMode {
        match self {
            Output::Voltage(_) => SourceMode::Voltage,
            Output::Current(_) => SourceMode::Current,
        }
    }

    /// Requested level regardless of quantity.
    pub fn level(&self) -> f64 {
        match self {
            Output::Voltage(v) | Output::Current(v) => *v,
        }
    }
}

/// Outcome of a `set_output` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputStatus {
    /// Level applied as requested
    Applied,
    /// Level exceeded the protection limit and was clamped (compliance warning)
    Clamped {
        /// Level the caller asked for
        requested: f64,
        /// Level actually applied
        applied: f64,
    },
}

impl OutputStatus {
    /// True when the instrument reported a compliance clamp.
    pub fn is_clamped(&self) -> bool {
        matches!(self, OutputStatus::Clamped { .. })
    }
}

/// Capability: Source-Measure Unit
///
/// Devices that force a voltage or current and read back both (Keithley 2400
/// class instruments).
///
/// # Contract
/// - Voltages in volts, currents in amperes, both as the instrument reports them
/// - `set_output` switches source mode on its own if required
/// - `set_output` clamps to the protection limit instead of erroring and reports
///   that through [`OutputStatus::Clamped`]
/// - `read_values` triggers one measurement and returns `(voltage, current)`
///
/// # Thread Safety
/// - All methods take `&self`; drivers use interior mutability for state
#[async_trait]
pub trait SourceMeter: Send + Sync {
    /// Select what is sourced
    async fn set_mode(&self, mode: SourceMode) -> Result<()>;

    /// Set protection limits. `None` leaves that limit unchanged.
    async fn set_limit(&self, voltage: Option<f64>, current: Option<f64>) -> Result<()>;

    /// Apply an output level
    async fn set_output(&self, output: Output) -> Result<OutputStatus>;

    /// Trigger a measurement and return `(voltage, current)`
    async fn read_values(&self) -> Result<(f64, f64)>;

    /// Enable the output stage
    async fn on(&self) -> Result<()>;

    /// Disable the output stage
    async fn off(&self) -> Result<()>;

    /// Native sweep support, if the instrument has it
    ///
    /// # Default Implementation
    /// Returns `None`; the engine then steps the sweep in software.
    fn hardware_sweep(&self) -> Option<&dyn HardwareSweep> {
        None
    }
}

/// Capability: Instrument-internal staircase sweep
///
/// Parameter analyzers (Agilent 4155C class) run a whole sweep on their own and
/// return the buffered data afterwards.
#[async_trait]
pub trait HardwareSweep: Send + Sync {
    /// Configure and run one sweep from `start` to `end`.
    ///
    /// `step` is signed in the sweep direction. `aux` is the secondary channel
    /// bias (gate voltage), if any.
    async fn sweep(&self, start: f64, end: f64, step: f64, aux: Option<f64>) -> Result<()>;

    /// Read back the buffered sweep as `(voltages, currents)` in acquisition order
    async fn read_sweep_values(&self) -> Result<(Vec<f64>, Vec<f64>)>;
}

/// Capability: Substrate Positioning
///
/// XY stage that carries the substrate holder under the light source and
/// probe head.
///
/// # Contract
/// - Substrates are numbered in holder coordinates (1-based)
/// - Devices are numbered within a substrate (1-based)
/// - Moves complete before the call returns
#[async_trait]
pub trait SubstrateStage: Send + Sync {
    /// Move to the centre of a substrate
    async fn move_to_substrate(&self, substrate: u32) -> Result<()>;

    /// Move to one device of a substrate
    async fn move_to_device(&self, substrate: u32, device: u32) -> Result<()>;

    /// Move to the parking position near the origin
    async fn park(&self) -> Result<()>;

    /// Release stage control
    ///
    /// # Default Implementation
    /// Nothing to release.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Capability: Device Switch Matrix
///
/// Relay board that routes one device pad to the source-meter.
#[async_trait]
pub trait SwitchMatrix: Send + Sync {
    /// Route `(row, col)` to the instrument. Row is the substrate position on the
    /// board, col the device pad.
    async fn connect(&self, row: u32, col: u32) -> Result<()>;

    /// Open all relays and release the board
    ///
    /// # Default Implementation
    /// Nothing to release.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Acquires hardware handles when a run activates.
///
/// The engine owns whatever this returns for the lifetime of the run and
/// releases it during teardown. Stage and switch matrix are optional; a
/// factory for a single hard-wired device returns `None` for both.
#[async_trait]
pub trait HardwareFactory: Send + Sync {
    /// Open the source-meter
    async fn source_meter(&self) -> Result<Box<dyn SourceMeter>>;

    /// Open the positioning stage, if fitted
    async fn stage(&self) -> Result<Option<Box<dyn SubstrateStage>>> {
        Ok(None)
    }

    /// Open the switch matrix, if fitted
    async fn switch_matrix(&self) -> Result<Option<Box<dyn SwitchMatrix>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_reports_mode_and_level() {
        let out = Output::Current(-0.002);
        assert_eq!(out.mode(), SourceMode::Current);
        assert_eq!(out.level(), -0.002);
        assert_eq!(SourceMode::Voltage.to_string(), "VOLT");
    }

    struct Fixed;

    #[async_trait]
    impl SourceMeter for Fixed {
        async fn set_mode(&self, _mode: SourceMode) -> Result<()> {
            Ok(())
        }
        async fn set_limit(&self, _voltage: Option<f64>, _current: Option<f64>) -> Result<()> {
            Ok(())
        }
        async fn set_output(&self, _output: Output) -> Result<OutputStatus> {
            Ok(OutputStatus::Applied)
        }
        async fn read_values(&self) -> Result<(f64, f64)> {
            Ok((0.123, -0.004))
        }
        async fn on(&self) -> Result<()> {
            Ok(())
        }
        async fn off(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_source_meter_defaults() {
        let smu = Fixed;
        assert!(smu.hardware_sweep().is_none());
        assert_eq!(smu.read_values().await.unwrap(), (0.123, -0.004));
    }
}
