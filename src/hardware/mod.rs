//! Hardware abstraction layer.
//!
//! - [`capabilities`]: capability traits the acquisition engine drives
//!   (source-meter, optional hardware sweep, substrate stage, switch matrix)
//!   and the [`HardwareFactory`] that opens them at run activation.
//! - [`mock`]: simulated implementations for tests and dry runs.
//!
//! Instrument wire protocols are deliberately not part of this crate; a lab
//! driver implements the traits on top of its VISA/GPIB session.

pub mod capabilities;
pub mod mock;

pub use capabilities::{
    HardwareFactory, HardwareSweep, Output, OutputStatus, SourceMeter, SourceMode,
    SubstrateStage, SwitchMatrix,
};

/// Hard protection ceiling applied to every source-meter at activation: volts.
pub const SAFETY_VOLTAGE_LIMIT: f64 = 20.0;

/// Hard protection ceiling applied to every source-meter at activation: amperes.
pub const SAFETY_CURRENT_LIMIT: f64 = 1.0;
