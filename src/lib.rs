//! # J-V DAQ Core Library
//!
//! Acquisition engine for a photovoltaic test station: current-density versus
//! voltage (J-V) sweeps on a grid of devices, figure-of-merit extraction and
//! maximum-power-point tracking. The engine is headless; the `jv-daq` binary
//! and any GUI are thin consumers of its typed event channel.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The background [`AcquisitionEngine`](acquisition::AcquisitionEngine),
//!   its state machine, parameter snapshot, device grid and event types.
//! - **`cancellation`**: [`StopFlag`](cancellation::StopFlag), the cooperative stop
//!   signal polled between voltage steps and tracking ticks.
//! - **`config`**: Figment-backed configuration (TOML file plus `JV_DAQ_` environment).
//! - **`error`**: The crate-wide `DaqError` and the coarse `ErrorKind` reported in events.
//! - **`hardware`**: Async capability traits for the source-meter, stage and switch
//!   matrix, plus mock implementations for tests and dry runs.
//! - **`measurement`**: Measurement primitives (sweeps, Voc/Jsc, performance
//!   extraction) and the tracking stream.
//! - **`storage`**: Result sinks; CSV output behind the `storage_csv` feature.
//! - **`tracing_setup`**: Structured logging initialisation.

pub mod acquisition;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod hardware;
pub mod measurement;
pub mod storage;
pub mod tracing_setup;
