//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent surface for every failure
//! an acquisition run can hit, from bad parameters to a source-meter that stops
//! answering halfway through a sweep.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`** / **`VoltageRange`**: parameters rejected before any hardware
//!   I/O happens. A run never starts when one of these is returned.
//! - **`InstrumentActivation`**: the source-meter (or a peripheral) could not be
//!   acquired, limited or switched on. Fatal to the run.
//! - **`MeasurementRead`**: an instrument command or readback failed mid-measurement.
//!   Aborts the remaining devices of the run.
//! - **`Cancelled`**: the stop flag was observed. Not a failure; the engine turns
//!   it into a clean `Stopping` transition.
//! - **`AlreadyRunning`**: `start` was called while a run is active.
//! - **`Config`**, **`Io`**, **`Storage`**, **`FeatureNotEnabled`**, **`Logging`**:
//!   ambient errors from configuration, result persistence and log setup.
//!
//! Hardware capability traits return `anyhow::Result`; the helpers
//! [`DaqError::activation`] and [`DaqError::read`] convert those at the engine
//! boundary so raw driver errors never leak to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Application error type.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Voltage range error: start {start} V must lie within [{min} V, {max} V]")]
    VoltageRange { min: f64, start: f64, max: f64 },

    #[error("Instrument activation failed: {0}")]
    InstrumentActivation(String),

    #[error("Measurement read failed: {0}")]
    MeasurementRead(String),

    #[error("Acquisition cancelled by user")]
    Cancelled,

    #[error("An acquisition is already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Coarse classification reported to the UI/log collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Parameters rejected before the run started.
    Validation,
    /// Instrument could not be brought up.
    InstrumentActivation,
    /// I/O failure while measuring.
    MeasurementRead,
    /// Output clamped to a safety limit. Non-fatal.
    ComplianceWarning,
    /// User requested stop.
    UserCancelled,
    /// Anything else (config, storage, ...).
    Other,
}

impl DaqError {
    /// Wrap a driver error raised while bringing hardware up.
    pub fn activation(err: anyhow::Error) -> Self {
        DaqError::InstrumentActivation(format!("{err:#}"))
    }

    /// Wrap a driver error raised while measuring.
    pub fn read(err: anyhow::Error) -> Self {
        DaqError::MeasurementRead(format!("{err:#}"))
    }

    /// Classification used in error events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::Validation(_) | DaqError::VoltageRange { .. } | DaqError::AlreadyRunning => {
                ErrorKind::Validation
            }
            DaqError::InstrumentActivation(_) => ErrorKind::InstrumentActivation,
            DaqError::MeasurementRead(_) => ErrorKind::MeasurementRead,
            DaqError::Cancelled => ErrorKind::UserCancelled,
            DaqError::Config(_)
            | DaqError::Io(_)
            | DaqError::Storage(_)
            | DaqError::FeatureNotEnabled(_)
            | DaqError::Logging(_) => ErrorKind::Other,
        }
    }

    /// True for the stop-flag path, which is not reported as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DaqError::Cancelled)
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_driver_errors_with_context() {
        let err = anyhow::anyhow!("timeout").context("reading :READ?");
        match DaqError::read(err) {
            DaqError::MeasurementRead(msg) => {
                assert!(msg.contains("reading :READ?"));
                assert!(msg.contains("timeout"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn classifies_kinds() {
        assert_eq!(
            DaqError::VoltageRange {
                min: 0.0,
                start: 2.0,
                max: 1.0
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DaqError::InstrumentActivation("gone".into()).kind(),
            ErrorKind::InstrumentActivation
        );
        assert_eq!(DaqError::Cancelled.kind(), ErrorKind::UserCancelled);
        assert!(DaqError::Cancelled.is_cancelled());
        assert!(!DaqError::Storage("disk".into()).is_cancelled());
    }
}
