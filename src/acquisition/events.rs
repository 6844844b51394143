//! Typed events flowing out of the acquisition worker.
//!
//! The worker never calls back into its owner. Everything the outside world
//! learns about a run arrives on one `tokio::sync::mpsc` channel as an
//! [`AcquisitionEvent`], in the order it happened.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::session::Session;
use super::state::AcquisitionState;
use crate::error::ErrorKind;
use crate::measurement::{JvCurve, PerformanceRecord};

/// Event emitted by the acquisition engine.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// The engine entered a new state
    State(AcquisitionState),
    /// Human-readable progress message
    Status(StatusEvent),
    /// A measurement result for the result consumer
    Result(ResultEvent),
    /// A failure or non-fatal warning
    Error(ErrorEvent),
    /// A holder cell started or finished measuring
    Cell(CellEvent),
    /// Parameter entry should be enabled (`true`) or locked (`false`)
    ControlsEnabled(bool),
    /// The run ended; always the last event of a run
    Finished(RunReport),
}

/// Progress message with its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// When the message was produced
    pub timestamp: DateTime<Local>,
    /// Message text
    pub message: String,
}

impl StatusEvent {
    /// Message stamped with the current local time.
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

/// Result tuple delivered to the result consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Device identifier (`<id>_forward`, `<id>_backward` or `<id>` for tracking)
    pub device_id: String,
    /// Performance figures
    pub record: PerformanceRecord,
    /// Curve the figures belong to
    pub curve: JvCurve,
    /// Whether this record should reach durable storage
    pub persist: bool,
}

/// Progress of one holder cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellProgress {
    /// Its devices are being swept or tracked
    Measuring,
    /// Every device on it was measured
    Done,
    /// A stop request interrupted it
    Stopped,
    /// An error aborted it
    Failed,
}

/// Per-cell progress, for holder displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEvent {
    /// Grid row (0 = top)
    pub row: u32,
    /// Grid column (0 = left)
    pub col: u32,
    /// Physical substrate number
    pub substrate: u32,
    /// Where the cell stands
    pub progress: CellProgress,
}

/// Failure or warning reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every active device was measured
    Completed,
    /// A stop request was honoured
    Stopped,
    /// An error aborted the run
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Stopped => write!(f, "stopped"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Summary handed back when a run ends.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Error message when `outcome` is `Failed`
    pub error: Option<String>,
    /// Everything the run collected
    pub session: Session,
}

impl RunReport {
    /// Run identifier
    pub fn run_id(&self) -> uuid::Uuid {
        self.session.id
    }

    /// True for a run that measured every device.
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}
