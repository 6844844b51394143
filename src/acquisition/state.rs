//! Acquisition state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the acquisition engine.
///
/// # State Machine
///
/// ```text
/// Idle ──Start──> Activating ──> SweepingDevice ⇄ Tracking ──> Completing ──> Idle
///                     │                │              │             ▲
///                     ├──error─────────┴──────────────┴─> Failed ───┤
///                     └──stop──────────┴──────────────┴─> Stopping ─┘
/// ```
///
/// `Completing` runs on every exit path and always ends in `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// No run active
    #[default]
    Idle,
    /// Acquiring and configuring hardware
    Activating,
    /// Sweeping a device
    SweepingDevice,
    /// Tracking the maximum power point of a device
    Tracking,
    /// Tearing down after a run
    Completing,
    /// Stop observed, unwinding
    Stopping,
    /// Run aborted by an error, unwinding
    Failed,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "Idle"),
            AcquisitionState::Activating => write!(f, "Activating"),
            AcquisitionState::SweepingDevice => write!(f, "SweepingDevice"),
            AcquisitionState::Tracking => write!(f, "Tracking"),
            AcquisitionState::Completing => write!(f, "Completing"),
            AcquisitionState::Stopping => write!(f, "Stopping"),
            AcquisitionState::Failed => write!(f, "Failed"),
        }
    }
}

impl AcquisitionState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        matches!(self, AcquisitionState::Idle)
    }

    /// Check if a stop request has anything to act on.
    pub fn can_stop(&self) -> bool {
        !matches!(self, AcquisitionState::Idle)
    }
}
