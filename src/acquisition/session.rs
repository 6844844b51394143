//! Per-run session accounting.
//!
//! A [`Session`] is created when a run starts, accumulates every result the run
//! emits, and is handed back inside the
//! [`RunReport`](super::events::RunReport) when the run ends.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parameters::AcquisitionParameters;
use crate::measurement::{JvCurve, PerformanceRecord};

/// One result collected during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Device identifier, with a direction suffix for sweep results
    pub device_id: String,
    /// Derived performance figures
    pub record: PerformanceRecord,
    /// Curve the record was derived from
    pub curve: JvCurve,
}

/// Results of one Start-to-Stop/Completion cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Run identifier
    pub id: Uuid,
    /// Wall-clock start of the run
    pub started_at: DateTime<Local>,
    /// Parameters the run was started with
    pub parameters: AcquisitionParameters,
    entries: Vec<SessionEntry>,
}

impl Session {
    /// Open a session for a run.
    pub fn new(id: Uuid, parameters: AcquisitionParameters) -> Self {
        Self {
            id,
            started_at: Local::now(),
            parameters,
            entries: Vec::new(),
        }
    }

    /// Append a result.
    pub fn record(
        &mut self,
        device_id: impl Into<String>,
        record: PerformanceRecord,
        curve: JvCurve,
    ) {
        self.entries.push(SessionEntry {
            device_id: device_id.into(),
            record,
            curve,
        });
    }

    /// All results in emission order.
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Results for one device id, in emission order.
    pub fn entries_for<'a>(
        &'a self,
        device_id: &'a str,
    ) -> impl Iterator<Item = &'a SessionEntry> + 'a {
        self.entries.iter().filter(move |e| e.device_id == device_id)
    }
}
