//! Acquisition orchestration.
//!
//! - [`parameters`]: validated per-run parameter snapshot
//! - [`layout`]: substrate grid, visit order and device identifiers
//! - [`state`]: the orchestrator's state machine
//! - [`events`]: typed events flowing out of a run
//! - [`session`]: per-run result accounting
//! - [`engine`]: the background worker tying it together

pub mod engine;
pub mod events;
pub mod layout;
pub mod parameters;
pub mod session;
pub mod state;

pub use engine::{AcquisitionEngine, AcquisitionRequest};
pub use events::{
    AcquisitionEvent, CellEvent, CellProgress, ErrorEvent, ResultEvent, RunOutcome, RunReport,
    StatusEvent,
};
pub use layout::{CellPosition, GridCell, SubstrateGrid, VisitOrder, MAX_SLOTS};
pub use parameters::AcquisitionParameters;
pub use session::{Session, SessionEntry};
pub use state::AcquisitionState;
