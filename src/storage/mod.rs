//! Result persistence.
//!
//! The acquisition engine never writes files itself. A [`ResultSink`] consumes
//! the engine's [`ResultEvent`]s and decides what reaches durable storage,
//! honouring each event's `persist` flag.

pub mod csv_writer;

pub use csv_writer::CsvResultWriter;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::acquisition::{AcquisitionParameters, ResultEvent};
use crate::error::DaqError;

/// Consumer of measurement results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Prepare for a run started with `parameters`.
    async fn begin(&mut self, parameters: &AcquisitionParameters) -> Result<(), DaqError>;

    /// Handle one result. Returns the file written, if this result completed one.
    async fn write(&mut self, result: &ResultEvent) -> Result<Option<PathBuf>, DaqError>;

    /// Write out anything still buffered (e.g. a tracking run cut short by a stop).
    async fn flush(&mut self) -> Result<Vec<PathBuf>, DaqError>;
}
