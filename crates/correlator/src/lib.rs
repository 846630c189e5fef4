//! MFT↔USN correlation.
//!
//! Joins the MFT analysis store and the journal store by MFT record
//! number (lower 48 bits of the file reference), reconstructs paths from
//! parent pointers, and materializes one correlated row per known
//! filename, enriched with rename timelines and namespace evolution.

mod engine;
mod paths;
mod report;

pub use engine::{correlate_stores, CorrelationStats};
pub use paths::{PathIndex, PathNode};
pub use report::{build_report, CorrelationReport, HotFile, RenameHotspot};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error(transparent)]
    Store(#[from] artifact_store::StoreError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type CorrelatorResult<T> = Result<T, CorrelatorError>;
