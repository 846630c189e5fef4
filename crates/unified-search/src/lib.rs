//! Unified, time-filtered search across every discovered artifact store.
//!
//! A search runs a term (literal or regex) plus an optional UTC time
//! window over the selected stores and tables. SQL only ever pre-filters
//! by time with bound parameters; term matching and the authoritative
//! time check happen in memory over each returned row. Cancellation is a
//! cooperative flag checked between databases and tables.

mod engine;
mod history;
mod params;

pub use engine::{
    run_search, CancelToken, DatabaseSearchResults, SearchProgress, SearchReport, SearchResult,
    SearchState, TimestampMatch,
};
pub use history::{HistoryStore, SavedSearch, SearchHistoryEntry, MAX_HISTORY_ENTRIES};
pub use params::{SearchParameters, TermMatcher};

use thiserror::Error;

/// Failures surfaced to the caller. Validation failures are synchronous
/// and block the run; runtime failures complete the worker with an
/// error signal.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search term is empty")]
    EmptyTerm,
    #[error("search term exceeds {0} characters")]
    TermTooLong(usize),
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(String),
    #[error("time window start is after end")]
    InvertedTimeWindow,
    #[error(transparent)]
    Discovery(#[from] discovery::DiscoveryError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history serialization error: {0}")]
    History(#[from] serde_json::Error),
}
