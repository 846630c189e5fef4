//! Case-directory store discovery and metadata caching.
//!
//! Resolves each logical store in the catalog to an actual file
//! (canonical name, alternative filenames, then a `*.db` scan matched by
//! table signatures), introspects its schema, and detects timestamp
//! columns per table. Results are cached process-wide behind one mutex,
//! keyed by case directory; `force_refresh` or a case switch clears the
//! cache.

mod catalog;
mod manager;

pub use catalog::{gui_tab_for, StoreSpec, CATALOG};
pub use manager::{
    clear_cache, discover_with_metadata, introspect_database, EnhancedDatabaseInfo, TableInfo,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("case directory does not exist: {0}")]
    MissingCaseDirectory(String),
    #[error("store not accessible: {0}")]
    NotAccessible(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
