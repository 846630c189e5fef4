//! Search history and saved searches, persisted as JSON in the case
//! directory.
//!
//! History is a bounded ring of the most recent completed searches;
//! saved searches are an unbounded named set. Both survive process
//! restarts; writes go through a temp file and rename.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::params::SearchParameters;
use crate::SearchError;

pub const HISTORY_FILENAME: &str = ".crow_eye_search_history.json";
pub const SAVED_SEARCHES_FILENAME: &str = ".crow_eye_saved_searches.json";
pub const MAX_HISTORY_ENTRIES: usize = 20;

/// One completed search, as remembered by the history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub term: String,
    pub databases: Vec<String>,
    pub case_sensitive: bool,
    pub exact_match: bool,
    pub use_regex: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result_count: usize,
    pub execution_time_ms: u64,
}

impl SearchHistoryEntry {
    pub fn from_completed(
        params: &SearchParameters,
        result_count: usize,
        execution_time_ms: u64,
    ) -> Self {
        SearchHistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            term: params.term.clone(),
            databases: params.databases.clone(),
            case_sensitive: params.case_sensitive,
            exact_match: params.exact_match,
            use_regex: params.use_regex,
            start_time: params.start_time,
            end_time: params.end_time,
            result_count,
            execution_time_ms,
        }
    }
}

/// A named, replayable search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSearch {
    pub name: String,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub parameters: SearchParameters,
}

/// File-backed store for history and saved searches.
pub struct HistoryStore {
    history_path: PathBuf,
    saved_path: PathBuf,
}

impl HistoryStore {
    pub fn new(case_dir: &Path) -> Self {
        HistoryStore {
            history_path: case_dir.join(HISTORY_FILENAME),
            saved_path: case_dir.join(SAVED_SEARCHES_FILENAME),
        }
    }

    /// Prepend an entry and trim the ring. Callers only append searches
    /// that reached the Completed state.
    pub fn add_entry(&self, entry: SearchHistoryEntry) -> Result<(), SearchError> {
        let mut history = self.load_history()?;
        history.insert(0, entry);
        history.truncate(MAX_HISTORY_ENTRIES);
        write_atomic(&self.history_path, &serde_json::to_vec_pretty(&history)?)?;
        Ok(())
    }

    /// Newest-first history; missing or corrupt files read as empty.
    pub fn load_history(&self) -> Result<Vec<SearchHistoryEntry>, SearchError> {
        load_or_default(&self.history_path)
    }

    pub fn clear_history(&self) -> Result<(), SearchError> {
        if self.history_path.exists() {
            fs::remove_file(&self.history_path)?;
        }
        Ok(())
    }

    pub fn load_saved(&self) -> Result<Vec<SavedSearch>, SearchError> {
        load_or_default(&self.saved_path)
    }

    /// Insert or replace by name.
    pub fn save_named(&self, search: SavedSearch) -> Result<(), SearchError> {
        let mut saved = self.load_saved()?;
        saved.retain(|s| s.name != search.name);
        saved.push(search);
        saved.sort_by(|a, b| a.name.cmp(&b.name));
        write_atomic(&self.saved_path, &serde_json::to_vec_pretty(&saved)?)?;
        Ok(())
    }

    pub fn get_saved(&self, name: &str) -> Result<Option<SavedSearch>, SearchError> {
        Ok(self.load_saved()?.into_iter().find(|s| s.name == name))
    }

    pub fn delete_saved(&self, name: &str) -> Result<bool, SearchError> {
        let mut saved = self.load_saved()?;
        let before = saved.len();
        saved.retain(|s| s.name != name);
        let removed = saved.len() != before;
        if removed {
            write_atomic(&self.saved_path, &serde_json::to_vec_pretty(&saved)?)?;
        }
        Ok(removed)
    }

    /// Stamp a saved search as replayed now.
    pub fn touch_saved(&self, name: &str) -> Result<bool, SearchError> {
        let mut saved = self.load_saved()?;
        let mut touched = false;
        for search in &mut saved {
            if search.name == name {
                search.last_used = Some(Utc::now());
                touched = true;
            }
        }
        if touched {
            write_atomic(&self.saved_path, &serde_json::to_vec_pretty(&saved)?)?;
        }
        Ok(touched)
    }
}

fn load_or_default<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, SearchError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read(path)?;
    match serde_json::from_slice(&raw) {
        Ok(value) => Ok(value),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "unreadable history file; starting fresh");
            Ok(Vec::new())
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
