//! Connection opening and tuning shared by every store.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::{StoreError, StoreResult};

/// Writers retry a busy transaction this many times before the pass
/// aborts.
const BUSY_RETRIES: usize = 3;

/// SQLite tuning knobs drawn from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct StoreTuning {
    pub cache_size_bytes: u64,
    pub enable_wal: bool,
    pub busy_timeout: Duration,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            cache_size_bytes: 64 * 1024 * 1024,
            enable_wal: true,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

/// Open a store read-write for the single writer of a pass.
pub fn open_read_write(path: &Path, tuning: &StoreTuning) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(tuning.busy_timeout)?;
    if tuning.enable_wal {
        // Returns the resulting mode; a shared-media store may refuse.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), mode, "journal mode set");
    }
    // Negative cache_size is KiB units.
    let cache_kib = -((tuning.cache_size_bytes / 1024) as i64);
    conn.pragma_update(None, "cache_size", cache_kib)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// Read-only open for search-side consumers: URI `file:<path>?mode=ro`
/// so a concurrent writer cannot be disturbed.
pub fn open_read_only(path: &Path, busy_timeout: Duration) -> StoreResult<Connection> {
    let uri = format!("file:{}?mode=ro", path.display());
    let conn = Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Run `op` (typically one whole transaction) with busy retries. After
/// three busy failures the error surfaces as a pass-level failure.
pub fn with_busy_retry<T>(
    mut op: impl FnMut() -> Result<T, rusqlite::Error>,
) -> StoreResult<T> {
    let mut last_message = String::new();
    for attempt in 0..BUSY_RETRIES {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) => {
                debug!(attempt = attempt + 1, error = %err, "store busy; retrying");
                last_message = err.to_string();
            }
            Err(err) => return Err(StoreError::Sqlite(err)),
        }
    }
    Err(StoreError::Busy(last_message))
}
