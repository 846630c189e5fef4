//! SQLite-backed artifact stores.
//!
//! Each artifact kind gets its own database under
//! `<case>/Target_Artifacts/`; this crate owns the schemas, the
//! connection tuning, and the batched writers. Exactly one writer opens
//! a store read-write at a time; search-side readers open with
//! `file:<path>?mode=ro`.

mod connection;
mod mft_store;
mod schema;
mod usn_store;

pub use connection::{open_read_only, open_read_write, with_busy_retry, StoreTuning};
pub use mft_store::MftStore;
pub use schema::{
    create_correlated_schema, create_mft_schema, create_usn_schema, CORRELATED_DB, MFT_DB, USN_DB,
};
pub use usn_store::{InsertOutcome, UsnStore};

use thiserror::Error;

/// Store-level failures. Busy conditions are retried up to three times
/// before they surface here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database busy after retries: {0}")]
    Busy(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

use chrono::{DateTime, SecondsFormat, Utc};
use core_types::FileTime;

/// Render a datetime the way every store column stores time: sortable
/// `YYYY-MM-DD HH:MM:SS` UTC text.
pub fn sql_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Deterministic TEXT adaptation of a FILETIME; NULL for "no time".
pub fn sql_filetime(ft: FileTime) -> Option<String> {
    ft.to_datetime().map(sql_datetime)
}

/// Insertion timestamp for audit columns.
pub fn sql_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sql_datetime_is_sortable_utc() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap();
        assert_eq!(sql_datetime(dt), "2024-06-01 12:30:45");
    }

    #[test]
    fn sql_filetime_null_for_no_time() {
        assert_eq!(sql_filetime(FileTime::ZERO), None);
        let dt = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let ft = FileTime::from_datetime(dt);
        assert_eq!(sql_filetime(ft).as_deref(), Some("2024-06-01 00:00:00"));
    }
}
