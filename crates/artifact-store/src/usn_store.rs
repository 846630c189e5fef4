//! Writer for the USN journal store.

use std::path::{Path, PathBuf};

use core_types::{file_attributes_to_text, UsnEvent, UsnGap};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::connection::{open_read_write, with_busy_retry, StoreTuning};
use crate::schema::{create_usn_schema, USN_DB};
use crate::{sql_now, StoreResult};

/// Outcome of one batched insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Read-write handle on `USN_journal.db`.
pub struct UsnStore {
    conn: Connection,
    path: PathBuf,
}

impl UsnStore {
    pub fn open(artifacts_dir: &Path, tuning: &StoreTuning) -> StoreResult<Self> {
        let path = artifacts_dir.join(USN_DB);
        let conn = open_read_write(&path, tuning)?;
        create_usn_schema(&conn)?;
        Ok(UsnStore { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a batch of events in one transaction; duplicates on
    /// `(volume_letter, usn)` are dropped and counted.
    pub fn insert_events(&mut self, events: &[UsnEvent]) -> StoreResult<InsertOutcome> {
        if events.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let conn = &mut self.conn;
        let outcome = with_busy_retry(|| {
            let tx = conn.transaction()?;
            let mut inserted = 0usize;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO journal_events (
                        volume_letter, filename, usn, major_version, frn,
                        parent_frn, timestamp, reason, source_info,
                        security_id, file_attributes, record_length,
                        inserted_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                )?;
                let now = sql_now();
                for event in events {
                    inserted += stmt.execute(params![
                        event.volume.to_string(),
                        event.file_name,
                        event.usn,
                        event.major_version,
                        event.frn,
                        event.parent_frn,
                        crate::sql_filetime(event.timestamp),
                        event.reason_text(),
                        event.source_info_text(),
                        event.security_id,
                        file_attributes_to_text(event.file_attributes),
                        event.record_length,
                        now,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })?;

        debug!(batch = events.len(), inserted = outcome, "USN batch committed");
        Ok(InsertOutcome {
            inserted: outcome,
            duplicates: events.len() - outcome,
        })
    }

    /// Record journal wrap gaps; keyed by `(volume_letter, gap_start_usn)`.
    pub fn insert_gaps(&mut self, gaps: &[UsnGap]) -> StoreResult<usize> {
        if gaps.is_empty() {
            return Ok(0);
        }
        let conn = &mut self.conn;
        let inserted = with_busy_retry(|| {
            let tx = conn.transaction()?;
            let mut inserted = 0usize;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO deleted_entries (
                        volume_letter, gap_start_usn, gap_end_usn, gap_size,
                        detection_timestamp, last_known_usn, next_valid_usn,
                        forensic_significance, potential_activity, inserted_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                )?;
                let now = sql_now();
                for gap in gaps {
                    let significance = gap.significance();
                    inserted += stmt.execute(params![
                        gap.volume.to_string(),
                        gap.gap_start_usn,
                        gap.gap_end_usn,
                        gap.gap_size(),
                        crate::sql_filetime(gap.detection_time),
                        gap.gap_start_usn,
                        gap.gap_end_usn,
                        significance.name(),
                        significance.potential_activity(),
                        now,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })?;
        Ok(inserted)
    }

    pub fn event_count(&self) -> StoreResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM journal_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
