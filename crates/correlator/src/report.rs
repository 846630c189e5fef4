//! Summary statistics over a finished correlation.

use std::path::Path;
use std::time::Duration;

use artifact_store::open_read_only;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::CorrelatorResult;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One frequently-touched file in the correlated view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotFile {
    pub filename: String,
    pub path: String,
    pub row_count: u64,
}

/// A record with an unusually busy rename history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameHotspot {
    pub record_number: u64,
    pub rename_count: u64,
}

/// Aggregated view of a correlated store, for reporting surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub total_rows: u64,
    pub unique_records: u64,
    pub deleted_records: u64,
    pub unknown_parent_rows: u64,
    pub rows_with_usn: u64,
    pub filename_changes: u64,
    pub multi_name_records: u64,
    pub hot_files: Vec<HotFile>,
    pub rename_hotspots: Vec<RenameHotspot>,
}

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Build the report from the correlated store plus the MFT store's
/// rename history.
pub fn build_report(correlated_db: &Path, mft_db: &Path) -> CorrelatorResult<CorrelationReport> {
    let corr = open_read_only(correlated_db, READ_TIMEOUT)?;
    let mut report = CorrelationReport {
        total_rows: count(&corr, "SELECT COUNT(*) FROM mft_usn_correlated")?,
        unique_records: count(
            &corr,
            "SELECT COUNT(DISTINCT mft_record_number) FROM mft_usn_correlated",
        )?,
        deleted_records: count(
            &corr,
            "SELECT COUNT(*) FROM mft_usn_correlated WHERE is_deleted = 1",
        )?,
        unknown_parent_rows: count(
            &corr,
            "SELECT COUNT(*) FROM mft_usn_correlated
             WHERE reconstructed_path LIKE '%[Unknown Parent%'",
        )?,
        rows_with_usn: count(
            &corr,
            "SELECT COUNT(*) FROM mft_usn_correlated WHERE has_usn_event = 1",
        )?,
        ..CorrelationReport::default()
    };

    let mut hot = corr.prepare(
        "SELECT fn_filename, reconstructed_path, COUNT(*) AS rows
         FROM mft_usn_correlated
         WHERE fn_filename IS NOT NULL
         GROUP BY fn_filename, reconstructed_path
         ORDER BY rows DESC
         LIMIT 10",
    )?;
    report.hot_files = hot
        .query_map([], |row| {
            Ok(HotFile {
                filename: row.get(0)?,
                path: row.get(1)?,
                row_count: row.get::<_, i64>(2)? as u64,
            })
        })?
        .collect::<Result<_, _>>()?;

    // Rename history sits in the MFT store; tolerate its absence.
    let mft = open_read_only(mft_db, READ_TIMEOUT)?;
    let has_changes: Option<String> = mft
        .query_row(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name = 'filename_changes'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_changes.is_some() {
        report.filename_changes = count(&mft, "SELECT COUNT(*) FROM filename_changes")?;
        let mut renames = mft.prepare(
            "SELECT record_number, COUNT(*) AS renames
             FROM filename_changes
             GROUP BY record_number
             ORDER BY renames DESC
             LIMIT 5",
        )?;
        report.rename_hotspots = renames
            .query_map([], |row| {
                Ok(RenameHotspot {
                    record_number: row.get::<_, i64>(0)? as u64,
                    rename_count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<_, _>>()?;
    }
    report.multi_name_records = count(
        &mft,
        "SELECT COUNT(*) FROM (
             SELECT record_number
             FROM mft_file_names
             WHERE file_name IS NOT NULL AND file_name != ''
             GROUP BY record_number
             HAVING COUNT(DISTINCT file_name) > 1
         )",
    )?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection as RawConnection;
    use tempfile::tempdir;

    fn seed(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let corr_path = dir.join("mft_usn_correlated_analysis.db");
        let corr = RawConnection::open(&corr_path).unwrap();
        artifact_store::create_correlated_schema(&corr).unwrap();
        corr.execute_batch(
            "INSERT INTO mft_usn_correlated
                 (mft_record_number, fn_filename, reconstructed_path,
                  is_deleted, has_usn_event)
             VALUES
                 (42, 'a.txt', './docs/a.txt', 0, 1),
                 (42, 'a-old.txt', './docs/a-old.txt', 0, 0),
                 (77, 'gone.bin', '[Unknown Parent: 900]/gone.bin', 1, 0);",
        )
        .unwrap();

        let mft_path = dir.join("mft_claw_analysis.db");
        let mft = RawConnection::open(&mft_path).unwrap();
        artifact_store::create_mft_schema(&mft).unwrap();
        mft.execute_batch(
            "INSERT INTO filename_changes
                 (record_number, old_filename, new_filename,
                  change_timestamp, namespace, volume_letter)
             VALUES (42, 'a-old.txt', 'a.txt', '2024-06-02 00:00:00', 1, 'C');
             INSERT INTO mft_file_names
                 (record_number, file_name, volume_letter)
             VALUES (42, 'a-old.txt', 'C'), (42, 'a.txt', 'C'), (77, 'gone.bin', 'C');",
        )
        .unwrap();
        (corr_path, mft_path)
    }

    #[test]
    fn report_aggregates_both_stores() {
        let dir = tempdir().unwrap();
        let (corr_path, mft_path) = seed(dir.path());
        let report = build_report(&corr_path, &mft_path).unwrap();

        assert_eq!(report.total_rows, 3);
        assert_eq!(report.unique_records, 2);
        assert_eq!(report.deleted_records, 1);
        assert_eq!(report.unknown_parent_rows, 1);
        assert_eq!(report.rows_with_usn, 1);
        assert_eq!(report.filename_changes, 1);
        assert_eq!(report.multi_name_records, 1);
        assert_eq!(report.rename_hotspots.len(), 1);
        assert_eq!(report.rename_hotspots[0].record_number, 42);
        assert!(!report.hot_files.is_empty());
    }
}
