//! The correlation pass: load, join, insert, enrich.

use std::path::Path;
use std::time::Duration;

use ahash::AHashMap;
use artifact_store::{open_read_only, open_read_write, with_busy_retry, StoreTuning};
use core_types::mft::Namespace;
use core_types::{frn_record_number, VolumeId};
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::paths::{PathIndex, PathNode};
use crate::CorrelatorResult;

/// Rows inserted per transaction.
const INSERT_PAGE: usize = 1000;
/// Record ids per timeline-update batch.
const UPDATE_BATCH: usize = 1000;
/// Read-side busy timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Counters for one correlation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationStats {
    pub mft_rows: u64,
    pub usn_events_indexed: u64,
    pub correlated_rows: u64,
    pub rows_with_usn: u64,
    pub filename_changes: u64,
    pub timeline_updates: u64,
}

/// The most recent journal event for one MFT record.
struct LatestUsn {
    event_id: i64,
    timestamp: Option<String>,
    reason: Option<String>,
    source_info: Option<String>,
    file_attributes: Option<String>,
}

/// One joined filename row headed for `mft_usn_correlated`.
struct MftRow {
    record_number: i64,
    fn_filename: String,
    sequence_number: i64,
    flags: i64,
    is_directory: bool,
    in_use: bool,
    si_created: Option<String>,
    si_modified: Option<String>,
    si_accessed: Option<String>,
    si_mft_modified: Option<String>,
    si_file_attributes: Option<i64>,
    fn_parent_record: i64,
    fn_parent_sequence: i64,
    fn_namespace: i64,
    fn_created: Option<String>,
    fn_modified: Option<String>,
    fn_accessed: Option<String>,
    fn_mft_modified: Option<String>,
    fn_allocated_size: i64,
    fn_real_size: i64,
    fn_file_attributes: i64,
}

/// Run the full correlation for one volume: populate
/// `mft_usn_correlated`, extract `filename_changes`, then apply the
/// timeline and namespace-evolution updates.
pub fn correlate_stores(
    mft_db: &Path,
    usn_db: &Path,
    correlated_db: &Path,
    volume: VolumeId,
    tuning: &StoreTuning,
) -> CorrelatorResult<CorrelationStats> {
    let mut stats = CorrelationStats::default();
    let volume_text = volume.to_string();

    let mft_ro = open_read_only(mft_db, READ_TIMEOUT)?;
    let usn_ro = open_read_only(usn_db, READ_TIMEOUT)?;
    let mut corr = open_read_write(correlated_db, tuning)?;
    artifact_store::create_correlated_schema(&corr)?;
    // Each pass rebuilds the join from scratch; the UNIQUE constraint
    // only dedupes within a run (NULL usn columns compare distinct).
    corr.execute("DELETE FROM mft_usn_correlated", [])?;

    // Parent-pointer index over primary names; non-DOS rows win.
    let mut path_index = build_path_index(&mft_ro, &volume_text)?;

    // Latest journal event per MFT record, in journal (rowid) order so
    // later events overwrite earlier ones.
    let usn_index = build_usn_index(&usn_ro, &volume_text)?;
    stats.usn_events_indexed = usn_index.len() as u64;

    // Join and insert, paged by record number.
    let rows = load_mft_rows(&mft_ro, &volume_text)?;
    stats.mft_rows = rows.len() as u64;

    for page in rows.chunks(INSERT_PAGE) {
        let (inserted, with_usn) =
            insert_correlated_page(&mut corr, page, &usn_index, &mut path_index)?;
        stats.correlated_rows += inserted;
        stats.rows_with_usn += with_usn;
    }
    info!(
        rows = stats.correlated_rows,
        with_usn = stats.rows_with_usn,
        "correlated rows inserted"
    );

    // Rename history lives next to the MFT data it is derived from.
    let mft_rw = open_read_write(mft_db, tuning)?;
    stats.filename_changes = track_filename_changes(&mft_rw, &volume_text)?;
    drop(mft_rw);

    stats.timeline_updates = apply_forensic_updates(&mut corr, mft_db)?;

    Ok(stats)
}

fn build_path_index(mft: &Connection, volume: &str) -> CorrelatorResult<PathIndex> {
    // Order DOS names first so a later non-DOS row overwrites them.
    let mut stmt = mft.prepare(
        "SELECT record_number, file_name, parent_record
         FROM mft_file_names
         WHERE volume_letter = ?1
         ORDER BY (namespace = 2) DESC",
    )?;
    let mut nodes: AHashMap<u64, PathNode> = AHashMap::new();
    let mut rows = stmt.query(params![volume])?;
    while let Some(row) = rows.next()? {
        let record: i64 = row.get(0)?;
        let filename: String = row.get(1)?;
        let parent: i64 = row.get(2)?;
        nodes.insert(
            record as u64,
            PathNode {
                filename,
                parent_record: parent as u64,
            },
        );
    }
    Ok(PathIndex::new(nodes))
}

fn build_usn_index(usn: &Connection, volume: &str) -> CorrelatorResult<AHashMap<u64, LatestUsn>> {
    let mut stmt = usn.prepare(
        "SELECT rowid, frn, timestamp, reason, source_info, file_attributes
         FROM journal_events
         WHERE volume_letter = ?1
         ORDER BY rowid",
    )?;
    let mut index: AHashMap<u64, LatestUsn> = AHashMap::new();
    let mut rows = stmt.query(params![volume])?;
    while let Some(row) = rows.next()? {
        let frn: String = row.get(1)?;
        let Some(record) = frn_record_number(&frn) else {
            debug!(frn, "journal event with undecodable file reference");
            continue;
        };
        index.insert(
            record,
            LatestUsn {
                event_id: row.get(0)?,
                timestamp: row.get(2)?,
                reason: row.get(3)?,
                source_info: row.get(4)?,
                file_attributes: row.get(5)?,
            },
        );
    }
    Ok(index)
}

fn load_mft_rows(mft: &Connection, volume: &str) -> CorrelatorResult<Vec<MftRow>> {
    let mut stmt = mft.prepare(
        "SELECT r.record_number, f.file_name, r.mft_sequence_number, r.flags,
                r.is_directory, r.in_use,
                s.created, s.modified, s.accessed, s.mft_modified, s.flags,
                f.parent_record, f.parent_sequence, f.namespace,
                f.created, f.modified, f.accessed, f.mft_modified,
                f.allocated_size, f.real_size, f.flags
         FROM mft_records r
         JOIN mft_file_names f
           ON f.record_number = r.record_number
          AND f.volume_letter = r.volume_letter
         LEFT JOIN mft_standard_info s
           ON s.record_number = r.record_number
          AND s.volume_letter = r.volume_letter
         WHERE r.volume_letter = ?1
         ORDER BY r.record_number, f.rowid",
    )?;
    let rows = stmt
        .query_map(params![volume], |row| {
            Ok(MftRow {
                record_number: row.get(0)?,
                fn_filename: row.get(1)?,
                sequence_number: row.get(2)?,
                flags: row.get(3)?,
                is_directory: row.get(4)?,
                in_use: row.get(5)?,
                si_created: row.get(6)?,
                si_modified: row.get(7)?,
                si_accessed: row.get(8)?,
                si_mft_modified: row.get(9)?,
                si_file_attributes: row.get(10)?,
                fn_parent_record: row.get(11)?,
                fn_parent_sequence: row.get(12)?,
                fn_namespace: row.get(13)?,
                fn_created: row.get(14)?,
                fn_modified: row.get(15)?,
                fn_accessed: row.get(16)?,
                fn_mft_modified: row.get(17)?,
                fn_allocated_size: row.get(18)?,
                fn_real_size: row.get(19)?,
                fn_file_attributes: row.get(20)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn insert_correlated_page(
    corr: &mut Connection,
    page: &[MftRow],
    usn_index: &AHashMap<u64, LatestUsn>,
    path_index: &mut PathIndex,
) -> CorrelatorResult<(u64, u64)> {
    // Paths are memoized across pages; compute outside the retry loop so
    // a busy replay does not re-walk the graph.
    let paths: Vec<String> = page
        .iter()
        .map(|row| path_index.reconstruct(row.record_number as u64))
        .collect();

    let result = with_busy_retry(|| {
        let tx = corr.transaction()?;
        let mut inserted = 0u64;
        let mut with_usn = 0u64;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO mft_usn_correlated (
                    mft_record_number, fn_filename, mft_sequence_number,
                    mft_flags, is_directory, is_deleted,
                    si_creation_time, si_modification_time, si_access_time,
                    si_mft_entry_change_time, si_file_attributes,
                    fn_parent_record_number, fn_parent_sequence_number,
                    fn_namespace, fn_creation_time, fn_modification_time,
                    fn_access_time, fn_mft_entry_change_time,
                    fn_allocated_size, fn_real_size, fn_file_attributes,
                    reconstructed_path,
                    usn_event_id, usn_timestamp, usn_reason,
                    usn_source_info, usn_file_attributes,
                    has_mft_record, has_usn_event, correlation_confidence)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,
                         ?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26,
                         ?27,?28,?29,?30)",
            )?;
            for (row, path) in page.iter().zip(&paths) {
                let latest = usn_index.get(&(row.record_number as u64));
                let confidence = if latest.is_some() { "HIGH" } else { "MEDIUM" };
                let changed = stmt.execute(params![
                    row.record_number,
                    row.fn_filename,
                    row.sequence_number,
                    core_types::file_attributes_to_text(row.flags as u32),
                    row.is_directory,
                    !row.in_use,
                    row.si_created,
                    row.si_modified,
                    row.si_accessed,
                    row.si_mft_modified,
                    row.si_file_attributes
                        .map(|f| core_types::file_attributes_to_text(f as u32)),
                    row.fn_parent_record,
                    row.fn_parent_sequence,
                    Namespace::name_of(row.fn_namespace as u8),
                    row.fn_created,
                    row.fn_modified,
                    row.fn_accessed,
                    row.fn_mft_modified,
                    row.fn_allocated_size,
                    row.fn_real_size,
                    core_types::file_attributes_to_text(row.fn_file_attributes as u32),
                    path,
                    latest.map(|u| u.event_id),
                    latest.and_then(|u| u.timestamp.clone()),
                    latest.and_then(|u| u.reason.clone()),
                    latest.and_then(|u| u.source_info.clone()),
                    latest.and_then(|u| u.file_attributes.clone()),
                    true,
                    latest.is_some(),
                    confidence,
                ])?;
                if changed > 0 {
                    inserted += 1;
                    if latest.is_some() {
                        with_usn += 1;
                    }
                }
            }
        }
        tx.commit()?;
        Ok((inserted, with_usn))
    })?;
    Ok(result)
}

/// Extract rename events with a window function: one change row whenever
/// the name differs from its predecessor within the record's history,
/// ordered by the FILE_NAME modification time.
fn track_filename_changes(mft: &Connection, volume: &str) -> CorrelatorResult<u64> {
    mft.execute(
        "DELETE FROM filename_changes WHERE volume_letter = ?1",
        params![volume],
    )?;
    let inserted = mft.execute(
        "INSERT INTO filename_changes (
             record_number, old_filename, new_filename,
             change_timestamp, namespace, volume_letter)
         SELECT record_number, prev_file_name, file_name,
                modified, namespace, volume_letter
         FROM (
             SELECT record_number, volume_letter, file_name, namespace,
                    modified,
                    LAG(file_name) OVER (
                        PARTITION BY record_number, volume_letter
                        ORDER BY modified
                    ) AS prev_file_name
             FROM mft_file_names
             WHERE volume_letter = ?1
         )
         WHERE prev_file_name IS NOT NULL
           AND prev_file_name != file_name",
        params![volume],
    )?;
    Ok(inserted as u64)
}

/// Apply the timeline and namespace-evolution strings to correlated
/// rows, in bounded batches of record ids.
fn apply_forensic_updates(corr: &mut Connection, mft_db: &Path) -> CorrelatorResult<u64> {
    corr.execute(
        "ATTACH DATABASE ?1 AS mft_db",
        params![format!("file:{}?mode=ro", mft_db.display())],
    )?;

    let result = (|| -> CorrelatorResult<u64> {
        let mut updated = 0u64;
        let mut offset = 0usize;
        loop {
            let ids: Vec<i64> = {
                let mut stmt = corr.prepare(
                    "SELECT DISTINCT mft_record_number FROM mft_usn_correlated
                     ORDER BY mft_record_number LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(params![UPDATE_BATCH, offset], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            if ids.is_empty() {
                break;
            }

            let placeholders = std::iter::repeat("?")
                .take(ids.len())
                .collect::<Vec<_>>()
                .join(",");

            let timeline_sql = format!(
                "WITH change_timeline AS (
                     SELECT record_number,
                            GROUP_CONCAT(
                                old_filename || ' -> ' || new_filename ||
                                ' (' || change_timestamp || ')',
                                ' | '
                            ) AS timeline
                     FROM mft_db.filename_changes
                     WHERE record_number IN ({placeholders})
                     GROUP BY record_number
                 )
                 UPDATE mft_usn_correlated
                 SET filename_change_timeline = (
                     SELECT timeline FROM change_timeline ct
                     WHERE ct.record_number = mft_usn_correlated.mft_record_number
                 )
                 WHERE mft_record_number IN ({placeholders})"
            );
            let evolution_sql = format!(
                "WITH namespace_evolution AS (
                     SELECT record_number,
                            GROUP_CONCAT(
                                CASE
                                    WHEN namespace = 0 THEN 'POSIX'
                                    WHEN namespace = 1 THEN 'Win32'
                                    WHEN namespace = 2 THEN 'DOS'
                                    WHEN namespace = 3 THEN 'Win32 & DOS'
                                    ELSE 'Unknown'
                                END,
                                ' -> '
                            ) AS evolution
                     FROM mft_db.filename_changes
                     WHERE record_number IN ({placeholders})
                     GROUP BY record_number
                 )
                 UPDATE mft_usn_correlated
                 SET namespace_evolution = (
                     SELECT evolution FROM namespace_evolution ne
                     WHERE ne.record_number = mft_usn_correlated.mft_record_number
                 )
                 WHERE mft_record_number IN ({placeholders})"
            );

            let doubled: Vec<i64> = ids.iter().chain(ids.iter()).copied().collect();
            corr.execute(&timeline_sql, params_from_iter(doubled.iter()))?;
            corr.execute(&evolution_sql, params_from_iter(doubled.iter()))?;

            updated += ids.len() as u64;
            offset += ids.len();
        }
        Ok(updated)
    })();

    corr.execute("DETACH DATABASE mft_db", [])?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifact_store::{MftStore, UsnStore};
    use chrono::{TimeZone, Utc};
    use core_types::mft::{MftAttribute, MftDataStream, MftFileName, MftStandardInfo};
    use core_types::{FileTime, MftRecord, MftReference, UsnEvent};
    use tempfile::tempdir;

    fn vol() -> VolumeId {
        VolumeId::new('C').unwrap()
    }

    fn ft(day: u32, hour: u32) -> FileTime {
        FileTime::from_datetime(Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap())
    }

    fn file_name(parent: u64, namespace: u8, name: &str, modified: FileTime) -> MftFileName {
        MftFileName {
            parent: MftReference { record: parent, sequence: 1 },
            parent_sequence_raw: 1,
            created: ft(1, 0),
            modified,
            accessed: ft(1, 0),
            mft_modified: ft(1, 0),
            allocated_size: 4096,
            real_size: 4000,
            flags: 0x20,
            reparse_value: 0,
            namespace,
            name: name.to_string(),
        }
    }

    fn record(n: u64, in_use: bool, names: Vec<MftFileName>) -> MftRecord {
        let si = MftStandardInfo {
            created: ft(1, 0),
            modified: ft(1, 1),
            accessed: ft(1, 2),
            mft_modified: ft(1, 3),
            flags: 0x20,
            max_versions: 0,
            version_number: 0,
            class_id: 0,
            owner_id: None,
            security_id: None,
            quota_charged: None,
            usn: None,
        };
        let primary = names
            .iter()
            .find(|f| f.namespace != 2)
            .or(names.first())
            .map(|f| f.name.clone())
            .unwrap_or_default();
        let mut attributes = vec![MftAttribute::StandardInformation(si)];
        attributes.extend(names.into_iter().map(MftAttribute::FileName));
        attributes.push(MftAttribute::Data(MftDataStream {
            name: None,
            resident: true,
            size: 4000,
        }));
        MftRecord {
            volume: vol(),
            record_number: n,
            sequence_number: 1,
            flags: if in_use { 1 } else { 0 },
            in_use,
            is_directory: false,
            attributes,
            primary_filename: primary.clone(),
            extension: core_types::mft::extension_of(&primary),
            file_size: 4000,
            has_ads: false,
            ads_count: 0,
            file_attributes: 0x20,
        }
    }

    fn usn_event(usn: i64, record: u64, name: &str, day: u32) -> UsnEvent {
        let frn = (1u64 << 48) | record;
        UsnEvent {
            volume: vol(),
            usn,
            major_version: 2,
            frn: frn.to_string(),
            parent_frn: ((1u64 << 48) | 5).to_string(),
            timestamp: ft(day, 12),
            reason: 0x100,
            source_info: 0,
            security_id: 0,
            file_attributes: 0x20,
            file_name: name.to_string(),
            record_length: 96,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        mft_db: std::path::PathBuf,
        usn_db: std::path::PathBuf,
        corr_db: std::path::PathBuf,
    }

    fn build_fixture(records: Vec<MftRecord>, events: Vec<UsnEvent>) -> Fixture {
        let dir = tempdir().unwrap();
        let tuning = StoreTuning::default();
        let mut mft = MftStore::open(dir.path(), &tuning).unwrap();
        mft.insert_records(&records).unwrap();
        let mft_db = mft.path().to_path_buf();
        drop(mft);

        let mut usn = UsnStore::open(dir.path(), &tuning).unwrap();
        usn.insert_events(&events).unwrap();
        let usn_db = usn.path().to_path_buf();
        drop(usn);

        let corr_db = dir.path().join(artifact_store::CORRELATED_DB);
        Fixture {
            _dir: dir,
            mft_db,
            usn_db,
            corr_db,
        }
    }

    #[test]
    fn correlates_with_most_recent_usn_event() {
        // Directory tree: 5 (root) / 10 (docs) / 42 (a.txt); two journal
        // events for record 42, the later one must win.
        let records = vec![
            record(5, true, vec![file_name(5, 3, ".", ft(1, 0))]),
            record(10, true, vec![file_name(5, 1, "docs", ft(1, 0))]),
            record(42, true, vec![file_name(10, 1, "a.txt", ft(2, 0))]),
        ];
        let events = vec![
            usn_event(100, 42, "a.txt", 2),
            usn_event(200, 42, "a.txt", 3),
        ];
        let fx = build_fixture(records, events);

        let stats = correlate_stores(
            &fx.mft_db,
            &fx.usn_db,
            &fx.corr_db,
            vol(),
            &StoreTuning::default(),
        )
        .unwrap();
        assert_eq!(stats.mft_rows, 3);
        assert_eq!(stats.correlated_rows, 3);
        assert_eq!(stats.rows_with_usn, 1);

        let conn = Connection::open(&fx.corr_db).unwrap();
        let (path, usn, confidence, has_usn): (String, i64, String, bool) = conn
            .query_row(
                "SELECT reconstructed_path, usn_event_id, correlation_confidence,
                        has_usn_event
                 FROM mft_usn_correlated WHERE mft_record_number = 42",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(path, "./docs/a.txt");
        assert!(has_usn);
        assert_eq!(confidence, "HIGH");
        // Event id 2 is the second inserted row.
        assert_eq!(usn, 2);

        let medium: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM mft_usn_correlated
                 WHERE correlation_confidence = 'MEDIUM'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(medium, 2);
    }

    #[test]
    fn filename_change_detection_matches_window_semantics() {
        // Record 42 history: A.txt at t1, B.txt at t2, B.txt at t3.
        // Exactly one change row: A.txt -> B.txt at t2.
        let records = vec![
            record(5, true, vec![file_name(5, 3, ".", ft(1, 0))]),
            record(
                42,
                true,
                vec![
                    file_name(5, 1, "A.txt", ft(1, 0)),
                    file_name(5, 1, "B.txt", ft(2, 0)),
                    file_name(5, 2, "B.txt", ft(3, 0)),
                ],
            ),
        ];
        let fx = build_fixture(records, vec![]);

        let stats = correlate_stores(
            &fx.mft_db,
            &fx.usn_db,
            &fx.corr_db,
            vol(),
            &StoreTuning::default(),
        )
        .unwrap();
        assert_eq!(stats.filename_changes, 1);

        let mft = Connection::open(&fx.mft_db).unwrap();
        let (old, new, ts): (String, String, String) = mft
            .query_row(
                "SELECT old_filename, new_filename, change_timestamp
                 FROM filename_changes WHERE record_number = 42",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(old, "A.txt");
        assert_eq!(new, "B.txt");
        assert_eq!(ts, "2024-06-02 00:00:00");

        // The correlated rows carry the rendered timeline.
        let corr = Connection::open(&fx.corr_db).unwrap();
        let timeline: String = corr
            .query_row(
                "SELECT filename_change_timeline FROM mft_usn_correlated
                 WHERE mft_record_number = 42 LIMIT 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(timeline, "A.txt -> B.txt (2024-06-02 00:00:00)");
    }

    #[test]
    fn correlated_join_respects_frn_lower_48() {
        // Event FRN carries sequence 1 in the high 16 bits; the join must
        // still land on record 42.
        let records = vec![
            record(5, true, vec![file_name(5, 3, ".", ft(1, 0))]),
            record(42, true, vec![file_name(5, 1, "joined.txt", ft(2, 0))]),
        ];
        let events = vec![usn_event(500, 42, "joined.txt", 2)];
        let fx = build_fixture(records, events);

        correlate_stores(
            &fx.mft_db,
            &fx.usn_db,
            &fx.corr_db,
            vol(),
            &StoreTuning::default(),
        )
        .unwrap();

        let conn = Connection::open(&fx.corr_db).unwrap();
        // Every row with has_usn_event joins an existing journal event
        // whose lower-48 FRN equals the record number.
        conn.execute(
            "ATTACH DATABASE ?1 AS usn_db",
            params![format!("file:{}?mode=ro", fx.usn_db.display())],
        )
        .unwrap();
        let orphan: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM mft_usn_correlated c
                 WHERE c.has_usn_event = 1 AND NOT EXISTS (
                     SELECT 1 FROM usn_db.journal_events j
                     WHERE j.rowid = c.usn_event_id
                       AND (CAST(j.frn AS INTEGER) & 281474976710655)
                           = c.mft_record_number
                 )",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(orphan, 0);
    }

    #[test]
    fn deleted_records_flagged() {
        let records = vec![record(7, false, vec![file_name(5, 1, "gone.txt", ft(1, 0))])];
        let fx = build_fixture(records, vec![]);
        correlate_stores(
            &fx.mft_db,
            &fx.usn_db,
            &fx.corr_db,
            vol(),
            &StoreTuning::default(),
        )
        .unwrap();
        let conn = Connection::open(&fx.corr_db).unwrap();
        let is_deleted: bool = conn
            .query_row(
                "SELECT is_deleted FROM mft_usn_correlated WHERE mft_record_number = 7",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(is_deleted);
    }

    #[test]
    fn rerun_is_idempotent() {
        let records = vec![
            record(5, true, vec![file_name(5, 3, ".", ft(1, 0))]),
            record(42, true, vec![file_name(5, 1, "a.txt", ft(2, 0))]),
        ];
        let events = vec![usn_event(100, 42, "a.txt", 2)];
        let fx = build_fixture(records, events);

        let tuning = StoreTuning::default();
        let first = correlate_stores(&fx.mft_db, &fx.usn_db, &fx.corr_db, vol(), &tuning).unwrap();
        let second = correlate_stores(&fx.mft_db, &fx.usn_db, &fx.corr_db, vol(), &tuning).unwrap();
        assert_eq!(first.correlated_rows, 2);
        assert_eq!(second.correlated_rows, 2);

        // The rebuild replaces, never accumulates.
        let conn = Connection::open(&fx.corr_db).unwrap();
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM mft_usn_correlated", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 2);
    }
}
