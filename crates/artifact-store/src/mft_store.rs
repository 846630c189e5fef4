//! Writer for the MFT analysis store.

use std::path::{Path, PathBuf};

use core_types::{file_attributes_to_text, MftAttribute, MftRecord};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::connection::{open_read_write, with_busy_retry, StoreTuning};
use crate::schema::{create_mft_schema, MFT_DB};
use crate::{sql_filetime, StoreResult};

/// Read-write handle on `mft_claw_analysis.db`.
pub struct MftStore {
    conn: Connection,
    path: PathBuf,
}

impl MftStore {
    /// Open (creating if needed) the MFT store under the artifacts
    /// directory.
    pub fn open(artifacts_dir: &Path, tuning: &StoreTuning) -> StoreResult<Self> {
        let path = artifacts_dir.join(MFT_DB);
        let conn = open_read_write(&path, tuning)?;
        create_mft_schema(&conn)?;
        Ok(MftStore { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a batch of records and their child rows in one
    /// transaction. Duplicate primary keys are ignored so re-running a
    /// pass over the same snapshot is idempotent.
    pub fn insert_records(&mut self, records: &[MftRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let conn = &mut self.conn;
        let inserted = with_busy_retry(|| {
            let tx = conn.transaction()?;
            let mut inserted = 0usize;
            {
                let mut main = tx.prepare_cached(
                    "INSERT OR IGNORE INTO mft_records (
                        record_number, file_name, volume_letter, extension,
                        file_size, in_use, is_directory, flags,
                        mft_sequence_number, has_ads, ads_count,
                        created_time, modified_time, accessed_time,
                        mft_modified_time, file_attributes)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                )?;
                let mut si = tx.prepare_cached(
                    "INSERT INTO mft_standard_info (
                        record_number, file_name, volume_letter,
                        created, modified, accessed, mft_modified,
                        flags, max_versions, version_number, class_id,
                        owner_id, security_id, quota_charged, usn)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                )?;
                let mut fname = tx.prepare_cached(
                    "INSERT INTO mft_file_names (
                        record_number, file_name, volume_letter,
                        parent_record, parent_sequence, parent_sequence_raw,
                        namespace, created, modified, accessed, mft_modified,
                        allocated_size, real_size, flags)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                )?;
                let mut data = tx.prepare_cached(
                    "INSERT INTO mft_data_attributes (
                        record_number, file_name, volume_letter,
                        attribute_name, resident, size)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                )?;

                for record in records {
                    let volume = record.volume.to_string();
                    let changed = main.execute(params![
                        record.record_number as i64,
                        record.primary_filename,
                        volume,
                        record.extension,
                        record.file_size as i64,
                        record.in_use,
                        record.is_directory,
                        record.flags,
                        record.sequence_number,
                        record.has_ads,
                        record.ads_count,
                        sql_filetime(record.created()),
                        sql_filetime(record.modified()),
                        sql_filetime(record.accessed()),
                        sql_filetime(record.mft_modified()),
                        record.file_attributes,
                    ])?;
                    if changed == 0 {
                        // Already present from a prior pass; child rows
                        // are present too.
                        continue;
                    }
                    inserted += 1;

                    for attr in &record.attributes {
                        match attr {
                            MftAttribute::StandardInformation(info) => {
                                si.execute(params![
                                    record.record_number as i64,
                                    record.primary_filename,
                                    volume,
                                    sql_filetime(info.created),
                                    sql_filetime(info.modified),
                                    sql_filetime(info.accessed),
                                    sql_filetime(info.mft_modified),
                                    info.flags,
                                    info.max_versions,
                                    info.version_number,
                                    info.class_id,
                                    info.owner_id,
                                    info.security_id,
                                    info.quota_charged.map(|q| q as i64),
                                    info.usn.map(|u| u as i64),
                                ])?;
                            }
                            MftAttribute::FileName(fn_attr) => {
                                fname.execute(params![
                                    record.record_number as i64,
                                    fn_attr.name,
                                    volume,
                                    fn_attr.parent.record as i64,
                                    fn_attr.parent.sequence,
                                    fn_attr.parent_sequence_raw,
                                    fn_attr.namespace,
                                    sql_filetime(fn_attr.created),
                                    sql_filetime(fn_attr.modified),
                                    sql_filetime(fn_attr.accessed),
                                    sql_filetime(fn_attr.mft_modified),
                                    fn_attr.allocated_size as i64,
                                    fn_attr.real_size as i64,
                                    fn_attr.flags,
                                ])?;
                            }
                            MftAttribute::Data(stream) => {
                                data.execute(params![
                                    record.record_number as i64,
                                    record.primary_filename,
                                    volume,
                                    stream.name.as_deref().unwrap_or(""),
                                    stream.resident,
                                    stream.size as i64,
                                ])?;
                            }
                            MftAttribute::AttributeList(_) | MftAttribute::Opaque { .. } => {}
                        }
                    }
                }
            }
            tx.commit()?;
            Ok(inserted)
        })?;

        debug!(batch = records.len(), inserted, "MFT batch committed");
        Ok(inserted)
    }

    pub fn record_count(&self) -> StoreResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM mft_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Text rendering of the standard-information attribute flags; used
    /// by reporting surfaces.
    pub fn attributes_text(record: &MftRecord) -> String {
        file_attributes_to_text(record.file_attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::mft::{MftDataStream, MftFileName, MftStandardInfo};
    use core_types::{FileTime, MftReference, VolumeId};
    use tempfile::tempdir;

    fn sample_record(n: u64, name: &str) -> MftRecord {
        let si = MftStandardInfo {
            created: FileTime(133_000_000_000_000_000),
            modified: FileTime(133_000_000_100_000_000),
            accessed: FileTime(133_000_000_200_000_000),
            mft_modified: FileTime(133_000_000_300_000_000),
            flags: 0x20,
            max_versions: 0,
            version_number: 0,
            class_id: 0,
            owner_id: None,
            security_id: None,
            quota_charged: None,
            usn: None,
        };
        let fname = MftFileName {
            parent: MftReference { record: 5, sequence: 1 },
            parent_sequence_raw: 0,
            created: si.created,
            modified: si.modified,
            accessed: si.accessed,
            mft_modified: si.mft_modified,
            allocated_size: 4096,
            real_size: 4000,
            flags: 0x20,
            reparse_value: 0,
            namespace: 1,
            name: name.to_string(),
        };
        MftRecord {
            volume: VolumeId::new('C').unwrap(),
            record_number: n,
            sequence_number: 2,
            flags: 1,
            in_use: true,
            is_directory: false,
            attributes: vec![
                MftAttribute::StandardInformation(si),
                MftAttribute::FileName(fname),
                MftAttribute::Data(MftDataStream {
                    name: None,
                    resident: true,
                    size: 4000,
                }),
                MftAttribute::Data(MftDataStream {
                    name: Some("Zone.Identifier".into()),
                    resident: true,
                    size: 26,
                }),
            ],
            primary_filename: name.to_string(),
            extension: "txt".into(),
            file_size: 4000,
            has_ads: true,
            ads_count: 1,
            file_attributes: 0x20,
        }
    }

    #[test]
    fn inserts_record_with_children() {
        let dir = tempdir().unwrap();
        let mut store = MftStore::open(dir.path(), &StoreTuning::default()).unwrap();

        let inserted = store
            .insert_records(&[sample_record(42, "a.txt"), sample_record(43, "b.txt")])
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.record_count().unwrap(), 2);

        let names: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM mft_file_names", [], |r| r.get(0))
            .unwrap();
        assert_eq!(names, 2);
        let streams: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM mft_data_attributes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(streams, 4);
    }

    #[test]
    fn rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut store = MftStore::open(dir.path(), &StoreTuning::default()).unwrap();
        let batch = vec![sample_record(42, "a.txt")];

        assert_eq!(store.insert_records(&batch).unwrap(), 1);
        assert_eq!(store.insert_records(&batch).unwrap(), 0);
        assert_eq!(store.record_count().unwrap(), 1);
        // Child tables did not double up either.
        let streams: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM mft_data_attributes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(streams, 2);
    }

    #[test]
    fn stores_raw_parent_sequence_alongside_coerced() {
        let dir = tempdir().unwrap();
        let mut store = MftStore::open(dir.path(), &StoreTuning::default()).unwrap();
        store.insert_records(&[sample_record(42, "a.txt")]).unwrap();

        let (coerced, raw): (i64, i64) = store
            .conn
            .query_row(
                "SELECT parent_sequence, parent_sequence_raw FROM mft_file_names",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(coerced, 1);
        assert_eq!(raw, 0);
    }
}
