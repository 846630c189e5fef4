//! Volume passes: MFT parse, USN read, correlation.
//!
//! Each pass is single-volume and single-threaded inside its worker;
//! callers may run one worker per volume in parallel, but a volume's
//! correlation only starts after its MFT and USN passes finish. The
//! pass bodies are generic over the volume/journal ports so the batch
//! and cancellation behavior is testable without a live volume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use artifact_store::{MftStore, StoreTuning, UsnStore};
use core_types::config::AppConfig;
use core_types::VolumeId;
use mft_parser::{MftRecordStream, ParserOptions};
use ntfs_volume::{SectorSource, VolumeReader};
use tracing::info;
use usn_journal::{run_read_loop, ExclusionFilter, JournalIo, UsnReadConfig};

/// Records between progress reports during an MFT pass.
const PROGRESS_INTERVAL: u64 = 500;

/// Outcome of one MFT pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MftPassStats {
    pub records_read: u64,
    pub records_parsed: u64,
    pub records_skipped: u64,
    pub records_inserted: u64,
    pub slack_candidates: u64,
    pub elapsed: Duration,
}

/// Outcome of one USN pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsnPassStats {
    pub events_emitted: u64,
    pub events_inserted: u64,
    pub duplicates_dropped: u64,
    pub events_excluded: u64,
    pub gaps_recorded: u64,
    pub elapsed: Duration,
}

pub use correlator::{CorrelationReport, CorrelationStats};

fn tuning_from(config: &AppConfig) -> StoreTuning {
    StoreTuning {
        cache_size_bytes: config.store.database_cache_size,
        enable_wal: config.store.enable_wal_mode,
        busy_timeout: Duration::from_secs(30),
    }
}

fn usn_read_config(config: &AppConfig) -> UsnReadConfig {
    UsnReadConfig {
        buffer_size: config.usn.read_buffer_size,
        max_processing_time: Duration::from_secs(config.usn.max_processing_time_s),
        stall_detection: Duration::from_secs(config.usn.stall_detection_s),
    }
}

/// Exclusions covering the engine's own store files.
fn self_exclusion_filter() -> ExclusionFilter {
    ExclusionFilter::new(
        [
            artifact_store::MFT_DB,
            artifact_store::USN_DB,
            artifact_store::CORRELATED_DB,
        ]
        .into_iter()
        .map(str::to_string),
    )
}

/// Stream a volume's MFT into the analysis store.
///
/// Records are inserted in batches of `store.batch_size`; progress is
/// reported every 500 records and the cancel flag is polled on the same
/// cadence. On cancel the in-flight batch is dropped, not committed.
pub fn run_mft_pass<S: SectorSource>(
    reader: &mut VolumeReader<S>,
    volume: VolumeId,
    store: &mut MftStore,
    config: &AppConfig,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(u64),
) -> Result<MftPassStats> {
    let started = Instant::now();
    let options = ParserOptions {
        max_resident_file_size: config.store.max_resident_file_size,
        ..ParserOptions::default()
    };
    let mut stream = MftRecordStream::with_options(reader, volume, options);

    let mut stats = MftPassStats::default();
    let mut batch = Vec::with_capacity(config.store.batch_size);
    let mut seen = 0u64;
    let mut cancelled = false;

    for record in stream.by_ref() {
        batch.push(record);
        seen += 1;

        if batch.len() >= config.store.batch_size {
            stats.records_inserted += store.insert_records(&batch)? as u64;
            batch.clear();
        }
        if seen % PROGRESS_INTERVAL == 0 {
            on_progress(seen);
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
        }
    }
    if !cancelled && !batch.is_empty() {
        stats.records_inserted += store.insert_records(&batch)? as u64;
    }

    let stream_stats = stream.stats();
    stats.records_read = stream_stats.records_read;
    stats.records_parsed = stream_stats.records_parsed;
    stats.records_skipped = stream_stats.records_skipped;
    stats.slack_candidates = stream_stats.slack_candidates;
    stats.elapsed = started.elapsed();

    info!(
        volume = %volume,
        parsed = stats.records_parsed,
        skipped = stats.records_skipped,
        inserted = stats.records_inserted,
        cancelled,
        "MFT pass finished"
    );
    Ok(stats)
}

/// Drain the change journal into the USN store, batching inserts and
/// recording wrap gaps.
pub fn run_usn_pass<IO: JournalIo>(
    io: &mut IO,
    volume: VolumeId,
    store: &mut UsnStore,
    config: &AppConfig,
) -> Result<UsnPassStats> {
    let started = Instant::now();
    let read_config = usn_read_config(config);
    let filter = self_exclusion_filter();

    let batch_limit = config.store.batch_size.min(1000);
    let mut pending = Vec::with_capacity(batch_limit);
    let mut gaps = Vec::new();
    let mut inserted = 0usize;
    let mut duplicates = 0usize;

    // The read loop hands events over one at a time; flush to the store
    // whenever a batch fills. The borrow of `store` inside the sink
    // keeps flushing local to this function.
    let loop_stats = {
        let mut flush_err: Option<anyhow::Error> = None;
        let stats = run_read_loop(
            io,
            volume,
            &read_config,
            filter,
            |event| {
                pending.push(event);
                if pending.len() >= batch_limit && flush_err.is_none() {
                    match store.insert_events(&pending) {
                        Ok(outcome) => {
                            inserted += outcome.inserted;
                            duplicates += outcome.duplicates;
                            pending.clear();
                        }
                        Err(err) => flush_err = Some(err.into()),
                    }
                }
            },
            |gap| gaps.push(gap),
        )
        .context("USN read loop failed")?;
        if let Some(err) = flush_err {
            return Err(err);
        }
        stats
    };

    if !pending.is_empty() {
        let outcome = store.insert_events(&pending)?;
        inserted += outcome.inserted;
        duplicates += outcome.duplicates;
    }
    store.insert_gaps(&gaps)?;

    let stats = UsnPassStats {
        events_emitted: loop_stats.events_emitted,
        events_inserted: inserted as u64,
        duplicates_dropped: duplicates as u64,
        events_excluded: loop_stats.events_excluded,
        gaps_recorded: loop_stats.gaps_recorded,
        elapsed: started.elapsed(),
    };
    info!(
        volume = %volume,
        inserted = stats.events_inserted,
        duplicates = stats.duplicates_dropped,
        excluded = stats.events_excluded,
        gaps = stats.gaps_recorded,
        "USN pass finished"
    );
    Ok(stats)
}

/// Correlate a volume's MFT and USN stores into the correlated store.
/// Serializes after both source passes for the volume have finished.
pub fn run_correlation(volume: VolumeId, config: &AppConfig) -> Result<CorrelationStats> {
    let artifacts = config.artifacts_dir();
    let stats = correlator::correlate_stores(
        &artifacts.join(artifact_store::MFT_DB),
        &artifacts.join(artifact_store::USN_DB),
        &artifacts.join(artifact_store::CORRELATED_DB),
        volume,
        &tuning_from(config),
    )
    .context("correlation pass failed")?;
    Ok(stats)
}

/// Aggregate the correlated store into a summary report.
pub fn correlation_report(config: &AppConfig) -> Result<CorrelationReport> {
    let artifacts = config.artifacts_dir();
    let report = correlator::build_report(
        &artifacts.join(artifact_store::CORRELATED_DB),
        &artifacts.join(artifact_store::MFT_DB),
    )?;
    Ok(report)
}

/// Open the per-case stores for the parse passes.
pub fn open_stores(config: &AppConfig) -> Result<(MftStore, UsnStore)> {
    let artifacts = config.artifacts_dir();
    let tuning = tuning_from(config);
    let mft = MftStore::open(&artifacts, &tuning)?;
    let usn = UsnStore::open(&artifacts, &tuning)?;
    Ok((mft, usn))
}

#[cfg(windows)]
mod windows_entry {
    use super::*;
    use ntfs_volume::RawVolume;
    use usn_journal::WindowsJournal;

    /// Parse a live volume's MFT into the case stores.
    pub fn parse_volume(
        volume: VolumeId,
        config: &AppConfig,
        cancel: &AtomicBool,
        on_progress: impl FnMut(u64),
    ) -> Result<MftPassStats> {
        let device = RawVolume::open(volume)?;
        let mut reader = VolumeReader::open(device)?;
        let (mut store, _) = open_stores(config)?;
        run_mft_pass(&mut reader, volume, &mut store, config, cancel, on_progress)
    }

    /// Drain a live volume's USN journal into the case stores.
    pub fn run_usn(volume: VolumeId, config: &AppConfig) -> Result<UsnPassStats> {
        let mut journal = WindowsJournal::open(volume)?;
        let (_, mut store) = open_stores(config)?;
        run_usn_pass(&mut journal, volume, &mut store, config)
    }

    /// Stream a live volume's journal events without persisting them.
    pub fn stream_usn(
        volume: VolumeId,
        config: &AppConfig,
    ) -> Result<usn_journal::UsnEventStream<WindowsJournal>> {
        let journal = WindowsJournal::open(volume)?;
        let stream = usn_journal::UsnEventStream::new(
            journal,
            volume,
            usn_read_config(config),
            self_exclusion_filter(),
        )?;
        Ok(stream)
    }
}

#[cfg(windows)]
pub use windows_entry::{parse_volume, run_usn, stream_usn};

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::tempdir;
    use usn_journal::{JournalIoError, UsnJournalData, UsnResult};

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.case_dir = dir.display().to_string();
        config.store.batch_size = 2;
        config
    }

    mod mft {
        use super::*;

        // Reuse the volume-image shape from the parser's stream tests:
        // boot sector at 0, MFT at cluster 1, 1 KiB records.
        fn build_image(extra_records: usize) -> Vec<u8> {
            const RECORD: usize = 1024;
            let total = extra_records + 1;
            let mut image = vec![0u8; 4096 + total * RECORD];
            image[3..11].copy_from_slice(b"NTFS    ");
            image[11..13].copy_from_slice(&512u16.to_le_bytes());
            image[13] = 8;
            image[48..56].copy_from_slice(&1u64.to_le_bytes());
            image[64] = (-10i8) as u8;

            for i in 0..total {
                let at = 4096 + i * RECORD;
                image[at..at + 4].copy_from_slice(b"FILE");
                image[at + 4..at + 6].copy_from_slice(&48u16.to_le_bytes());
                image[at + 6..at + 8].copy_from_slice(&1u16.to_le_bytes());
                image[at + 20..at + 22].copy_from_slice(&56u16.to_le_bytes());
                image[at + 22..at + 24].copy_from_slice(&1u16.to_le_bytes());
                if i == 0 {
                    // Record 0: non-resident unnamed DATA sizing the MFT.
                    let a = at + 56;
                    image[a..a + 4].copy_from_slice(&0x80u32.to_le_bytes());
                    image[a + 4..a + 8].copy_from_slice(&72u32.to_le_bytes());
                    image[a + 8] = 1;
                    let bytes = (total * RECORD) as u64;
                    image[a + 40..a + 48].copy_from_slice(&bytes.to_le_bytes());
                    image[a + 48..a + 56].copy_from_slice(&bytes.to_le_bytes());
                    image[a + 72..a + 76].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
                } else {
                    image[at + 56..at + 60].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
                }
            }
            image
        }

        #[test]
        fn mft_pass_batches_into_store() {
            let dir = tempdir().unwrap();
            let config = test_config(dir.path());
            let image = build_image(4);
            let mut reader = VolumeReader::open(image.as_slice()).unwrap();
            let (mut store, _) = open_stores(&config).unwrap();

            let mut progress = Vec::new();
            let stats = run_mft_pass(
                &mut reader,
                VolumeId::new('C').unwrap(),
                &mut store,
                &config,
                &AtomicBool::new(false),
                |n| progress.push(n),
            )
            .unwrap();

            assert_eq!(stats.records_parsed, 5);
            assert_eq!(stats.records_inserted, 5);
            assert_eq!(store.record_count().unwrap(), 5);
        }

        #[test]
        fn mft_pass_rerun_produces_identical_store() {
            let dir = tempdir().unwrap();
            let config = test_config(dir.path());
            let image = build_image(3);
            let volume = VolumeId::new('C').unwrap();

            for _ in 0..2 {
                let mut reader = VolumeReader::open(image.as_slice()).unwrap();
                let (mut store, _) = open_stores(&config).unwrap();
                run_mft_pass(
                    &mut reader,
                    volume,
                    &mut store,
                    &config,
                    &AtomicBool::new(false),
                    |_| {},
                )
                .unwrap();
            }

            let conn = Connection::open(
                config.artifacts_dir().join(artifact_store::MFT_DB),
            )
            .unwrap();
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM mft_records", [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 4);
        }
    }

    mod usn {
        use super::*;
        use std::collections::VecDeque;

        struct ScriptedIo {
            script: VecDeque<Result<Vec<u8>, JournalIoError>>,
        }

        impl JournalIo for ScriptedIo {
            fn query(&mut self) -> UsnResult<UsnJournalData> {
                Ok(UsnJournalData {
                    journal_id: 1,
                    first_usn: 0,
                    next_usn: 1_000_000,
                    lowest_valid_usn: 0,
                    max_usn: i64::MAX / 2,
                    query_version: 2,
                })
            }

            fn read(
                &mut self,
                _start_usn: i64,
                _journal_id: u64,
                _buffer_size: usize,
            ) -> Result<Vec<u8>, JournalIoError> {
                self.script
                    .pop_front()
                    .unwrap_or(Err(JournalIoError { code: 38 }))
            }
        }

        fn v2_buffer(next_usn: i64, events: &[(i64, &str)]) -> Vec<u8> {
            let mut buf = Vec::new();
            buf.extend_from_slice(&next_usn.to_le_bytes());
            for (usn, name) in events {
                let name_utf16: Vec<u16> = name.encode_utf16().collect();
                let name_bytes = name_utf16.len() * 2;
                let length = (60 + name_bytes + 7) & !7;
                let mut rec = vec![0u8; length];
                rec[0..4].copy_from_slice(&(length as u32).to_le_bytes());
                rec[4..6].copy_from_slice(&2u16.to_le_bytes());
                rec[8..16].copy_from_slice(&0x42u64.to_le_bytes());
                rec[16..24].copy_from_slice(&0x5u64.to_le_bytes());
                rec[24..32].copy_from_slice(&usn.to_le_bytes());
                rec[32..40].copy_from_slice(&133_615_584_000_000_000u64.to_le_bytes());
                rec[40..44].copy_from_slice(&0x100u32.to_le_bytes());
                rec[56..58].copy_from_slice(&(name_bytes as u16).to_le_bytes());
                rec[58..60].copy_from_slice(&60u16.to_le_bytes());
                for (i, unit) in name_utf16.iter().enumerate() {
                    rec[60 + i * 2..62 + i * 2].copy_from_slice(&unit.to_le_bytes());
                }
                buf.extend_from_slice(&rec);
            }
            buf
        }

        #[test]
        fn usn_pass_inserts_and_deduplicates() {
            let dir = tempdir().unwrap();
            let config = test_config(dir.path());
            let volume = VolumeId::new('C').unwrap();

            let mut io = ScriptedIo {
                script: VecDeque::from([
                    Ok(v2_buffer(500, &[(100, "a.txt"), (200, "b.txt"), (300, "c.txt")])),
                    Err(JournalIoError { code: 38 }),
                ]),
            };
            let (_, mut store) = open_stores(&config).unwrap();
            let stats = run_usn_pass(&mut io, volume, &mut store, &config).unwrap();
            assert_eq!(stats.events_emitted, 3);
            assert_eq!(stats.events_inserted, 3);

            // Replaying the same journal drops everything as duplicate.
            let mut io = ScriptedIo {
                script: VecDeque::from([
                    Ok(v2_buffer(500, &[(100, "a.txt"), (200, "b.txt"), (300, "c.txt")])),
                    Err(JournalIoError { code: 38 }),
                ]),
            };
            let (_, mut store) = open_stores(&config).unwrap();
            let stats = run_usn_pass(&mut io, volume, &mut store, &config).unwrap();
            assert_eq!(stats.events_inserted, 0);
            assert_eq!(stats.duplicates_dropped, 3);
        }

        #[test]
        fn usn_pass_excludes_own_stores() {
            let dir = tempdir().unwrap();
            let config = test_config(dir.path());
            let volume = VolumeId::new('C').unwrap();

            let mut io = ScriptedIo {
                script: VecDeque::from([
                    Ok(v2_buffer(
                        500,
                        &[(100, "USN_journal.db-wal"), (200, "real.txt")],
                    )),
                    Err(JournalIoError { code: 38 }),
                ]),
            };
            let (_, mut store) = open_stores(&config).unwrap();
            let stats = run_usn_pass(&mut io, volume, &mut store, &config).unwrap();
            assert_eq!(stats.events_excluded, 1);
            assert_eq!(stats.events_inserted, 1);
        }
    }

    #[test]
    fn correlation_runs_over_pass_outputs() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let volume = VolumeId::new('C').unwrap();

        // Creating the stores is enough; the correlation entry point
        // only needs the files in place.
        drop(open_stores(&config).unwrap());
        let stats = run_correlation(volume, &config).unwrap();
        assert_eq!(stats.mft_rows, 0);
        assert_eq!(stats.correlated_rows, 0);
    }
}
