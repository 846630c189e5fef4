//! Streaming MFT pass over an open volume.
//!
//! Yields records in ascending record-number order, logical records
//! first and slack-space records after. The iterator is finite and not
//! restartable without re-opening the volume.

use crate::record::{parse_record, ParserOptions};
use core_types::{MftRecord, VolumeId};
use ntfs_volume::{MftSize, SectorSource, VolumeReader};
use tracing::{debug, warn};

/// Consecutive unreadable records tolerated before the pass gives up;
/// guards the fallback-size path from grinding through a bound that is
/// far past the real MFT.
const MAX_CONSECUTIVE_READ_ERRORS: u64 = 1000;

/// Counters accumulated over one streaming pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MftStreamStats {
    pub records_read: u64,
    pub records_parsed: u64,
    pub records_skipped: u64,
    pub read_errors: u64,
    pub slack_candidates: u64,
}

enum Phase {
    Logical { next: u64, end: u64 },
    Slack { queue: std::vec::IntoIter<u64> },
    Done,
}

/// Iterator over every decodable record of a volume's MFT.
pub struct MftRecordStream<'a, S: SectorSource> {
    reader: &'a mut VolumeReader<S>,
    volume: VolumeId,
    options: ParserOptions,
    size: MftSize,
    phase: Phase,
    stats: MftStreamStats,
    consecutive_errors: u64,
}

impl<'a, S: SectorSource> MftRecordStream<'a, S> {
    /// Size the MFT and prepare the pass. Slack scanning is skipped when
    /// the size came from the fallback estimate: a fabricated allocated
    /// bound must not fabricate slack records.
    pub fn new(reader: &'a mut VolumeReader<S>, volume: VolumeId) -> Self {
        Self::with_options(reader, volume, ParserOptions::default())
    }

    pub fn with_options(
        reader: &'a mut VolumeReader<S>,
        volume: VolumeId,
        options: ParserOptions,
    ) -> Self {
        let mut size = reader.mft_size();
        if size.is_fallback {
            size.allocated_records = size.logical_records;
        }
        let phase = Phase::Logical {
            next: 0,
            end: size.logical_records,
        };
        MftRecordStream {
            reader,
            volume,
            options,
            size,
            phase,
            stats: MftStreamStats::default(),
            consecutive_errors: 0,
        }
    }

    pub fn mft_size(&self) -> &MftSize {
        &self.size
    }

    pub fn stats(&self) -> MftStreamStats {
        self.stats
    }

    fn read_and_parse(&mut self, n: u64) -> Option<MftRecord> {
        match self.reader.read_mft_record(n) {
            Ok(raw) => {
                self.consecutive_errors = 0;
                self.stats.records_read += 1;
                match parse_record(self.volume, n, &raw, &self.options) {
                    Some(record) => {
                        self.stats.records_parsed += 1;
                        Some(record)
                    }
                    None => {
                        self.stats.records_skipped += 1;
                        None
                    }
                }
            }
            Err(err) => {
                self.stats.read_errors += 1;
                self.consecutive_errors += 1;
                debug!(record = n, error = %err, "MFT record unreadable");
                None
            }
        }
    }
}

impl<S: SectorSource> Iterator for MftRecordStream<'_, S> {
    type Item = MftRecord;

    fn next(&mut self) -> Option<MftRecord> {
        loop {
            if self.consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                warn!(
                    errors = self.consecutive_errors,
                    "aborting MFT pass after repeated read failures"
                );
                self.phase = Phase::Done;
            }
            match &mut self.phase {
                Phase::Logical { next, end } => {
                    if *next >= *end {
                        let slack = self
                            .reader
                            .scan_slack_space(self.size.logical_records, self.size.allocated_records);
                        self.stats.slack_candidates = slack.len() as u64;
                        self.phase = Phase::Slack {
                            queue: slack.into_iter(),
                        };
                        continue;
                    }
                    let n = *next;
                    *next += 1;
                    if let Some(record) = self.read_and_parse(n) {
                        return Some(record);
                    }
                }
                Phase::Slack { queue } => {
                    let Some(n) = queue.next() else {
                        self.phase = Phase::Done;
                        continue;
                    };
                    if let Some(record) = self.read_and_parse(n) {
                        return Some(record);
                    }
                }
                Phase::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{RecordBuilder, RECORD_SIZE};

    /// Volume image with boot sector at 0, MFT at cluster 1 (offset 4096).
    fn build_image(records: &[Vec<u8>], logical: u64, allocated: u64) -> Vec<u8> {
        let mut image = vec![0u8; 4096 + records.len() * RECORD_SIZE];

        // Boot sector: 512-byte sectors, 8 per cluster, MFT at LCN 1,
        // 1 KiB records.
        image[3..11].copy_from_slice(b"NTFS    ");
        image[11..13].copy_from_slice(&512u16.to_le_bytes());
        image[13] = 8;
        image[48..56].copy_from_slice(&1u64.to_le_bytes());
        image[64] = (-10i8) as u8;

        // Record 0: the MFT's own record with a non-resident unnamed DATA
        // describing the logical/allocated extent.
        let record_zero = RecordBuilder::new()
            .file_name(5, 1, 3, "$MFT")
            .non_resident_data(None, allocated * RECORD_SIZE as u64, logical * RECORD_SIZE as u64)
            .build();
        image[4096..4096 + RECORD_SIZE].copy_from_slice(&record_zero);

        for (i, record) in records.iter().enumerate() {
            let at = 4096 + (i + 1) * RECORD_SIZE;
            image[at..at + record.len()].copy_from_slice(record);
        }
        image
    }

    fn vol() -> VolumeId {
        VolumeId::new('C').unwrap()
    }

    #[test]
    fn streams_logical_then_slack_in_order() {
        // Logical records 0..3 (record 0 + two files), slack record 3.
        let records = vec![
            RecordBuilder::new().file_name(5, 1, 1, "a.txt").build(),
            RecordBuilder::new().file_name(5, 1, 1, "b.txt").build(),
            RecordBuilder::new()
                .flags(0) // deleted entry still signed FILE
                .file_name(5, 1, 1, "ghost.txt")
                .build(),
        ];
        let image = build_image(&records, 3, 4);
        let mut reader = VolumeReader::open(image.as_slice()).unwrap();
        let stream = MftRecordStream::new(&mut reader, vol());

        let out: Vec<MftRecord> = stream.collect();
        let numbers: Vec<u64> = out.iter().map(|r| r.record_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
        assert_eq!(out[3].primary_filename, "ghost.txt");
        assert!(!out[3].in_use);
    }

    #[test]
    fn emission_order_is_ascending_within_phases() {
        let records = vec![
            RecordBuilder::new().file_name(5, 1, 1, "a.txt").build(),
            RecordBuilder::new().file_name(5, 1, 1, "b.txt").build(),
        ];
        let image = build_image(&records, 3, 3);
        let mut reader = VolumeReader::open(image.as_slice()).unwrap();
        let numbers: Vec<u64> = MftRecordStream::new(&mut reader, vol())
            .map(|r| r.record_number)
            .collect();
        let mut sorted = numbers.clone();
        sorted.sort_unstable();
        assert_eq!(numbers, sorted);
    }

    #[test]
    fn unparseable_records_are_counted_not_fatal() {
        let records = vec![
            vec![0u8; RECORD_SIZE], // zeroed: skipped
            RecordBuilder::new().file_name(5, 1, 1, "ok.txt").build(),
        ];
        let image = build_image(&records, 3, 3);
        let mut reader = VolumeReader::open(image.as_slice()).unwrap();
        let mut stream = MftRecordStream::new(&mut reader, vol());
        let parsed: Vec<MftRecord> = stream.by_ref().collect();
        assert_eq!(parsed.len(), 2); // record 0 + ok.txt
        let stats = stream.stats();
        assert_eq!(stats.records_skipped, 1);
        assert_eq!(stats.records_parsed, 2);
    }
}
