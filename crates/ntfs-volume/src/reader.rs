//! Volume-level MFT access: record reads, MFT sizing, slack scanning.

use crate::boot::{BootSector, VolumeGeometry};
use crate::{VolumeError, VolumeResult};
use core_types::mft::ATTR_DATA;
use tracing::{debug, info, warn};

/// Conservative upper bound used when MFT record 0 cannot be parsed.
pub const FALLBACK_MFT_RECORDS: u64 = 2_000_000;

/// Anything that can satisfy aligned sector reads from a volume.
///
/// The Windows device implements this over preads of `\\.\<letter>:`;
/// tests implement it over in-memory images.
pub trait SectorSource {
    /// Read `count` sectors starting at `start`, using the given sector
    /// size. Implementations return exactly `count * bytes_per_sector`
    /// bytes or fail.
    fn read_sectors(&mut self, start: u64, count: u64, bytes_per_sector: u16)
        -> VolumeResult<Vec<u8>>;
}

impl SectorSource for &[u8] {
    fn read_sectors(
        &mut self,
        start: u64,
        count: u64,
        bytes_per_sector: u16,
    ) -> VolumeResult<Vec<u8>> {
        let begin = start as usize * bytes_per_sector as usize;
        let len = count as usize * bytes_per_sector as usize;
        let end = begin + len;
        if end > self.len() {
            return Err(VolumeError::Read {
                start,
                end: start + count,
                message: "read past end of image".to_string(),
            });
        }
        Ok(self[begin..end].to_vec())
    }
}

/// Logical and allocated extents of the MFT in records and bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MftSize {
    pub logical_records: u64,
    pub logical_bytes: u64,
    pub allocated_records: u64,
    pub allocated_bytes: u64,
    /// True when record 0 could not be parsed and the conservative bound
    /// was substituted.
    pub is_fallback: bool,
}

impl MftSize {
    pub fn slack_records(&self) -> u64 {
        self.allocated_records.saturating_sub(self.logical_records)
    }
}

/// Plausibility check for a raw MFT record: FILE signature plus sane
/// fixup-array and first-attribute offsets.
pub fn is_valid_file_record(record: &[u8]) -> bool {
    if record.len() < 48 {
        return false;
    }
    if &record[0..4] != b"FILE" {
        return false;
    }
    let fixup_offset = u16::from_le_bytes([record[4], record[5]]) as usize;
    if fixup_offset < 48 || fixup_offset >= record.len() {
        return false;
    }
    let attr_offset = u16::from_le_bytes([record[20], record[21]]) as usize;
    if attr_offset < 48 || attr_offset >= record.len() {
        return false;
    }
    true
}

/// Reader bound to one opened volume. Owns the geometry; the source is
/// whatever device or image backs the reads.
pub struct VolumeReader<S: SectorSource> {
    source: S,
    geometry: VolumeGeometry,
}

impl<S: SectorSource> VolumeReader<S> {
    /// Read and validate the boot sector, then construct the reader.
    pub fn open(mut source: S) -> VolumeResult<Self> {
        // Boot sector is always 512 bytes regardless of the true sector
        // size; read with 512 and re-read nothing afterwards.
        let sector = source.read_sectors(0, 1, 512)?;
        let boot = BootSector::parse(&sector)?;
        debug!(
            mft_cluster = boot.geometry.mft_cluster,
            record_size = boot.geometry.mft_record_size,
            "parsed NTFS boot sector"
        );
        Ok(VolumeReader {
            source,
            geometry: boot.geometry,
        })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Single aligned read of raw sectors.
    pub fn read_sectors(&mut self, start: u64, count: u64) -> VolumeResult<Vec<u8>> {
        self.source
            .read_sectors(start, count, self.geometry.bytes_per_sector)
    }

    /// Read the covering sector run of MFT record `n` and slice out the
    /// record bytes.
    pub fn read_mft_record(&mut self, n: u64) -> VolumeResult<Vec<u8>> {
        let record_size = u64::from(self.geometry.mft_record_size);
        let bps = u64::from(self.geometry.bytes_per_sector);
        let offset = self.geometry.mft_record_offset(n);

        let first_sector = offset / bps;
        let skip = (offset % bps) as usize;
        let sectors_needed = (skip as u64 + record_size).div_ceil(bps);

        let run = self.read_sectors(first_sector, sectors_needed)?;
        Ok(run[skip..skip + record_size as usize].to_vec())
    }

    /// Determine the MFT's logical/allocated extents from record 0's
    /// unnamed DATA attribute. Falls back to a conservative bound when
    /// record 0 cannot be parsed.
    pub fn mft_size(&mut self) -> MftSize {
        match self.try_mft_size() {
            Some(size) => {
                if size.slack_records() > 0 {
                    info!(
                        slack = size.slack_records(),
                        "MFT has potential slack-space records"
                    );
                }
                size
            }
            None => {
                warn!(
                    fallback = FALLBACK_MFT_RECORDS,
                    "could not size MFT from record 0; using fallback estimate"
                );
                let bytes = FALLBACK_MFT_RECORDS * u64::from(self.geometry.mft_record_size);
                MftSize {
                    logical_records: FALLBACK_MFT_RECORDS,
                    logical_bytes: bytes,
                    allocated_records: FALLBACK_MFT_RECORDS,
                    allocated_bytes: bytes,
                    is_fallback: true,
                }
            }
        }
    }

    fn try_mft_size(&mut self) -> Option<MftSize> {
        let record = self.read_mft_record(0).ok()?;
        if !is_valid_file_record(&record) {
            return None;
        }

        let mut attr_offset = u16::from_le_bytes([record[20], record[21]]) as usize;
        let (logical, allocated) = loop {
            if attr_offset + 8 > record.len() {
                return None;
            }
            let attr_type =
                u32::from_le_bytes(record[attr_offset..attr_offset + 4].try_into().ok()?);
            if attr_type == 0xFFFF_FFFF {
                return None;
            }
            let attr_length =
                u32::from_le_bytes(record[attr_offset + 4..attr_offset + 8].try_into().ok()?)
                    as usize;
            if attr_length == 0 || attr_offset + attr_length > record.len() {
                return None;
            }

            let name_length = *record.get(attr_offset + 9)?;
            if attr_type == ATTR_DATA && name_length == 0 {
                let non_resident = *record.get(attr_offset + 8)? != 0;
                if non_resident {
                    if attr_offset + 56 > record.len() {
                        return None;
                    }
                    let allocated = u64::from_le_bytes(
                        record[attr_offset + 40..attr_offset + 48].try_into().ok()?,
                    );
                    let logical = u64::from_le_bytes(
                        record[attr_offset + 48..attr_offset + 56].try_into().ok()?,
                    );
                    break (logical, allocated);
                }
                // Resident MFT data only occurs on toy images; logical and
                // allocated collapse to the content size.
                let content = u64::from(u32::from_le_bytes(
                    record[attr_offset + 16..attr_offset + 20].try_into().ok()?,
                ));
                break (content, content);
            }

            attr_offset += attr_length;
        };

        if allocated == 0 {
            return None;
        }
        let record_size = u64::from(self.geometry.mft_record_size);
        Some(MftSize {
            logical_records: logical / record_size,
            logical_bytes: logical,
            allocated_records: allocated / record_size,
            allocated_bytes: allocated,
            is_fallback: false,
        })
    }

    /// Scan `[logical, allocated)` for records that still carry a valid
    /// FILE signature; these may be deleted entries recoverable from MFT
    /// slack. Unreadable records are skipped with a debug log.
    pub fn scan_slack_space(
        &mut self,
        logical_records: u64,
        allocated_records: u64,
    ) -> Vec<u64> {
        let mut found = Vec::new();
        if allocated_records <= logical_records {
            return found;
        }
        info!(
            candidates = allocated_records - logical_records,
            "scanning MFT slack space"
        );
        for n in logical_records..allocated_records {
            match self.read_mft_record(n) {
                Ok(record) if is_valid_file_record(&record) => {
                    debug!(record = n, "valid FILE record in slack space");
                    found.push(n);
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(record = n, error = %err, "slack record unreadable");
                }
            }
        }
        info!(found = found.len(), "slack-space scan complete");
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::synthetic_boot_sector;

    const RECORD_SIZE: u32 = 1024;

    /// Build a minimal volume image: boot sector at 0, MFT at cluster 1
    /// (offset 4096 with 512x8 geometry).
    fn build_image(records: &[Vec<u8>]) -> Vec<u8> {
        let mut image = vec![0u8; 4096 + records.len() * RECORD_SIZE as usize];
        let boot = synthetic_boot_sector(512, 8, 1, -10);
        image[..512].copy_from_slice(&boot);
        for (i, record) in records.iter().enumerate() {
            let at = 4096 + i * RECORD_SIZE as usize;
            image[at..at + record.len()].copy_from_slice(record);
        }
        image
    }

    fn blank_record() -> Vec<u8> {
        let mut rec = vec![0u8; RECORD_SIZE as usize];
        rec[0..4].copy_from_slice(b"FILE");
        rec[4..6].copy_from_slice(&48u16.to_le_bytes()); // fixup offset
        rec[6..8].copy_from_slice(&1u16.to_le_bytes()); // fixup count
        rec[20..22].copy_from_slice(&56u16.to_le_bytes()); // first attribute
        rec
    }

    /// Record 0 with a non-resident unnamed DATA attribute carrying the
    /// given logical/allocated sizes.
    fn mft_record_zero(logical: u64, allocated: u64) -> Vec<u8> {
        let mut rec = blank_record();
        let at = 56;
        rec[at..at + 4].copy_from_slice(&core_types::mft::ATTR_DATA.to_le_bytes());
        rec[at + 4..at + 8].copy_from_slice(&72u32.to_le_bytes()); // attr length
        rec[at + 8] = 1; // non-resident
        rec[at + 9] = 0; // unnamed
        rec[at + 40..at + 48].copy_from_slice(&allocated.to_le_bytes());
        rec[at + 48..at + 56].copy_from_slice(&logical.to_le_bytes());
        let end = at + 72;
        rec[end..end + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        rec
    }

    #[test]
    fn open_parses_geometry() {
        let image = build_image(&[mft_record_zero(1024, 2048)]);
        let reader = VolumeReader::open(image.as_slice()).unwrap();
        assert_eq!(reader.geometry().mft_record_size, 1024);
        assert_eq!(reader.geometry().bytes_per_cluster(), 4096);
    }

    #[test]
    fn mft_size_reads_record_zero() {
        // allocated 4 records, logical 2 records.
        let image = build_image(&[mft_record_zero(2048, 4096)]);
        let mut reader = VolumeReader::open(image.as_slice()).unwrap();
        let size = reader.mft_size();
        assert!(!size.is_fallback);
        assert_eq!(size.logical_records, 2);
        assert_eq!(size.allocated_records, 4);
        assert_eq!(size.slack_records(), 2);
    }

    #[test]
    fn mft_size_falls_back_on_garbage() {
        let image = build_image(&[vec![0u8; RECORD_SIZE as usize]]);
        let mut reader = VolumeReader::open(image.as_slice()).unwrap();
        let size = reader.mft_size();
        assert!(size.is_fallback);
        assert_eq!(size.logical_records, FALLBACK_MFT_RECORDS);
        assert_eq!(size.allocated_records, FALLBACK_MFT_RECORDS);
    }

    #[test]
    fn slack_scan_finds_signed_records() {
        // Records: 0 = MFT itself (logical 2, allocated 4), 1 = in-use,
        // 2 = valid slack record, 3 = zeroed slack.
        let image = build_image(&[
            mft_record_zero(2048, 4096),
            blank_record(),
            blank_record(),
            vec![0u8; RECORD_SIZE as usize],
        ]);
        let mut reader = VolumeReader::open(image.as_slice()).unwrap();
        let slack = reader.scan_slack_space(2, 4);
        assert_eq!(slack, vec![2]);
    }

    #[test]
    fn slack_scan_empty_when_no_slack() {
        let image = build_image(&[mft_record_zero(1024, 1024)]);
        let mut reader = VolumeReader::open(image.as_slice()).unwrap();
        assert!(reader.scan_slack_space(5, 5).is_empty());
        assert!(reader.scan_slack_space(5, 3).is_empty());
    }

    #[test]
    fn record_validation_rules() {
        let good = blank_record();
        assert!(is_valid_file_record(&good));

        let mut bad_sig = good.clone();
        bad_sig[0..4].copy_from_slice(b"BAAD");
        assert!(!is_valid_file_record(&bad_sig));

        let mut bad_fixup = good.clone();
        bad_fixup[4..6].copy_from_slice(&8u16.to_le_bytes());
        assert!(!is_valid_file_record(&bad_fixup));

        let mut bad_attr = good.clone();
        bad_attr[20..22].copy_from_slice(&2000u16.to_le_bytes());
        assert!(!is_valid_file_record(&bad_attr));

        assert!(!is_valid_file_record(&good[..32]));
    }
}
