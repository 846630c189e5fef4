//! Per-attribute decoders.
//!
//! Each decoder takes the attribute's value slice (resident) or header
//! slice (non-resident) and returns `None` on any structural problem;
//! the caller skips that attribute and keeps walking.

use core_types::mft::{
    normalize_parent_sequence, AttributeListEntry, MftDataStream, MftFileName, MftStandardInfo,
};
use core_types::{FileTime, MftReference, FRN_RECORD_MASK};

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes(b.try_into().expect("4-byte slice")))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8)
        .map(|b| u64::from_le_bytes(b.try_into().expect("8-byte slice")))
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes(b.try_into().expect("2-byte slice")))
}

fn read_filetime(data: &[u8], at: usize) -> Option<FileTime> {
    data.get(at..at + 8).and_then(FileTime::read)
}

/// Decode a UTF-16LE name of `code_units` units.
fn read_utf16(data: &[u8], at: usize, code_units: usize) -> Option<String> {
    let bytes = data.get(at..at + code_units * 2)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}

/// $STANDARD_INFORMATION: four FILETIMEs plus DOS flags; extended fields
/// only when the attribute carries at least 72 bytes.
pub fn parse_standard_information(value: &[u8]) -> Option<MftStandardInfo> {
    if value.len() < 48 {
        return None;
    }
    let extended = value.len() >= 72;
    Some(MftStandardInfo {
        created: read_filetime(value, 0)?,
        modified: read_filetime(value, 8)?,
        accessed: read_filetime(value, 16)?,
        mft_modified: read_filetime(value, 24)?,
        flags: read_u32(value, 32)?,
        max_versions: read_u32(value, 36)?,
        version_number: read_u32(value, 40)?,
        class_id: read_u32(value, 44)?,
        owner_id: extended.then(|| read_u32(value, 48)).flatten(),
        security_id: extended.then(|| read_u32(value, 52)).flatten(),
        quota_charged: extended.then(|| read_u64(value, 56)).flatten(),
        usn: extended.then(|| read_u64(value, 64)).flatten(),
    })
}

/// $FILE_NAME: parent reference, four FILETIMEs, sizes, namespace, name.
pub fn parse_file_name(value: &[u8]) -> Option<MftFileName> {
    if value.len() < 66 {
        return None;
    }
    let parent_raw = read_u64(value, 0)?;
    let parent_record = parent_raw & FRN_RECORD_MASK;
    let raw_sequence = (parent_raw >> 48) as u16;

    let filename_length = usize::from(*value.get(64)?);
    let namespace = *value.get(65)?;
    if value.len() < 66 + filename_length * 2 {
        return None;
    }
    let name = read_utf16(value, 66, filename_length)?;

    Some(MftFileName {
        parent: MftReference {
            record: parent_record,
            sequence: normalize_parent_sequence(parent_record, raw_sequence),
        },
        parent_sequence_raw: raw_sequence,
        created: read_filetime(value, 8)?,
        modified: read_filetime(value, 16)?,
        accessed: read_filetime(value, 24)?,
        mft_modified: read_filetime(value, 32)?,
        allocated_size: read_u64(value, 40)?,
        real_size: read_u64(value, 48)?,
        flags: read_u32(value, 56)?,
        reparse_value: read_u32(value, 60)?,
        namespace,
        name,
    })
}

/// $DATA stream from the full attribute slice (header at offset 0).
///
/// `max_resident_size` caps how large a resident value we are willing to
/// treat as stream content; oversized values still record their size.
pub fn parse_data(attr: &[u8], max_resident_size: u64) -> Option<MftDataStream> {
    let non_resident = *attr.get(8)? != 0;
    let name_length = usize::from(*attr.get(9)?);
    let name_offset = usize::from(read_u16(attr, 10)?);

    let name = if name_length > 0 {
        Some(read_utf16(attr, name_offset, name_length)?)
    } else {
        None
    };

    let size = if non_resident {
        // Logical (real) size from the non-resident header.
        read_u64(attr, 48)?
    } else {
        let value_length = u64::from(read_u32(attr, 16)?);
        if value_length > max_resident_size {
            tracing::debug!(
                value_length,
                cap = max_resident_size,
                "resident DATA larger than cap; size recorded, content ignored"
            );
        }
        value_length
    };

    Some(MftDataStream {
        name,
        resident: !non_resident,
        size,
    })
}

/// $ATTRIBUTE_LIST: fixed 26-byte entries (length-prefixed) pointing at
/// extension records. Signals the record is fragmented across records.
pub fn parse_attribute_list(value: &[u8]) -> Option<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + 26 <= value.len() {
        let entry_length = read_u32(value, offset)? as usize;
        if entry_length == 0 || offset + entry_length > value.len() {
            break;
        }
        let attr_type = read_u32(value, offset + 4)?;
        let name_length = usize::from(*value.get(offset + 8)?);
        let name_offset = usize::from(*value.get(offset + 9)?);
        let starting_vcn = read_u64(value, offset + 10)?;
        let base_ref = read_u64(value, offset + 18)?;

        let name = if name_length > 0 && name_offset > 0 {
            read_utf16(value, offset + name_offset, name_length).unwrap_or_default()
        } else {
            String::new()
        };

        entries.push(AttributeListEntry {
            attr_type,
            name,
            starting_vcn,
            extension_record: base_ref & FRN_RECORD_MASK,
        });
        offset += entry_length;
    }

    Some(entries)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Byte-level builders shared by the attribute and record tests.

    use chrono::{TimeZone, Utc};
    use core_types::FileTime;

    pub fn filetime(y: i32, mo: u32, d: u32) -> FileTime {
        FileTime::from_datetime(Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap())
    }

    /// Standard-information value: 48 or 72 bytes.
    pub fn standard_info_value(flags: u32, extended: bool) -> Vec<u8> {
        let mut v = vec![0u8; if extended { 72 } else { 48 }];
        v[0..8].copy_from_slice(&filetime(2024, 1, 1).0.to_le_bytes());
        v[8..16].copy_from_slice(&filetime(2024, 2, 1).0.to_le_bytes());
        v[16..24].copy_from_slice(&filetime(2024, 3, 1).0.to_le_bytes());
        v[24..32].copy_from_slice(&filetime(2024, 4, 1).0.to_le_bytes());
        v[32..36].copy_from_slice(&flags.to_le_bytes());
        if extended {
            v[48..52].copy_from_slice(&77u32.to_le_bytes()); // owner
            v[52..56].copy_from_slice(&1001u32.to_le_bytes()); // security
            v[56..64].copy_from_slice(&4096u64.to_le_bytes()); // quota
            v[64..72].copy_from_slice(&0xABCDu64.to_le_bytes()); // usn
        }
        v
    }

    /// File-name value for `name` under `parent` with the given sequence
    /// and namespace.
    pub fn file_name_value(parent_record: u64, parent_seq: u16, namespace: u8, name: &str) -> Vec<u8> {
        let utf16: Vec<u16> = name.encode_utf16().collect();
        let mut v = vec![0u8; 66 + utf16.len() * 2];
        let parent_raw = (u64::from(parent_seq) << 48) | parent_record;
        v[0..8].copy_from_slice(&parent_raw.to_le_bytes());
        v[8..16].copy_from_slice(&filetime(2024, 1, 2).0.to_le_bytes());
        v[16..24].copy_from_slice(&filetime(2024, 2, 2).0.to_le_bytes());
        v[24..32].copy_from_slice(&filetime(2024, 3, 2).0.to_le_bytes());
        v[32..40].copy_from_slice(&filetime(2024, 4, 2).0.to_le_bytes());
        v[40..48].copy_from_slice(&8192u64.to_le_bytes()); // allocated
        v[48..56].copy_from_slice(&7777u64.to_le_bytes()); // real
        v[56..60].copy_from_slice(&0x20u32.to_le_bytes()); // flags
        v[64] = utf16.len() as u8;
        v[65] = namespace;
        for (i, unit) in utf16.iter().enumerate() {
            v[66 + i * 2..68 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        v
    }
}
