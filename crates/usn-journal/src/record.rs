//! USN record decoding, independent of how the buffer was obtained.
//!
//! A READ_USN_JOURNAL response starts with 8 bytes holding the next USN
//! to request; the rest is a concatenation of variable-length records,
//! each prefixed with a 4-byte length. Records dispatch on the major
//! version in their header: v2 carries 64-bit file references, v3 the
//! 128-bit FileId rendered as 32 hex digits.

use core_types::{FileTime, UsnEvent, VolumeId};

/// Minimum bytes for the fixed part of a v2 record.
const V2_HEADER_LEN: usize = 60;
/// Minimum bytes for the fixed part of a v3 record.
const V3_HEADER_LEN: usize = 76;

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes(b.try_into().expect("2-byte slice")))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes(b.try_into().expect("4-byte slice")))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8)
        .map(|b| u64::from_le_bytes(b.try_into().expect("8-byte slice")))
}

fn read_i64(data: &[u8], at: usize) -> Option<i64> {
    read_u64(data, at).map(|v| v as i64)
}

/// Render a FILE_ID_128 the way the stores expect: high quadword first,
/// 32 hex digits total.
fn file_id_128_to_str(bytes: &[u8]) -> String {
    let low = u64::from_le_bytes(bytes[0..8].try_into().expect("8-byte slice"));
    let high = u64::from_le_bytes(bytes[8..16].try_into().expect("8-byte slice"));
    format!("{high:016x}{low:016x}")
}

/// Decode the UTF-16LE file name at the record-relative offset.
fn read_name(data: &[u8], offset: usize, name_offset: u16, name_length: u16) -> String {
    if name_length == 0 || name_offset == 0 {
        return String::new();
    }
    let start = offset + name_offset as usize;
    let end = start + name_length as usize;
    let Some(bytes) = data.get(start..end) else {
        return String::new();
    };
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Parse a single USN record at `offset`. Returns the event and its
/// length, or `None` when the bytes are not a decodable record.
pub fn parse_usn_record(data: &[u8], offset: usize, volume: VolumeId) -> Option<(UsnEvent, u32)> {
    let record_length = read_u32(data, offset)?;
    if record_length < 8 || offset + record_length as usize > data.len() {
        return None;
    }
    let major_version = read_u16(data, offset + 4)?;

    let event = match major_version {
        2 => {
            if (record_length as usize) < V2_HEADER_LEN {
                return None;
            }
            let name_length = read_u16(data, offset + 56)?;
            let name_offset = read_u16(data, offset + 58)?;
            UsnEvent {
                volume,
                usn: read_i64(data, offset + 24)?,
                major_version,
                frn: read_u64(data, offset + 8)?.to_string(),
                parent_frn: read_u64(data, offset + 16)?.to_string(),
                timestamp: FileTime(read_u64(data, offset + 32)?),
                reason: read_u32(data, offset + 40)?,
                source_info: read_u32(data, offset + 44)?,
                security_id: read_u32(data, offset + 48)?,
                file_attributes: read_u32(data, offset + 52)?,
                file_name: read_name(data, offset, name_offset, name_length),
                record_length,
            }
        }
        3 => {
            if (record_length as usize) < V3_HEADER_LEN {
                return None;
            }
            let frn = data.get(offset + 8..offset + 24)?;
            let parent = data.get(offset + 24..offset + 40)?;
            let name_length = read_u16(data, offset + 72)?;
            let name_offset = read_u16(data, offset + 74)?;
            UsnEvent {
                volume,
                usn: read_i64(data, offset + 40)?,
                major_version,
                frn: file_id_128_to_str(frn),
                parent_frn: file_id_128_to_str(parent),
                timestamp: FileTime(read_u64(data, offset + 48)?),
                reason: read_u32(data, offset + 56)?,
                source_info: read_u32(data, offset + 60)?,
                security_id: read_u32(data, offset + 64)?,
                file_attributes: read_u32(data, offset + 68)?,
                file_name: read_name(data, offset, name_offset, name_length),
                record_length,
            }
        }
        _ => return None,
    };

    Some((event, record_length))
}

/// Events and the advance cursor pulled out of one read response.
#[derive(Debug, Clone)]
pub struct ParsedBuffer {
    pub next_usn: i64,
    pub events: Vec<UsnEvent>,
}

/// Walk a whole read response. A response of exactly 8 bytes carries the
/// next-USN header and no records. An undecodable record terminates the
/// walk; whatever was decoded before it is kept.
pub fn parse_read_buffer(data: &[u8], volume: VolumeId) -> Option<ParsedBuffer> {
    let next_usn = read_i64(data, 0)?;
    let mut events = Vec::new();
    let mut offset = 8usize;

    while offset + 8 <= data.len() {
        match parse_usn_record(data, offset, volume) {
            Some((event, record_length)) => {
                events.push(event);
                offset += record_length as usize;
            }
            None => break,
        }
    }

    Some(ParsedBuffer { next_usn, events })
}
