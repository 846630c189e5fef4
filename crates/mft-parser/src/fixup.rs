//! Update-sequence-array (fixup) handling.
//!
//! NTFS replaces the last two bytes of every sector of a multi-sector
//! structure with a sequence tag; the original bytes live in the update
//! sequence array. Records must have the substitution undone before any
//! attribute offsets are trusted.

use tracing::debug;

/// Default sector stride for fixup application.
pub const SECTOR_SIZE: usize = 512;

/// Apply the fixup array to a record in place.
///
/// A tag mismatch means the record was torn mid-write (or is slack
/// garbage); the remaining sectors are still restored so downstream
/// bounds checks decide the record's fate. Returns false on mismatch.
pub fn apply_fixup(record: &mut [u8], sector_size: usize) -> bool {
    if record.len() < 8 {
        return false;
    }
    let usa_offset = u16::from_le_bytes([record[4], record[5]]) as usize;
    let usa_count = u16::from_le_bytes([record[6], record[7]]) as usize;

    // Count includes the tag slot itself; zero or one means nothing to do.
    if usa_count < 2 {
        return true;
    }
    let usa_end = usa_offset + usa_count * 2;
    if usa_offset < 8 || usa_end > record.len() {
        return false;
    }

    let tag = [record[usa_offset], record[usa_offset + 1]];
    let mut clean = true;

    for i in 0..usa_count - 1 {
        let sector_end = (i + 1) * sector_size;
        if sector_end > record.len() {
            break;
        }
        let tail = sector_end - 2;
        if record[tail] != tag[0] || record[tail + 1] != tag[1] {
            debug!(sector = i, "fixup tag mismatch; record may be torn");
            clean = false;
        }
        let saved = usa_offset + 2 + i * 2;
        record[tail] = record[saved];
        record[tail + 1] = record[saved + 1];
    }
    clean
}
