//! Record-level parsing: header checks, attribute walk, derived fields.

use crate::attributes;
use crate::fixup::{apply_fixup, SECTOR_SIZE};
use core_types::mft::{
    extension_of, MftAttribute, RecordFlags, ATTR_ATTRIBUTE_LIST, ATTR_DATA, ATTR_FILE_NAME,
    ATTR_STANDARD_INFORMATION,
};
use core_types::{MftRecord, VolumeId};
use tracing::debug;

/// Knobs the parser honors per pass.
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    /// Largest resident DATA value treated as stream content.
    pub max_resident_file_size: u64,
    /// Fixup stride; per-sector on every real volume.
    pub sector_size: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_resident_file_size: 1024 * 1024,
            sector_size: SECTOR_SIZE,
        }
    }
}

/// Parse one raw MFT record. `None` means the record was dropped: bad
/// signature, malformed header, or an attribute walk that never reached
/// the end sentinel inside the record bounds.
pub fn parse_record(
    volume: VolumeId,
    record_number: u64,
    raw: &[u8],
    options: &ParserOptions,
) -> Option<MftRecord> {
    if raw.len() < 48 {
        return None;
    }
    if &raw[0..4] != b"FILE" {
        debug!(record = record_number, "bad record signature; dropped");
        return None;
    }

    let mut data = raw.to_vec();
    apply_fixup(&mut data, options.sector_size);

    let sequence_number = u16::from_le_bytes([data[16], data[17]]);
    let first_attr_offset = u16::from_le_bytes([data[20], data[21]]) as usize;
    let flags = u16::from_le_bytes([data[22], data[23]]);

    if first_attr_offset < 48 {
        debug!(record = record_number, "attribute offset inside header; dropped");
        return None;
    }

    let attributes = match walk_attributes(&data, first_attr_offset, record_number, options) {
        Some(attrs) => attrs,
        None => {
            debug!(
                record = record_number,
                "attribute walk did not terminate; dropped"
            );
            return None;
        }
    };

    let record_flags = RecordFlags::from_bits_retain(flags);
    let mut record = MftRecord {
        volume,
        record_number,
        sequence_number,
        flags,
        in_use: record_flags.contains(RecordFlags::IN_USE),
        is_directory: record_flags.contains(RecordFlags::IS_DIRECTORY),
        attributes,
        primary_filename: String::new(),
        extension: String::new(),
        file_size: 0,
        has_ads: false,
        ads_count: 0,
        file_attributes: 0,
    };
    populate_derived(&mut record);
    Some(record)
}

/// Walk the attribute chain. Returns `None` unless the walk terminates at
/// the 0xFFFFFFFF sentinel within bounds; a record whose first attribute
/// offset already sits at the end of the data is an empty, valid record.
fn walk_attributes(
    data: &[u8],
    mut offset: usize,
    record_number: u64,
    options: &ParserOptions,
) -> Option<Vec<MftAttribute>> {
    let mut attributes = Vec::new();

    if offset >= data.len() {
        // Zero-attribute record: header only, nothing to walk.
        return Some(attributes);
    }

    while offset + 8 <= data.len() {
        let attr_type = u32::from_le_bytes(data[offset..offset + 4].try_into().ok()?);
        if attr_type == 0xFFFF_FFFF {
            return Some(attributes);
        }
        let attr_length =
            u32::from_le_bytes(data[offset + 4..offset + 8].try_into().ok()?) as usize;
        if attr_length == 0 || offset + attr_length > data.len() {
            // Ran off the record without seeing the sentinel.
            return None;
        }

        let attr = &data[offset..offset + attr_length];
        match parse_one(attr, attr_type, options) {
            Some(parsed) => attributes.push(parsed),
            None => {
                debug!(
                    record = record_number,
                    attr_type = format_args!("0x{attr_type:02X}"),
                    "malformed attribute skipped"
                );
            }
        }

        offset += attr_length;
    }

    None
}

/// Dispatch a single attribute to its decoder; unknown types become
/// opaque markers.
fn parse_one(attr: &[u8], attr_type: u32, options: &ParserOptions) -> Option<MftAttribute> {
    if attr.len() < 16 {
        return None;
    }
    let non_resident = attr[8] != 0;

    // Value slice for resident attributes; non-resident decoding works on
    // the header itself.
    let resident_value = || -> Option<&[u8]> {
        let value_length = u32::from_le_bytes(attr[16..20].try_into().ok()?) as usize;
        let value_offset = u16::from_le_bytes(attr[20..22].try_into().ok()?) as usize;
        attr.get(value_offset..value_offset + value_length)
    };

    match attr_type {
        ATTR_STANDARD_INFORMATION => {
            let value = if non_resident { return None } else { resident_value()? };
            attributes::parse_standard_information(value).map(MftAttribute::StandardInformation)
        }
        ATTR_FILE_NAME => {
            let value = if non_resident { return None } else { resident_value()? };
            attributes::parse_file_name(value).map(MftAttribute::FileName)
        }
        ATTR_DATA => {
            attributes::parse_data(attr, options.max_resident_file_size).map(MftAttribute::Data)
        }
        ATTR_ATTRIBUTE_LIST => {
            let value = if non_resident {
                // Entries live in extension clusters; record presence with
                // whatever header bytes we have.
                attr.get(16..).unwrap_or_default()
            } else {
                resident_value()?
            };
            attributes::parse_attribute_list(value).map(MftAttribute::AttributeList)
        }
        other => Some(MftAttribute::Opaque {
            type_code: other,
            size: attr.len(),
        }),
    }
}

/// Fill the derived fields once every attribute is parsed.
fn populate_derived(record: &mut MftRecord) {
    // Primary filename: first non-DOS name, else the first parsed.
    let primary = record
        .file_names()
        .find(|f| !f.is_dos_name())
        .or_else(|| record.file_names().next())
        .map(|f| f.name.clone());
    if let Some(name) = primary {
        record.extension = extension_of(&name);
        record.primary_filename = name;
    }

    // File size from the unnamed DATA stream; when both resident and
    // non-resident unnamed streams appear, the resident one wins.
    let unnamed: Vec<_> = record
        .data_streams()
        .filter(|d| !d.is_ads())
        .cloned()
        .collect();
    record.file_size = unnamed
        .iter()
        .find(|d| d.resident)
        .or_else(|| unnamed.first())
        .map_or(0, |d| d.size);

    record.ads_count = record.data_streams().filter(|d| d.is_ads()).count() as u32;
    record.has_ads = record.ads_count > 0;

    record.file_attributes = record.standard_info().map_or(0, |si| si.flags);
}


#[cfg(test)]
mod tests {
    use super::fixtures::RecordBuilder;
    use super::*;

    fn vol() -> VolumeId {
        VolumeId::new('C').unwrap()
    }

    fn opts() -> ParserOptions {
        ParserOptions::default()
    }

    #[test]
    fn parses_complete_record() {
        let raw = RecordBuilder::new()
            .flags(0x1)
            .sequence(7)
            .standard_info(0x20, true)
            .file_name(5, 1, 1, "hello.txt")
            .resident_data(None, 64)
            .build();

        let rec = parse_record(vol(), 42, &raw, &opts()).unwrap();
        assert!(rec.in_use);
        assert!(!rec.is_directory);
        assert_eq!(rec.sequence_number, 7);
        assert_eq!(rec.primary_filename, "hello.txt");
        assert_eq!(rec.extension, "txt");
        assert_eq!(rec.file_size, 64);
        assert_eq!(rec.file_attributes, 0x20);
        assert!(!rec.has_ads);
    }

    #[test]
    fn drops_bad_signature() {
        let mut raw = RecordBuilder::new().build();
        raw[0..4].copy_from_slice(b"BAAD");
        assert!(parse_record(vol(), 1, &raw, &opts()).is_none());
    }

    #[test]
    fn drops_walk_without_sentinel() {
        let raw = RecordBuilder::new()
            .standard_info(0, false)
            .without_sentinel()
            .build();
        // Zero bytes follow the attribute, so the walk hits a zero length
        // without ever seeing 0xFFFFFFFF.
        assert!(parse_record(vol(), 1, &raw, &opts()).is_none());
    }

    #[test]
    fn header_only_record_parses_empty() {
        // 48-byte record: valid signature, directory bit, no attributes.
        let mut raw = vec![0u8; 48];
        raw[0..4].copy_from_slice(b"FILE");
        raw[4..6].copy_from_slice(&48u16.to_le_bytes());
        raw[6..8].copy_from_slice(&1u16.to_le_bytes());
        raw[16..18].copy_from_slice(&3u16.to_le_bytes());
        raw[20..22].copy_from_slice(&48u16.to_le_bytes());
        let flags = RecordFlags::IN_USE | RecordFlags::IS_DIRECTORY;
        raw[22..24].copy_from_slice(&flags.bits().to_le_bytes());

        let rec = parse_record(vol(), 9, &raw, &opts()).unwrap();
        assert!(rec.in_use);
        assert!(rec.is_directory);
        assert!(rec.attributes.is_empty());
        assert_eq!(rec.primary_filename, "");
        assert_eq!(rec.file_size, 0);
    }

    #[test]
    fn malformed_attribute_is_skipped_not_fatal() {
        // A FILE_NAME whose value is too short to decode, then a good one.
        let raw = RecordBuilder::new()
            .resident_attr(0x30, &[0u8; 10])
            .file_name(5, 1, 1, "kept.txt")
            .build();
        let rec = parse_record(vol(), 3, &raw, &opts()).unwrap();
        assert_eq!(rec.file_names().count(), 1);
        assert_eq!(rec.primary_filename, "kept.txt");
    }

    #[test]
    fn primary_name_prefers_non_dos() {
        let raw = RecordBuilder::new()
            .file_name(5, 1, 2, "REPORT~1.PDF") // DOS
            .file_name(5, 1, 1, "Report Final.pdf") // Win32
            .build();
        let rec = parse_record(vol(), 4, &raw, &opts()).unwrap();
        assert_eq!(rec.primary_filename, "Report Final.pdf");
    }

    #[test]
    fn primary_name_falls_back_to_dos_only() {
        let raw = RecordBuilder::new().file_name(5, 1, 2, "DOSONLY.TXT").build();
        let rec = parse_record(vol(), 4, &raw, &opts()).unwrap();
        assert_eq!(rec.primary_filename, "DOSONLY.TXT");
    }

    #[test]
    fn resident_unnamed_data_wins_over_non_resident() {
        let raw = RecordBuilder::new()
            .non_resident_data(None, 0x4000, 0x3000)
            .resident_data(None, 100)
            .build();
        let rec = parse_record(vol(), 6, &raw, &opts()).unwrap();
        assert_eq!(rec.file_size, 100);
    }

    #[test]
    fn non_resident_unnamed_uses_logical_size() {
        let raw = RecordBuilder::new()
            .non_resident_data(None, 0x4000, 0x3F00)
            .build();
        let rec = parse_record(vol(), 6, &raw, &opts()).unwrap();
        assert_eq!(rec.file_size, 0x3F00);
    }

    #[test]
    fn ads_counting() {
        let raw = RecordBuilder::new()
            .resident_data(None, 10)
            .resident_data(Some("Zone.Identifier"), 26)
            .non_resident_data(Some("secret"), 4096, 4000)
            .build();
        let rec = parse_record(vol(), 8, &raw, &opts()).unwrap();
        assert!(rec.has_ads);
        assert_eq!(rec.ads_count, 2);
        assert_eq!(rec.file_size, 10);
    }

    #[test]
    fn unknown_attribute_kept_as_opaque() {
        let raw = RecordBuilder::new().resident_attr(0x40, &[1, 2, 3, 4]).build();
        let rec = parse_record(vol(), 10, &raw, &opts()).unwrap();
        assert!(matches!(
            rec.attributes[0],
            MftAttribute::Opaque { type_code: 0x40, .. }
        ));
    }

    #[test]
    fn invariant_primary_filename_bounded() {
        let long = "x".repeat(255);
        let raw = RecordBuilder::new().file_name(5, 1, 1, &long).build();
        let rec = parse_record(vol(), 11, &raw, &opts()).unwrap();
        assert!(rec.primary_filename.chars().count() <= 255);
    }
}
