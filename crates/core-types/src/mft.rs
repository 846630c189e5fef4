//! Normalized MFT record model.
//!
//! One `MftRecord` per MFT entry, carrying the parsed attributes as a
//! tagged sum plus the derived fields the stores index on. Records are
//! immutable once emitted by the parser.

use crate::{FileTime, MftReference, VolumeId};
use serde::{Deserialize, Serialize};

/// Attribute type codes we decode structurally; everything else is kept
/// as an opaque marker.
pub const ATTR_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_FILE_NAME: u32 = 0x30;
pub const ATTR_DATA: u32 = 0x80;

bitflags::bitflags! {
    /// MFT record-header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RecordFlags: u16 {
        const IN_USE = 0x0001;
        const IS_DIRECTORY = 0x0002;
    }
}

/// Filename namespace of a FILE_NAME attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Namespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl Namespace {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Namespace::Posix),
            1 => Some(Namespace::Win32),
            2 => Some(Namespace::Dos),
            3 => Some(Namespace::Win32AndDos),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Namespace::Posix => "POSIX",
            Namespace::Win32 => "Win32",
            Namespace::Dos => "DOS",
            Namespace::Win32AndDos => "Win32 & DOS",
        }
    }

    /// Display name for a raw namespace byte, tolerating junk values.
    pub fn name_of(raw: u8) -> &'static str {
        Self::from_raw(raw).map_or("Unknown", Namespace::name)
    }
}

/// $STANDARD_INFORMATION contents. Extended fields are only present on
/// attributes of at least 72 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MftStandardInfo {
    pub created: FileTime,
    pub modified: FileTime,
    pub accessed: FileTime,
    pub mft_modified: FileTime,
    pub flags: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub usn: Option<u64>,
}

/// $FILE_NAME contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MftFileName {
    pub parent: MftReference,
    /// Sequence exactly as read off disk, before the zero-coercion below.
    pub parent_sequence_raw: u16,
    pub created: FileTime,
    pub modified: FileTime,
    pub accessed: FileTime,
    pub mft_modified: FileTime,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub reparse_value: u32,
    pub namespace: u8,
    pub name: String,
}

impl MftFileName {
    pub fn is_dos_name(&self) -> bool {
        self.namespace == Namespace::Dos as u8
    }
}

/// $DATA stream description. The unnamed stream is the file content;
/// named streams are alternate data streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MftDataStream {
    pub name: Option<String>,
    pub resident: bool,
    /// Resident content length, or the logical size from the non-resident
    /// header.
    pub size: u64,
}

impl MftDataStream {
    pub fn is_ads(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// One $ATTRIBUTE_LIST entry pointing into an extension record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeListEntry {
    pub attr_type: u32,
    pub name: String,
    pub starting_vcn: u64,
    pub extension_record: u64,
}

/// Parsed MFT attribute as a tagged sum; unknown types keep only their
/// type code and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MftAttribute {
    StandardInformation(MftStandardInfo),
    FileName(MftFileName),
    Data(MftDataStream),
    AttributeList(Vec<AttributeListEntry>),
    Opaque { type_code: u32, size: usize },
}

/// One decoded MFT entry with its derived fields populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MftRecord {
    pub volume: VolumeId,
    pub record_number: u64,
    pub sequence_number: u16,
    pub flags: u16,
    pub in_use: bool,
    pub is_directory: bool,
    pub attributes: Vec<MftAttribute>,
    // Derived after the attribute walk.
    pub primary_filename: String,
    pub extension: String,
    pub file_size: u64,
    pub has_ads: bool,
    pub ads_count: u32,
    pub file_attributes: u32,
}

impl MftRecord {
    pub fn standard_info(&self) -> Option<&MftStandardInfo> {
        self.attributes.iter().find_map(|a| match a {
            MftAttribute::StandardInformation(si) => Some(si),
            _ => None,
        })
    }

    pub fn file_names(&self) -> impl Iterator<Item = &MftFileName> {
        self.attributes.iter().filter_map(|a| match a {
            MftAttribute::FileName(fname) => Some(fname),
            _ => None,
        })
    }

    pub fn data_streams(&self) -> impl Iterator<Item = &MftDataStream> {
        self.attributes.iter().filter_map(|a| match a {
            MftAttribute::Data(d) => Some(d),
            _ => None,
        })
    }

    pub fn created(&self) -> FileTime {
        self.standard_info().map_or(FileTime::ZERO, |si| si.created)
    }

    pub fn modified(&self) -> FileTime {
        self.standard_info().map_or(FileTime::ZERO, |si| si.modified)
    }

    pub fn accessed(&self) -> FileTime {
        self.standard_info().map_or(FileTime::ZERO, |si| si.accessed)
    }

    pub fn mft_modified(&self) -> FileTime {
        self.standard_info()
            .map_or(FileTime::ZERO, |si| si.mft_modified)
    }
}

/// Coerce a parent sequence per the journal parity rule: a zero sequence
/// with a non-zero parent record is normalized to 1; the root (record 0)
/// keeps sequence 0.
pub fn normalize_parent_sequence(parent_record: u64, raw_sequence: u16) -> u16 {
    if raw_sequence == 0 && parent_record > 0 {
        1
    } else {
        raw_sequence
    }
}

/// File extension of a name, lower-cased, without the dot.
pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}
