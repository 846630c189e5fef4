//! Core identifiers and shared record types for the Crow Eye engine.
//!
//! These types intentionally avoid heavy dependencies: they are the common
//! vocabulary of the parsers, the correlator and the stores, and must stay
//! serialization-friendly for the JSON surfaces (search history, saved
//! searches) and the SQLite adapters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod config;
pub mod filetime;
pub mod mft;
pub mod usn;

pub use filetime::FileTime;
pub use mft::{MftAttribute, MftFileName, MftRecord, MftStandardInfo, Namespace, RecordFlags};
pub use usn::{UsnEvent, UsnGap};

/// Lower 48 bits of an NTFS file reference number hold the MFT record
/// number; the upper 16 bits hold the sequence number.
pub const FRN_RECORD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// A single NTFS volume identified by its drive letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId(char);

impl VolumeId {
    /// Construct from a drive letter; normalized to upper case.
    pub fn new(letter: char) -> Option<Self> {
        letter
            .is_ascii_alphabetic()
            .then(|| VolumeId(letter.to_ascii_uppercase()))
    }

    pub const fn letter(self) -> char {
        self.0
    }

    /// Raw device path, e.g. `\\.\C:`.
    pub fn device_path(self) -> String {
        format!(r"\\.\{}:", self.0)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VolumeId {
    type Err = &'static str;

    /// Accepts `C`, `C:`, or `C:\`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let letter = chars.next().ok_or("empty volume letter")?;
        let id = VolumeId::new(letter).ok_or("invalid volume letter")?;
        match chars.as_str() {
            "" | ":" | ":\\" | ":/" => Ok(id),
            _ => Err("invalid volume letter"),
        }
    }
}

/// Split view of a 64-bit NTFS file reference number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MftReference {
    pub record: u64,
    pub sequence: u16,
}

impl MftReference {
    pub const fn from_raw(raw: u64) -> Self {
        MftReference {
            record: raw & FRN_RECORD_MASK,
            sequence: (raw >> 48) as u16,
        }
    }

    pub const fn to_raw(self) -> u64 {
        ((self.sequence as u64) << 48) | (self.record & FRN_RECORD_MASK)
    }
}

impl fmt::Display for MftReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record, self.sequence)
    }
}

/// Extract the MFT record number from a textual FRN as stored in
/// `journal_events.frn`: decimal for v2 references, 32-hex-digit `FileId`
/// for v3.
pub fn frn_record_number(frn: &str) -> Option<u64> {
    if let Ok(raw) = frn.parse::<u64>() {
        return Some(raw & FRN_RECORD_MASK);
    }
    // v3 FileId rendered as "HHHH...LLLL..."; the low quadword carries the
    // classic reference number.
    if frn.len() == 32 {
        if let Ok(low) = u64::from_str_radix(&frn[16..], 16) {
            return Some(low & FRN_RECORD_MASK);
        }
    }
    None
}

/// Windows FILE_ATTRIBUTE_* bits rendered the way the stores expect them.
pub const FILE_ATTRIBUTE_MAP: &[(u32, &str)] = &[
    (0x0000_0001, "READONLY"),
    (0x0000_0002, "HIDDEN"),
    (0x0000_0004, "SYSTEM"),
    (0x0000_0010, "DIRECTORY"),
    (0x0000_0020, "ARCHIVE"),
    (0x0000_0040, "DEVICE"),
    (0x0000_0080, "NORMAL"),
    (0x0000_0100, "TEMPORARY"),
    (0x0000_0200, "SPARSE_FILE"),
    (0x0000_0400, "REPARSE_POINT"),
    (0x0000_0800, "COMPRESSED"),
    (0x0000_1000, "OFFLINE"),
    (0x0000_2000, "NOT_CONTENT_INDEXED"),
    (0x0000_4000, "ENCRYPTED"),
];

/// Render numeric file attributes as a `|`-joined set, `NORMAL` for zero.
pub fn file_attributes_to_text(attrs: u32) -> String {
    if attrs == 0 {
        return "NORMAL".to_string();
    }
    let names: Vec<&str> = FILE_ATTRIBUTE_MAP
        .iter()
        .filter(|(bit, _)| attrs & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "NORMAL".to_string()
    } else {
        names.join("|")
    }
}
