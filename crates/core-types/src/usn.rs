//! Normalized USN change-journal model: events, wrap gaps, and the
//! canonical decoding of reason / source-info bitsets.

use crate::{FileTime, VolumeId};
use serde::{Deserialize, Serialize};

/// USN_REASON_* bits in canonical name order.
pub const REASON_MAP: &[(u32, &str)] = &[
    (0x0000_0001, "DATA_OVERWRITE"),
    (0x0000_0002, "DATA_EXTEND"),
    (0x0000_0004, "DATA_TRUNCATION"),
    (0x0000_0010, "NAMED_DATA_OVERWRITE"),
    (0x0000_0020, "NAMED_DATA_EXTEND"),
    (0x0000_0040, "NAMED_DATA_TRUNCATION"),
    (0x0000_0100, "FILE_CREATE"),
    (0x0000_0200, "FILE_DELETE"),
    (0x0000_0400, "EA_CHANGE"),
    (0x0000_0800, "SECURITY_CHANGE"),
    (0x0000_1000, "RENAME_OLD_NAME"),
    (0x0000_2000, "RENAME_NEW_NAME"),
    (0x0000_4000, "INDEXABLE_CHANGE"),
    (0x0000_8000, "BASIC_INFO_CHANGE"),
    (0x0001_0000, "HARD_LINK_CHANGE"),
    (0x0002_0000, "COMPRESSION_CHANGE"),
    (0x0004_0000, "ENCRYPTION_CHANGE"),
    (0x0008_0000, "OBJECT_ID_CHANGE"),
    (0x0010_0000, "REPARSE_POINT_CHANGE"),
    (0x0020_0000, "STREAM_CHANGE"),
    (0x8000_0000, "CLOSE"),
];

/// USN_SOURCE_* bits.
pub const SOURCE_INFO_MAP: &[(u32, &str)] = &[
    (0x0000_0001, "DATA_MANAGEMENT"),
    (0x0000_0002, "AUXILIARY_DATA"),
    (0x0000_0004, "REPLICATION_MANAGEMENT"),
    (0x0000_0008, "CLIENT_REPLICATION_MANAGEMENT"),
];

/// Decode a reason bitset to ` | `-joined canonical names, `UNKNOWN` when
/// no bit matches.
pub fn reason_to_text(reason: u32) -> String {
    let names: Vec<&str> = REASON_MAP
        .iter()
        .filter(|(bit, _)| reason & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "UNKNOWN".to_string()
    } else {
        names.join(" | ")
    }
}

/// Decode source-info bits; zero means an ordinary user/application write.
pub fn source_info_to_text(source_info: u32) -> String {
    if source_info == 0 {
        return "USER/APPLICATION".to_string();
    }
    let names: Vec<&str> = SOURCE_INFO_MAP
        .iter()
        .filter(|(bit, _)| source_info & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        format!("UNKNOWN(0x{source_info:08X})")
    } else {
        names.join(" | ")
    }
}

/// One change-journal record, normalized across record versions.
///
/// For v2 records `frn`/`parent_frn` are the decimal rendering of the
/// 64-bit reference; for v3 they are the 128-bit FileId as 32 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsnEvent {
    pub volume: VolumeId,
    pub usn: i64,
    pub major_version: u16,
    pub frn: String,
    pub parent_frn: String,
    pub timestamp: FileTime,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name: String,
    pub record_length: u32,
}

impl UsnEvent {
    pub fn reason_text(&self) -> String {
        reason_to_text(self.reason)
    }

    pub fn source_info_text(&self) -> String {
        source_info_to_text(self.source_info)
    }
}

/// Classification of a wrap gap by the amount of journal space skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapSignificance {
    Low,
    Medium,
    High,
}

impl GapSignificance {
    pub fn classify(gap_size: i64) -> Self {
        if gap_size > 1024 * 1024 {
            GapSignificance::High
        } else if gap_size > 64 * 1024 {
            GapSignificance::Medium
        } else {
            GapSignificance::Low
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GapSignificance::Low => "LOW",
            GapSignificance::Medium => "MEDIUM",
            GapSignificance::High => "HIGH",
        }
    }

    /// Short description of what likely caused a gap of this size.
    pub fn potential_activity(self) -> &'static str {
        match self {
            GapSignificance::Low => "routine journal trimming",
            GapSignificance::Medium => "journal wrap during sustained file activity",
            GapSignificance::High => "journal wrap during heavy file activity; events lost",
        }
    }
}

/// A range of USNs the journal reported as deleted (wrapped past).
///
/// Gaps are non-overlapping: each one spans from the last USN we held to
/// the first USN that read successfully again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsnGap {
    pub volume: VolumeId,
    pub gap_start_usn: i64,
    pub gap_end_usn: i64,
    pub detection_time: FileTime,
}

impl UsnGap {
    pub fn gap_size(&self) -> i64 {
        self.gap_end_usn - self.gap_start_usn
    }

    pub fn significance(&self) -> GapSignificance {
        GapSignificance::classify(self.gap_size())
    }
}
