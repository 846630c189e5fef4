//! Windows FILETIME handling.
//!
//! A FILETIME counts 100-nanosecond intervals since 1601-01-01 UTC. Zero
//! means "no time", and anything that does not land inside chrono's
//! representable range is treated the same way rather than reported as an
//! error; a timestamp field that cannot be read must never sink a record.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds between 1601-01-01 and the Unix epoch.
pub const EPOCH_DELTA_SECS: i64 = 11_644_473_600;

/// 100-ns intervals per second.
const HUNDRED_NS_PER_SEC: i64 = 10_000_000;

/// Raw FILETIME value as read off disk.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileTime(pub u64);

impl FileTime {
    pub const ZERO: FileTime = FileTime(0);

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        FileTime(u64::from_le_bytes(bytes))
    }

    /// Read a FILETIME from the first 8 bytes of a slice, if present.
    pub fn read(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = slice.get(..8)?.try_into().ok()?;
        Some(Self::from_le_bytes(bytes))
    }

    /// Convert to a UTC datetime. `None` for zero and for values outside
    /// the representable range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if self.0 == 0 {
            return None;
        }
        let raw = i64::try_from(self.0).ok()?;
        let secs = raw / HUNDRED_NS_PER_SEC - EPOCH_DELTA_SECS;
        let nanos = (raw % HUNDRED_NS_PER_SEC) * 100;
        Utc.timestamp_opt(secs, nanos as u32).single()
    }

    /// Build a FILETIME from a UTC datetime. Dates before 1601 yield
    /// `FileTime::ZERO` ("no time"); sub-100ns precision truncates.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp() + EPOCH_DELTA_SECS;
        if secs < 0 {
            return FileTime::ZERO;
        }
        let intervals = secs as u64 * HUNDRED_NS_PER_SEC as u64
            + u64::from(dt.timestamp_subsec_nanos()) / 100;
        FileTime(intervals)
    }

    /// ISO-8601 rendering in UTC, or empty string for "no time".
    pub fn to_iso8601(self) -> String {
        self.to_datetime()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }
}

/// Convert a UTC datetime to raw FILETIME intervals; used by the search
/// layer when a store keeps FILETIME columns as integers.
pub fn datetime_to_filetime_ticks(dt: DateTime<Utc>) -> i64 {
    (dt.timestamp() + EPOCH_DELTA_SECS) * HUNDRED_NS_PER_SEC
}
