//! Read-only raw access to NTFS volumes.
//!
//! The crate splits into a platform-independent core (boot-sector parsing,
//! record plausibility checks, MFT sizing and slack scanning over any
//! [`SectorSource`]) and a thin Windows device layer that opens
//! `\\.\<letter>:` and satisfies reads with aligned preads. Everything the
//! parsers consume is expressed against the trait so the whole crate is
//! testable with in-memory volume images.

mod boot;
mod reader;

#[cfg(windows)]
mod device;

pub use boot::{BootSector, VolumeGeometry, NTFS_SIGNATURE};
pub use reader::{is_valid_file_record, MftSize, SectorSource, VolumeReader, FALLBACK_MFT_RECORDS};

#[cfg(windows)]
pub use device::RawVolume;

use thiserror::Error;

/// Errors surfaced by raw volume access. Everything maps onto the
/// volume-access failure kind: device opens, sector reads, and NTFS
/// validation.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("failed to open volume {path}: {message}")]
    Open { path: String, message: String },
    #[error("failed to read sectors {start}..{end}: {message}")]
    Read {
        start: u64,
        end: u64,
        message: String,
    },
    #[error("not an NTFS volume (bad boot signature)")]
    NotNtfs,
    #[error("malformed boot sector: {0}")]
    BootSector(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VolumeResult<T> = Result<T, VolumeError>;
