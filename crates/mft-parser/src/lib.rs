//! MFT record decoding.
//!
//! Consumes raw record bytes from `ntfs-volume` and emits normalized
//! [`core_types::MftRecord`]s. Per-record and per-attribute failures are
//! never fatal: a malformed record is dropped with a debug log and a
//! counter bump, a malformed attribute inside a valid record is skipped
//! individually, and the pass continues.

mod attributes;
mod fixup;
mod record;
mod stream;

pub use fixup::apply_fixup;
pub use record::{parse_record, ParserOptions};
pub use stream::{MftRecordStream, MftStreamStats};

use thiserror::Error;

/// Pass-level MFT parsing failures. Anything recoverable is handled
/// inside the parser and only counted.
#[derive(Debug, Error)]
pub enum MftError {
    #[error(transparent)]
    Volume(#[from] ntfs_volume::VolumeError),
}

pub type MftResult<T> = Result<T, MftError>;
