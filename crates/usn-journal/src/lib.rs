//! USN change-journal reading.
//!
//! Record decoding is pure over byte buffers (v2 and v3 layouts); the
//! read loop is generic over a [`JournalIo`] port so its error policy
//! (invalid-parameter advancement, wrap-gap probing, stall and timeout
//! guards) is exercised by tests without a Windows volume. The ioctl
//! implementation of the port lives behind `#[cfg(windows)]`.

mod exclusion;
mod reader;
mod record;

#[cfg(windows)]
mod device;

pub use exclusion::ExclusionFilter;
pub use reader::{
    run_read_loop, CursorStep, JournalIo, JournalIoError, UsnEventStream, UsnJournalData,
    UsnPassStats, UsnReadConfig, UsnReadCursor,
};
pub use record::{parse_read_buffer, parse_usn_record, ParsedBuffer};

#[cfg(windows)]
pub use device::WindowsJournal;

use thiserror::Error;

/// Pass-level USN failures. Error codes 87 and 1181 never surface here;
/// they are advancement conditions handled inside the loop.
#[derive(Debug, Error)]
pub enum UsnError {
    #[error("failed to open volume {path}: {message}")]
    Open { path: String, message: String },
    #[error("USN journal is not active on this volume")]
    JournalNotActive,
    #[error("USN journal query failed: {0}")]
    Query(String),
    #[error("USN journal read failed with OS error {code}")]
    Read { code: u32 },
}

pub type UsnResult<T> = Result<T, UsnError>;
