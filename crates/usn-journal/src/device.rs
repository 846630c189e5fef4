//! Windows ioctl implementation of [`JournalIo`].

use std::ffi::c_void;
use std::mem::size_of;

use core_types::VolumeId;
use tracing::debug;
use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, GENERIC_READ, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
    OPEN_EXISTING,
};
use windows::Win32::System::Ioctl::{
    FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_USN_JOURNAL, READ_USN_JOURNAL_DATA_V1,
    USN_JOURNAL_DATA_V0, USN_JOURNAL_DATA_V1, USN_JOURNAL_DATA_V2,
};
use windows::Win32::System::IO::DeviceIoControl;

use crate::reader::{JournalIo, JournalIoError, UsnJournalData};
use crate::{UsnError, UsnResult};

/// Extract the Win32 error code from a windows-crate error.
fn win32_code(err: &windows::core::Error) -> u32 {
    (err.code().0 & 0xFFFF) as u32
}

/// An open journal handle on a live volume.
pub struct WindowsJournal {
    handle: HANDLE,
    volume: VolumeId,
}

impl WindowsJournal {
    /// Open the volume device for journal ioctls. Needs an elevated
    /// process, like every raw-volume consumer.
    pub fn open(volume: VolumeId) -> UsnResult<Self> {
        let path = volume.device_path();
        let handle = unsafe {
            CreateFileW(
                &HSTRING::from(path.as_str()),
                GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES::default(),
                None,
            )
        }
        .map_err(|err| UsnError::Open {
            path,
            message: err.message(),
        })?;
        Ok(WindowsJournal { handle, volume })
    }

    fn query_sized<T: Default>(&mut self) -> Result<T, u32> {
        let mut data = T::default();
        let mut returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_QUERY_USN_JOURNAL,
                None,
                0,
                Some(std::ptr::addr_of_mut!(data).cast::<c_void>()),
                size_of::<T>() as u32,
                Some(&mut returned),
                None,
            )
        }
        .map_err(|err| win32_code(&err))?;
        Ok(data)
    }
}

impl JournalIo for WindowsJournal {
    fn query(&mut self) -> UsnResult<UsnJournalData> {
        // Newest query layout first; older systems reject the larger
        // output structures with ERROR_INVALID_PARAMETER.
        match self.query_sized::<USN_JOURNAL_DATA_V2>() {
            Ok(d) => {
                return Ok(UsnJournalData {
                    journal_id: d.UsnJournalID,
                    first_usn: d.FirstUsn,
                    next_usn: d.NextUsn,
                    lowest_valid_usn: d.LowestValidUsn,
                    max_usn: d.MaxUsn,
                    query_version: 2,
                })
            }
            Err(crate::reader::ERROR_JOURNAL_NOT_ACTIVE) => {
                return Err(UsnError::JournalNotActive)
            }
            Err(code) => debug!(volume = %self.volume, code, "v2 journal query rejected"),
        }
        match self.query_sized::<USN_JOURNAL_DATA_V1>() {
            Ok(d) => {
                return Ok(UsnJournalData {
                    journal_id: d.UsnJournalID,
                    first_usn: d.FirstUsn,
                    next_usn: d.NextUsn,
                    lowest_valid_usn: d.LowestValidUsn,
                    max_usn: d.MaxUsn,
                    query_version: 1,
                })
            }
            Err(crate::reader::ERROR_JOURNAL_NOT_ACTIVE) => {
                return Err(UsnError::JournalNotActive)
            }
            Err(code) => debug!(volume = %self.volume, code, "v1 journal query rejected"),
        }
        match self.query_sized::<USN_JOURNAL_DATA_V0>() {
            Ok(d) => Ok(UsnJournalData {
                journal_id: d.UsnJournalID,
                first_usn: d.FirstUsn,
                next_usn: d.NextUsn,
                lowest_valid_usn: d.LowestValidUsn,
                max_usn: d.MaxUsn,
                query_version: 0,
            }),
            Err(crate::reader::ERROR_JOURNAL_NOT_ACTIVE) => Err(UsnError::JournalNotActive),
            Err(code) => Err(UsnError::Query(format!(
                "QUERY_USN_JOURNAL failed with OS error {code}"
            ))),
        }
    }

    fn read(
        &mut self,
        start_usn: i64,
        journal_id: u64,
        buffer_size: usize,
    ) -> Result<Vec<u8>, JournalIoError> {
        let mut request = READ_USN_JOURNAL_DATA_V1 {
            StartUsn: start_usn,
            ReasonMask: 0xFFFF_FFFF,
            ReturnOnlyOnClose: 0,
            Timeout: 0,
            BytesToWaitFor: 0,
            UsnJournalID: journal_id,
            MinMajorVersion: 2,
            MaxMajorVersion: 3,
        };
        let mut buffer = vec![0u8; buffer_size];
        let mut returned = 0u32;

        unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_READ_USN_JOURNAL,
                Some(std::ptr::addr_of_mut!(request).cast::<c_void>()),
                size_of::<READ_USN_JOURNAL_DATA_V1>() as u32,
                Some(buffer.as_mut_ptr().cast::<c_void>()),
                buffer_size as u32,
                Some(&mut returned),
                None,
            )
        }
        .map_err(|err| JournalIoError {
            code: win32_code(&err),
        })?;

        buffer.truncate(returned as usize);
        Ok(buffer)
    }
}

impl Drop for WindowsJournal {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}
