//! Windows raw-device backing for [`SectorSource`].
//!
//! Opens `\\.\<letter>:` read-only with full sharing. Requires an
//! elevated process; a denied open is fatal for the pass.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::windows::fs::OpenOptionsExt;

use core_types::VolumeId;
use tracing::info;
use windows::Win32::Foundation::GENERIC_READ;
use windows::Win32::Storage::FileSystem::{
    FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
};

use crate::{SectorSource, VolumeError, VolumeResult};

/// An open read-only handle to a raw NTFS volume.
pub struct RawVolume {
    file: File,
    path: String,
}

impl RawVolume {
    /// Open the volume device for the given drive letter.
    pub fn open(volume: VolumeId) -> VolumeResult<Self> {
        let path = volume.device_path();
        let file = OpenOptions::new()
            .access_mode(GENERIC_READ.0)
            .share_mode(FILE_SHARE_READ.0 | FILE_SHARE_WRITE.0 | FILE_SHARE_DELETE.0)
            .open(&path)
            .map_err(|err| VolumeError::Open {
                path: path.clone(),
                message: err.to_string(),
            })?;
        info!(volume = %volume, "opened raw volume read-only");
        Ok(RawVolume { file, path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SectorSource for RawVolume {
    fn read_sectors(
        &mut self,
        start: u64,
        count: u64,
        bytes_per_sector: u16,
    ) -> VolumeResult<Vec<u8>> {
        let offset = start * u64::from(bytes_per_sector);
        let len = count as usize * bytes_per_sector as usize;
        let mut buf = vec![0u8; len];

        let read_err = |err: std::io::Error| VolumeError::Read {
            start,
            end: start + count,
            message: err.to_string(),
        };

        self.file.seek(SeekFrom::Start(offset)).map_err(read_err)?;
        self.file.read_exact(&mut buf).map_err(read_err)?;
        Ok(buf)
    }
}
