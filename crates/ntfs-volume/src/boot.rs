//! NTFS boot-sector parsing.

use crate::{VolumeError, VolumeResult};

/// OEM id at bytes 3..11 of sector 0.
pub const NTFS_SIGNATURE: &[u8; 8] = b"NTFS    ";

/// Volume geometry derived from the boot sector. Immutable after
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    /// LCN of the start of the MFT.
    pub mft_cluster: u64,
    pub mft_record_size: u32,
}

impl VolumeGeometry {
    pub fn bytes_per_cluster(&self) -> u64 {
        u64::from(self.bytes_per_sector) * u64::from(self.sectors_per_cluster)
    }

    /// Byte offset of MFT record `n` on the volume.
    pub fn mft_record_offset(&self, n: u64) -> u64 {
        self.mft_cluster * self.bytes_per_cluster() + n * u64::from(self.mft_record_size)
    }
}

/// Parsed view of sector 0.
#[derive(Debug, Clone, Copy)]
pub struct BootSector {
    pub geometry: VolumeGeometry,
}

impl BootSector {
    /// Parse a raw boot sector. Rejects anything that does not carry the
    /// NTFS OEM id.
    pub fn parse(sector: &[u8]) -> VolumeResult<Self> {
        if sector.len() < 512 {
            return Err(VolumeError::BootSector(format!(
                "boot sector truncated to {} bytes",
                sector.len()
            )));
        }
        if &sector[3..11] != NTFS_SIGNATURE {
            return Err(VolumeError::NotNtfs);
        }

        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        let sectors_per_cluster = sector[13];
        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            return Err(VolumeError::BootSector(
                "zero sector or cluster size".to_string(),
            ));
        }

        let mft_cluster = u64::from_le_bytes(sector[48..56].try_into().expect("8-byte slice"));

        // Signed: positive counts clusters per record, negative encodes a
        // power-of-two byte size.
        let clusters_per_record = sector[64] as i8;
        let mft_record_size = if clusters_per_record > 0 {
            u32::from(clusters_per_record as u8)
                * u32::from(sectors_per_cluster)
                * u32::from(bytes_per_sector)
        } else {
            1u32 << u32::from((-i32::from(clusters_per_record)) as u8)
        };

        if mft_record_size == 0 || mft_record_size > 1 << 20 {
            return Err(VolumeError::BootSector(format!(
                "implausible MFT record size {mft_record_size}"
            )));
        }

        Ok(BootSector {
            geometry: VolumeGeometry {
                bytes_per_sector,
                sectors_per_cluster,
                mft_cluster,
                mft_record_size,
            },
        })
    }
}

#[cfg(test)]
pub(crate) fn synthetic_boot_sector(
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    mft_cluster: u64,
    clusters_per_record: i8,
) -> [u8; 512] {
    let mut sector = [0u8; 512];
    sector[3..11].copy_from_slice(NTFS_SIGNATURE);
    sector[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
    sector[13] = sectors_per_cluster;
    sector[48..56].copy_from_slice(&mft_cluster.to_le_bytes());
    sector[64] = clusters_per_record as u8;
    sector
}
