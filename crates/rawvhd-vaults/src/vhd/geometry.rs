//! Disk geometry and file layout for dynamic VHDs
//!
//! Everything here is pure arithmetic over the input length. The CHS
//! algorithm follows the one in the VHD format document, including its
//! truncating divisions, so that the geometry matches what other VHD tools
//! write for the same size.

use rawvhd_core::{div_round_up, sector_align, sectors_for, Error, Result, SECTOR_SIZE};
use serde::Serialize;

use super::types::{
    VhdDynamicHeader, VhdFooter, BLOCK_PAD_SECTORS, SECTOR_BITMAP_SIZE, VHD_BLOCK_SIZE,
};

/// Largest sector count the CHS fields can describe
pub const MAX_CHS_SECTORS: u64 = 65535 * 16 * 255;

/// Sector count above which the 255-sectors-per-track form is used
const LARGE_DISK_SECTORS: u64 = 65535 * 16 * 63;

/// Disk geometry (CHS addressing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors: u8,
}

impl DiskGeometry {
    /// Compute the VHD geometry for a disk of `size` bytes
    ///
    /// The result is a pure function of `size`. Cylinders are checked to fit
    /// the 16-bit field; with the sector clamp this cannot fail for any
    /// `u64`, so an error here means the arithmetic is wrong.
    pub fn for_size(size: u64) -> Result<Self> {
        let sectors = sectors_for(size).min(MAX_CHS_SECTORS);

        let (spt, heads, cyl_times_heads) = if sectors >= LARGE_DISK_SECTORS {
            (255, 16, sectors / 255)
        } else {
            let mut spt = 17;
            let mut cth = sectors / spt;
            let mut heads = div_round_up(cth, 1024).max(4);

            if cth >= heads * 1024 || heads > 16 {
                spt = 31;
                cth = sectors / spt;
                heads = 16;
            }

            if cth >= heads * 1024 {
                spt = 63;
                cth = sectors / spt;
                heads = 16;
            }

            (spt, heads, cth)
        };

        let cylinders = cyl_times_heads / heads;

        Ok(Self {
            cylinders: u16::try_from(cylinders).map_err(|_| {
                Error::invariant(format!(
                    "{} cylinders do not fit the geometry field (size {})",
                    cylinders, size
                ))
            })?,
            heads: u8::try_from(heads)
                .map_err(|_| Error::invariant(format!("{} heads out of range", heads)))?,
            sectors: u8::try_from(spt)
                .map_err(|_| Error::invariant(format!("{} sectors per track out of range", spt)))?,
        })
    }

    /// Parse disk geometry from bytes
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            cylinders: u16::from_be_bytes([bytes[0], bytes[1]]),
            heads: bytes[2],
            sectors: bytes[3],
        }
    }

    /// Convert geometry to bytes
    pub fn to_bytes(&self) -> [u8; 4] {
        let cyl_bytes = self.cylinders.to_be_bytes();
        [cyl_bytes[0], cyl_bytes[1], self.heads, self.sectors]
    }

    /// Total sectors addressable through this geometry
    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors as u64
    }
}

impl std::fmt::Display for DiskGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.cylinders, self.heads, self.sectors)
    }
}

/// Placement of every structure in a dynamic VHD built from `disk_size` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VhdLayout {
    /// Virtual disk size (the raw input length)
    pub disk_size: u64,
    /// Number of BAT entries, one per block
    pub bat_entries: u32,
    /// Sectors occupied by the BAT
    pub bat_sectors: u64,
    /// Sector where the first allocated block will be written
    pub first_block_sector: u64,
    /// CHS geometry stored in the footer
    pub geometry: DiskGeometry,
}

impl VhdLayout {
    /// Compute the layout for a raw image of `disk_size` bytes
    pub fn for_size(disk_size: u64) -> Result<Self> {
        let bat_entries = div_round_up(disk_size, VHD_BLOCK_SIZE as u64);
        let bat_entries = u32::try_from(bat_entries).map_err(|_| {
            Error::unsupported(format!(
                "{} bytes needs {} blocks, more than a BAT can index",
                disk_size, bat_entries
            ))
        })?;
        let bat_sectors = sectors_for(bat_entries as u64 * 4);
        let header_sectors = (VhdFooter::SIZE + VhdDynamicHeader::SIZE) as u64 / SECTOR_SIZE;

        Ok(Self {
            disk_size,
            bat_entries,
            bat_sectors,
            first_block_sector: header_sectors + bat_sectors,
            geometry: DiskGeometry::for_size(disk_size)?,
        })
    }

    /// Byte offset where block data begins
    pub fn first_block_offset(&self) -> u64 {
        self.first_block_sector * SECTOR_SIZE
    }

    /// Sector bitmap size after padding to whole sectors
    pub fn bitmap_bytes(&self) -> u64 {
        sector_align(SECTOR_BITMAP_SIZE)
    }

    /// Bytes consumed by one allocated block: bitmap, data, and trailing gap
    pub fn block_stride(&self) -> u64 {
        self.bitmap_bytes() + VHD_BLOCK_SIZE as u64 + BLOCK_PAD_SECTORS * SECTOR_SIZE
    }

    /// Sector of the last block if every block were allocated
    pub fn worst_case_last_sector(&self) -> u64 {
        let preceding = (self.bat_entries as u64).saturating_sub(1);
        self.first_block_sector + preceding * (self.block_stride() / SECTOR_SIZE)
    }

    /// Whether every possible block offset fits a 32-bit BAT entry
    pub fn fits_bat(&self) -> bool {
        self.worst_case_last_sector() < u32::MAX as u64
    }

    /// Output length when `allocated` blocks are present
    pub fn output_size(&self, allocated: u32) -> u64 {
        self.first_block_offset() + allocated as u64 * self.block_stride() + VhdFooter::SIZE as u64
    }
}
