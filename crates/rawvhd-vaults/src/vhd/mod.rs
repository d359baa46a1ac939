//! VHD (Virtual Hard Disk) dynamic disk format
//!
//! ## Format Overview
//!
//! A dynamic VHD produced by rawvhd is laid out as:
//!
//! ```text
//! 0                         footer copy            512 B
//! 512                       dynamic header         1024 B
//! 1536                      BAT                    sector-rounded
//! first_block_sector * 512  (bitmap, block, 7-sector gap) per allocated block
//! EOF - 512                 footer
//! ```
//!
//! All integers are big-endian. Blocks that are entirely zero get a BAT
//! entry of `0xFFFFFFFF` and no storage.

pub mod geometry;
pub mod inspect;
pub mod time;
pub mod types;

pub use geometry::{DiskGeometry, VhdLayout};
pub use inspect::{InspectionSummary, VhdInspection};
pub use time::{from_vhd_timestamp, to_vhd_timestamp};
pub use types::{
    full_sector_bitmap, vhd_checksum, BlockAllocationTable, VhdDynamicHeader, VhdFooter, VhdType,
    BAT_UNALLOCATED, BLOCK_PAD_SECTORS, DEFAULT_CREATOR_APP, VHD_BLOCK_SIZE,
};
