//! # rawvhd Vaults
//!
//! On-disk structures of the Microsoft VHD container.
//!
//! This crate knows how to lay out and serialize a dynamic VHD:
//! - **Geometry**: CHS values and structure offsets derived from the disk size
//! - **Records**: the footer, the dynamic header, and the Block Allocation Table,
//!   each with its ones'-complement checksum
//! - **Inspection**: reading those records back from an existing file and
//!   checking them for consistency
//!
//! ## Example
//!
//! ```rust
//! use rawvhd_vaults::vhd::{VhdDynamicHeader, VhdFooter, VhdLayout, DEFAULT_CREATOR_APP};
//!
//! let layout = VhdLayout::for_size(3).unwrap();
//! let footer = VhdFooter::dynamic(3, layout.geometry, 0, DEFAULT_CREATOR_APP, [0u8; 16]);
//! let header = VhdDynamicHeader::new(layout.bat_entries);
//!
//! assert!(footer.verify_checksum());
//! assert!(header.verify_checksum());
//! assert_eq!(layout.first_block_sector, 4);
//! ```

pub mod vhd;

pub use vhd::{
    BlockAllocationTable, DiskGeometry, VhdDynamicHeader, VhdFooter, VhdInspection, VhdLayout,
};
