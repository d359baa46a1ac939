//! # rawvhd Core
//!
//! Shared building blocks for the rawvhd converter:
//! - **Errors**: the format-level [`Error`] type used when building or reading
//!   VHD records
//! - **Sectors**: 512-byte sector arithmetic and rounding rules
//! - **Streams**: `Read + Seek` / `Write + Seek` trait objects
//!
//! ## Example
//!
//! ```rust
//! use rawvhd_core::sector::{div_round_up, sectors_for, SECTOR_SIZE};
//!
//! assert_eq!(div_round_up(3, 512), 1);
//! assert_eq!(sectors_for(1536), 3);
//! assert_eq!(SECTOR_SIZE, 512);
//! ```

pub mod error;
pub mod sector;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{Error, Result};
pub use sector::{div_round_up, is_sector_aligned, sector_align, sectors_for, SECTOR_SIZE};
pub use traits::{stream_len, ReadSeek, WriteSeek};
pub use types::format_size;
