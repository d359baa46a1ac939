//! Raw image to VHD conversion crate
//!
//! Provides functionality for:
//! - Converting a raw disk image into a sparse dynamic VHD
//! - Hashing the source data while it is scanned (MD5, SHA1, SHA256)
//! - Progress reporting and cancellation during conversion
//!
//! ## Example
//!
//! ```rust
//! use rawvhd_acquire::{VhdConverter, VhdOptions};
//! use std::io::Cursor;
//!
//! let mut raw = Cursor::new(vec![0x5Au8; 4096]);
//! let mut vhd = Cursor::new(Vec::new());
//! let result = VhdConverter::new(VhdOptions::default())
//!     .convert(&mut raw, &mut vhd)
//!     .unwrap();
//!
//! assert_eq!(result.allocated_blocks, 1);
//! assert_eq!(result.output_size, vhd.get_ref().len() as u64);
//! ```

pub mod error;
pub mod hash;
pub mod progress;
pub mod vhd;

pub use error::{ConvertError, ErrorClass, Result};
pub use hash::{HashAlgorithm, HashResult, Hasher};
pub use progress::{ConvertProgress, ProgressCallback};
pub use vhd::{ConversionResult, VhdConverter, VhdOptions, VhdTimestamp};
