//! Sector arithmetic
//!
//! Every VHD structure offset is a multiple of the 512-byte sector. Rounding
//! is always toward positive infinity so that layouts match other VHD tools
//! bit for bit.

/// Size of a disk sector in bytes
pub const SECTOR_SIZE: u64 = 512;

/// Integer ceiling division
///
/// # Panics
///
/// Panics if `den` is zero.
pub const fn div_round_up(num: u64, den: u64) -> u64 {
    if num == 0 {
        0
    } else {
        (num - 1) / den + 1
    }
}

/// Number of whole sectors needed to hold `bytes`
pub const fn sectors_for(bytes: u64) -> u64 {
    div_round_up(bytes, SECTOR_SIZE)
}

/// Round `bytes` up to the next sector boundary
pub const fn sector_align(bytes: u64) -> u64 {
    sectors_for(bytes) * SECTOR_SIZE
}

/// True if `offset` sits on a sector boundary
pub const fn is_sector_aligned(offset: u64) -> bool {
    offset % SECTOR_SIZE == 0
}
