//! VHD timestamps
//!
//! The footer stores seconds since 2000-01-01 00:00:00 UTC in a u32.

use chrono::{DateTime, TimeZone, Utc};

/// Unix time of the VHD epoch
pub const VHD_EPOCH_UNIX: i64 = 946_684_800;

/// The VHD epoch as a `DateTime`
pub fn vhd_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(VHD_EPOCH_UNIX, 0).single().unwrap_or_default()
}

/// Seconds between the VHD epoch and `at`, clamped to the u32 field
pub fn to_vhd_timestamp(at: DateTime<Utc>) -> u32 {
    let secs = at.timestamp() - VHD_EPOCH_UNIX;
    secs.clamp(0, u32::MAX as i64) as u32
}

/// Instant a stored VHD timestamp refers to
pub fn from_vhd_timestamp(timestamp: u32) -> DateTime<Utc> {
    vhd_epoch() + chrono::Duration::seconds(timestamp as i64)
}
