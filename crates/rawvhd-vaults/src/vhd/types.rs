//! VHD (Virtual Hard Disk) record definitions
//!
//! Fixed-layout, big-endian structures written into a dynamic VHD: the
//! 512-byte footer (also stored as a leading copy), the 1024-byte dynamic
//! header, and the Block Allocation Table.

use rawvhd_core::{sector_align, Error, Result, SECTOR_SIZE};

use super::geometry::DiskGeometry;

/// Size of one data block (2 MiB)
pub const VHD_BLOCK_SIZE: u32 = 2 * 1024 * 1024;

/// Bytes of sector bitmap per block, one bit per sector
pub const SECTOR_BITMAP_SIZE: u64 = VHD_BLOCK_SIZE as u64 / SECTOR_SIZE / 8;

/// Unwritten sectors left after every block, as vhd-util does
pub const BLOCK_PAD_SECTORS: u64 = 7;

/// BAT entry for a block with no storage
pub const BAT_UNALLOCATED: u32 = 0xFFFF_FFFF;

/// Offset of the dynamic header (right after the leading footer copy)
pub const DYNAMIC_HEADER_OFFSET: u64 = 512;

/// Offset of the BAT (right after the dynamic header)
pub const TABLE_OFFSET: u64 = DYNAMIC_HEADER_OFFSET + VhdDynamicHeader::SIZE as u64;

/// Footer features field; bit 1 is reserved and always set
pub const FEATURES_RESERVED: u32 = 0x0000_0002;

/// Format version 1.0
pub const FORMAT_VERSION: u32 = 0x0001_0000;

/// Creator application written by vhd-util
pub const DEFAULT_CREATOR_APP: [u8; 4] = *b"tap\0";

/// Creator version written by vhd-util
pub const CREATOR_VERSION: u32 = 0x0001_0003;

/// Creator host OS written by vhd-util
pub const CREATOR_HOST_OS: u32 = 0;

/// Data offset meaning "nothing follows"
pub const NO_DATA_OFFSET: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Ones'-complement sum of every byte in `bytes`
///
/// Callers pass the serialized record with its checksum field zeroed.
pub fn vhd_checksum(bytes: &[u8]) -> u32 {
    let sum = bytes
        .iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32));
    !sum
}

/// Sector bitmap marking every sector of a block present, padded to a sector
pub fn full_sector_bitmap() -> Vec<u8> {
    let mut bitmap = vec![0u8; sector_align(SECTOR_BITMAP_SIZE) as usize];
    bitmap[..SECTOR_BITMAP_SIZE as usize].fill(0xFF);
    bitmap
}

/// VHD disk type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VhdType {
    None = 0,
    Reserved1 = 1,
    Fixed = 2,
    Dynamic = 3,
    Differencing = 4,
    Reserved5 = 5,
    Reserved6 = 6,
}

impl VhdType {
    /// Parse VHD type from a u32 value
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(VhdType::None),
            1 => Ok(VhdType::Reserved1),
            2 => Ok(VhdType::Fixed),
            3 => Ok(VhdType::Dynamic),
            4 => Ok(VhdType::Differencing),
            5 => Ok(VhdType::Reserved5),
            6 => Ok(VhdType::Reserved6),
            _ => Err(Error::invalid_vault(format!("Invalid VHD disk type: {}", value))),
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            VhdType::Fixed => "fixed",
            VhdType::Dynamic => "dynamic",
            VhdType::Differencing => "differencing",
            _ => "reserved",
        }
    }
}

/// VHD Footer structure (512 bytes)
///
/// A dynamic VHD stores this record twice: at offset 0 and in the last
/// sector of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhdFooter {
    pub cookie: [u8; 8], // "conectix"
    pub features: u32,
    pub version: u32,
    pub data_offset: u64,
    pub timestamp: u32,
    pub creator_app: [u8; 4],
    pub creator_version: u32,
    pub creator_os: u32,
    pub original_size: u64,
    pub current_size: u64,
    pub geometry: DiskGeometry,
    pub disk_type: VhdType,
    pub checksum: u32,
    pub uuid: [u8; 16],
    pub saved_state: u8,
    pub reserved: [u8; 427],
}

impl VhdFooter {
    /// VHD footer cookie value "conectix"
    pub const COOKIE: &'static [u8; 8] = b"conectix";

    /// Size of the VHD footer in bytes
    pub const SIZE: usize = 512;

    /// Byte range of the checksum field
    const CHECKSUM_RANGE: std::ops::Range<usize> = 64..68;

    /// Build a sealed footer for a dynamic disk of `size` bytes
    pub fn dynamic(
        size: u64,
        geometry: DiskGeometry,
        timestamp: u32,
        creator_app: [u8; 4],
        uuid: [u8; 16],
    ) -> Self {
        let mut footer = Self {
            cookie: *Self::COOKIE,
            features: FEATURES_RESERVED,
            version: FORMAT_VERSION,
            data_offset: DYNAMIC_HEADER_OFFSET,
            timestamp,
            creator_app,
            creator_version: CREATOR_VERSION,
            creator_os: CREATOR_HOST_OS,
            original_size: size,
            current_size: size,
            geometry,
            disk_type: VhdType::Dynamic,
            checksum: 0,
            uuid,
            saved_state: 0,
            reserved: [0u8; 427],
        };
        footer.seal();
        footer
    }

    /// Recompute the checksum over the record with the field zeroed
    pub fn seal(&mut self) {
        self.checksum = 0;
        self.checksum = vhd_checksum(&self.to_bytes());
    }

    /// Parse VHD footer from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::invalid_vault("VHD footer too small"));
        }

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&bytes[0..8]);

        if &cookie != Self::COOKIE {
            return Err(Error::invalid_vault(format!(
                "Invalid VHD footer cookie: expected 'conectix', got '{}'",
                String::from_utf8_lossy(&cookie)
            )));
        }

        let mut creator_app = [0u8; 4];
        creator_app.copy_from_slice(&bytes[28..32]);

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[68..84]);

        let mut reserved = [0u8; 427];
        reserved.copy_from_slice(&bytes[85..512]);

        Ok(Self {
            cookie,
            features: be_u32(&bytes[8..12]),
            version: be_u32(&bytes[12..16]),
            data_offset: be_u64(&bytes[16..24]),
            timestamp: be_u32(&bytes[24..28]),
            creator_app,
            creator_version: be_u32(&bytes[32..36]),
            creator_os: be_u32(&bytes[36..40]),
            original_size: be_u64(&bytes[40..48]),
            current_size: be_u64(&bytes[48..56]),
            geometry: DiskGeometry::parse(&bytes[56..60]),
            disk_type: VhdType::from_u32(be_u32(&bytes[60..64]))?,
            checksum: be_u32(&bytes[Self::CHECKSUM_RANGE]),
            uuid,
            saved_state: bytes[84],
            reserved,
        })
    }

    /// Verify the footer checksum
    ///
    /// The checksum is the one's complement of the sum of all bytes in the
    /// footer, with the checksum field itself set to zero during calculation.
    pub fn verify_checksum(&self) -> bool {
        self.expected_checksum() == self.checksum
    }

    /// Checksum this record should carry
    pub fn expected_checksum(&self) -> u32 {
        let mut bytes = self.to_bytes();
        bytes[Self::CHECKSUM_RANGE].fill(0);
        vhd_checksum(&bytes)
    }

    /// Serialize footer to bytes
    pub fn serialize(&self, bytes: &mut [u8; Self::SIZE]) {
        bytes[0..8].copy_from_slice(&self.cookie);
        bytes[8..12].copy_from_slice(&self.features.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.version.to_be_bytes());
        bytes[16..24].copy_from_slice(&self.data_offset.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes[28..32].copy_from_slice(&self.creator_app);
        bytes[32..36].copy_from_slice(&self.creator_version.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.creator_os.to_be_bytes());
        bytes[40..48].copy_from_slice(&self.original_size.to_be_bytes());
        bytes[48..56].copy_from_slice(&self.current_size.to_be_bytes());
        bytes[56..60].copy_from_slice(&self.geometry.to_bytes());
        bytes[60..64].copy_from_slice(&(self.disk_type as u32).to_be_bytes());
        bytes[Self::CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[68..84].copy_from_slice(&self.uuid);
        bytes[84] = self.saved_state;
        bytes[85..512].copy_from_slice(&self.reserved);
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        self.serialize(&mut bytes);
        bytes
    }
}

/// VHD Dynamic Header structure (1024 bytes)
///
/// Located at the footer's `data_offset`. Parent fields are only meaningful
/// for differencing disks and stay zero here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhdDynamicHeader {
    pub cookie: [u8; 8], // "cxsparse"
    pub data_offset: u64,
    pub table_offset: u64,
    pub header_version: u32,
    pub max_table_entries: u32,
    pub block_size: u32,
    pub checksum: u32,
    pub parent_uuid: [u8; 16],
    pub parent_timestamp: u32,
    pub reserved1: u32,
    pub parent_unicode_name: [u16; 256],
    pub parent_locator_entries: [[u8; 24]; 8],
    pub reserved2: [u8; 256],
}

impl VhdDynamicHeader {
    /// VHD dynamic header cookie value "cxsparse"
    pub const COOKIE: &'static [u8; 8] = b"cxsparse";

    /// Size of the VHD dynamic header in bytes
    pub const SIZE: usize = 1024;

    const CHECKSUM_RANGE: std::ops::Range<usize> = 36..40;

    /// Build a sealed header for a disk with `max_table_entries` blocks
    pub fn new(max_table_entries: u32) -> Self {
        let mut header = Self {
            cookie: *Self::COOKIE,
            data_offset: NO_DATA_OFFSET,
            table_offset: TABLE_OFFSET,
            header_version: FORMAT_VERSION,
            max_table_entries,
            block_size: VHD_BLOCK_SIZE,
            checksum: 0,
            parent_uuid: [0u8; 16],
            parent_timestamp: 0,
            reserved1: 0,
            parent_unicode_name: [0u16; 256],
            parent_locator_entries: [[0u8; 24]; 8],
            reserved2: [0u8; 256],
        };
        header.seal();
        header
    }

    /// Recompute the checksum over the record with the field zeroed
    pub fn seal(&mut self) {
        self.checksum = 0;
        self.checksum = vhd_checksum(&self.to_bytes());
    }

    /// Parse VHD dynamic header from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::invalid_vault("VHD dynamic header too small"));
        }

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&bytes[0..8]);

        if &cookie != Self::COOKIE {
            return Err(Error::invalid_vault(format!(
                "Invalid VHD dynamic header cookie: expected 'cxsparse', got '{}'",
                String::from_utf8_lossy(&cookie)
            )));
        }

        let mut parent_uuid = [0u8; 16];
        parent_uuid.copy_from_slice(&bytes[40..56]);

        // Parent unicode name (256 UTF-16 BE characters)
        let mut parent_unicode_name = [0u16; 256];
        for (i, ch) in parent_unicode_name.iter_mut().enumerate() {
            let offset = 64 + i * 2;
            *ch = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        }

        let mut parent_locator_entries = [[0u8; 24]; 8];
        for (i, entry) in parent_locator_entries.iter_mut().enumerate() {
            let offset = 576 + i * 24;
            entry.copy_from_slice(&bytes[offset..offset + 24]);
        }

        let mut reserved2 = [0u8; 256];
        reserved2.copy_from_slice(&bytes[768..1024]);

        Ok(Self {
            cookie,
            data_offset: be_u64(&bytes[8..16]),
            table_offset: be_u64(&bytes[16..24]),
            header_version: be_u32(&bytes[24..28]),
            max_table_entries: be_u32(&bytes[28..32]),
            block_size: be_u32(&bytes[32..36]),
            checksum: be_u32(&bytes[Self::CHECKSUM_RANGE]),
            parent_uuid,
            parent_timestamp: be_u32(&bytes[56..60]),
            reserved1: be_u32(&bytes[60..64]),
            parent_unicode_name,
            parent_locator_entries,
            reserved2,
        })
    }

    /// Verify the dynamic header checksum
    pub fn verify_checksum(&self) -> bool {
        self.expected_checksum() == self.checksum
    }

    /// Checksum this record should carry
    pub fn expected_checksum(&self) -> u32 {
        let mut bytes = self.to_bytes();
        bytes[Self::CHECKSUM_RANGE].fill(0);
        vhd_checksum(&bytes)
    }

    /// Serialize dynamic header to bytes
    pub fn serialize(&self, bytes: &mut [u8; Self::SIZE]) {
        bytes[0..8].copy_from_slice(&self.cookie);
        bytes[8..16].copy_from_slice(&self.data_offset.to_be_bytes());
        bytes[16..24].copy_from_slice(&self.table_offset.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.header_version.to_be_bytes());
        bytes[28..32].copy_from_slice(&self.max_table_entries.to_be_bytes());
        bytes[32..36].copy_from_slice(&self.block_size.to_be_bytes());
        bytes[Self::CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[40..56].copy_from_slice(&self.parent_uuid);
        bytes[56..60].copy_from_slice(&self.parent_timestamp.to_be_bytes());
        bytes[60..64].copy_from_slice(&self.reserved1.to_be_bytes());

        for (i, ch) in self.parent_unicode_name.iter().enumerate() {
            let offset = 64 + i * 2;
            bytes[offset..offset + 2].copy_from_slice(&ch.to_be_bytes());
        }

        for (i, entry) in self.parent_locator_entries.iter().enumerate() {
            let offset = 576 + i * 24;
            bytes[offset..offset + 24].copy_from_slice(entry);
        }

        bytes[768..1024].copy_from_slice(&self.reserved2);
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        self.serialize(&mut bytes);
        bytes
    }
}

/// Block Allocation Table for dynamic VHDs
///
/// Maps each virtual block to the sector holding its bitmap, or to
/// [`BAT_UNALLOCATED`]. Entries are appended in block order while the input
/// is scanned and never revised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockAllocationTable {
    entries: Vec<u32>,
}

impl BlockAllocationTable {
    /// Empty table with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Record the next block as unallocated
    pub fn push_unallocated(&mut self) {
        self.entries.push(BAT_UNALLOCATED);
    }

    /// Record the next block as stored at `sector`
    pub fn push_allocated(&mut self, sector: u32) {
        self.entries.push(sector);
    }

    /// All entries in block order
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of blocks with storage
    pub fn allocated_count(&self) -> usize {
        self.entries.iter().filter(|&&e| e != BAT_UNALLOCATED).count()
    }

    /// Big-endian entries, zero-padded to a whole number of sectors
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.entries.len() * 4;
        let mut bytes = Vec::with_capacity(sector_align(len as u64) as usize);
        for entry in &self.entries {
            bytes.extend_from_slice(&entry.to_be_bytes());
        }
        bytes.resize(sector_align(len as u64) as usize, 0);
        bytes
    }

    /// Parse BAT from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::invalid_vault("BAT size must be multiple of 4"));
        }

        Ok(Self {
            entries: bytes.chunks_exact(4).map(be_u32).collect(),
        })
    }

    /// Get the byte offset of a block's bitmap
    ///
    /// Returns None if the block is not allocated (sparse)
    pub fn get_block_offset(&self, block_index: usize) -> Option<u64> {
        match self.entries.get(block_index) {
            Some(&entry) if entry != BAT_UNALLOCATED => Some(entry as u64 * SECTOR_SIZE),
            _ => None,
        }
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
