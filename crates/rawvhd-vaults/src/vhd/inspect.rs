//! Structural inspection of dynamic VHD files
//!
//! Reads the two footer copies, the dynamic header, and the BAT, and checks
//! them against each other. Block payloads are never read.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use rawvhd_core::{stream_len, Error, Result, SECTOR_SIZE};
use serde::Serialize;
use uuid::Uuid;

use super::geometry::{DiskGeometry, VhdLayout};
use super::time::from_vhd_timestamp;
use super::types::{
    BlockAllocationTable, VhdDynamicHeader, VhdFooter, VhdType, VHD_BLOCK_SIZE,
};

/// Metadata read back from a VHD file
#[derive(Debug, Clone)]
pub struct VhdInspection {
    /// Length of the file in bytes
    pub file_len: u64,
    /// Footer from the last sector
    pub footer: VhdFooter,
    /// Copy at offset 0, if it parsed
    pub header_copy: Option<VhdFooter>,
    /// Dynamic header at the footer's data offset
    pub dynamic_header: VhdDynamicHeader,
    /// Block Allocation Table
    pub bat: BlockAllocationTable,
}

impl VhdInspection {
    /// Inspect a VHD file on disk
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        Self::read(&mut file)
    }

    /// Inspect a VHD from any seekable reader
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Self> {
        let file_len = stream_len(reader)?;
        let min_len = (VhdFooter::SIZE * 2 + VhdDynamicHeader::SIZE) as u64;
        if file_len < min_len {
            return Err(Error::invalid_vault(format!(
                "File too small to be a dynamic VHD: {} bytes",
                file_len
            )));
        }

        reader.seek(SeekFrom::End(-(VhdFooter::SIZE as i64)))?;
        let mut footer_bytes = [0u8; VhdFooter::SIZE];
        reader.read_exact(&mut footer_bytes)?;
        let footer = VhdFooter::parse(&footer_bytes)?;

        reader.seek(SeekFrom::Start(0))?;
        let mut copy_bytes = [0u8; VhdFooter::SIZE];
        reader.read_exact(&mut copy_bytes)?;
        let header_copy = match VhdFooter::parse(&copy_bytes) {
            Ok(copy) => Some(copy),
            Err(e) => {
                tracing::debug!("Leading footer copy unreadable: {}", e);
                None
            }
        };

        if footer.disk_type != VhdType::Dynamic {
            return Err(Error::unsupported(format!(
                "Only dynamic VHDs can be inspected, found {}",
                footer.disk_type.name()
            )));
        }

        if footer.data_offset > file_len - VhdDynamicHeader::SIZE as u64 {
            return Err(Error::invalid_vault(format!(
                "Dynamic header offset {} lies outside the file",
                footer.data_offset
            )));
        }

        reader.seek(SeekFrom::Start(footer.data_offset))?;
        let mut dyn_bytes = [0u8; VhdDynamicHeader::SIZE];
        reader.read_exact(&mut dyn_bytes)?;
        let dynamic_header = VhdDynamicHeader::parse(&dyn_bytes)?;

        // Bound the allocation by the file itself before trusting the count
        let bat_len = dynamic_header.max_table_entries as u64 * 4;
        let table_offset = dynamic_header.table_offset;
        if table_offset > file_len || bat_len > file_len - table_offset {
            return Err(Error::invalid_vault(format!(
                "BAT of {} entries at offset {} runs past the end of the file",
                dynamic_header.max_table_entries, dynamic_header.table_offset
            )));
        }

        reader.seek(SeekFrom::Start(dynamic_header.table_offset))?;
        let mut bat_bytes = vec![0u8; bat_len as usize];
        reader.read_exact(&mut bat_bytes)?;
        let bat = BlockAllocationTable::parse(&bat_bytes)?;

        tracing::debug!(
            "Inspected VHD: {} bytes virtual, {} of {} blocks allocated",
            footer.current_size,
            bat.allocated_count(),
            bat.len()
        );

        Ok(Self {
            file_len,
            footer,
            header_copy,
            dynamic_header,
            bat,
        })
    }

    /// Problems found in the file, empty when it is consistent
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let footer = &self.footer;
        let header = &self.dynamic_header;

        if !footer.verify_checksum() {
            problems.push(format!(
                "footer checksum 0x{:08X} does not match computed 0x{:08X}",
                footer.checksum,
                footer.expected_checksum()
            ));
        }

        match &self.header_copy {
            None => problems.push("leading footer copy is missing or unreadable".to_string()),
            Some(copy) if copy != footer => {
                problems.push("leading footer copy differs from the trailing footer".to_string())
            }
            Some(_) => {}
        }

        if !header.verify_checksum() {
            problems.push(format!(
                "dynamic header checksum 0x{:08X} does not match computed 0x{:08X}",
                header.checksum,
                header.expected_checksum()
            ));
        }

        if footer.original_size != footer.current_size {
            problems.push(format!(
                "original size {} differs from current size {}",
                footer.original_size, footer.current_size
            ));
        }

        match DiskGeometry::for_size(footer.current_size) {
            Ok(expected) if expected != footer.geometry => problems.push(format!(
                "geometry {} does not match {} computed for the size",
                footer.geometry, expected
            )),
            Ok(_) => {}
            Err(e) => problems.push(e.to_string()),
        }

        if header.block_size != VHD_BLOCK_SIZE {
            problems.push(format!(
                "block size {} is not the expected {}",
                header.block_size, VHD_BLOCK_SIZE
            ));
        }

        let expected_entries = match VhdLayout::for_size(footer.current_size) {
            Ok(layout) => layout.bat_entries,
            Err(e) => {
                problems.push(e.to_string());
                header.max_table_entries
            }
        };
        if header.max_table_entries != expected_entries {
            problems.push(format!(
                "BAT holds {} entries but the disk size needs {}",
                header.max_table_entries, expected_entries
            ));
        }

        let body_start = header.table_offset + self.bat_region_len();
        let body_end = self.file_len - VhdFooter::SIZE as u64;
        let block_span = self.bitmap_region_len() + header.block_size as u64;
        for index in 0..self.bat.len() {
            let Some(offset) = self.bat.get_block_offset(index) else {
                continue;
            };
            if offset < body_start || offset + block_span > body_end {
                problems.push(format!(
                    "block {} at sector {} lies outside the data region",
                    index,
                    offset / SECTOR_SIZE
                ));
            }
        }

        problems
    }

    /// Serializable summary for reports
    pub fn summary(&self) -> InspectionSummary {
        let footer = &self.footer;
        InspectionSummary {
            file_len: self.file_len,
            disk_type: footer.disk_type.name(),
            current_size: footer.current_size,
            original_size: footer.original_size,
            geometry: footer.geometry,
            timestamp: footer.timestamp,
            timestamp_utc: from_vhd_timestamp(footer.timestamp).to_rfc3339(),
            creator_app: String::from_utf8_lossy(&footer.creator_app)
                .trim_end_matches('\0')
                .to_string(),
            creator_version: footer.creator_version,
            unique_id: Uuid::from_bytes(footer.uuid).to_string(),
            block_size: self.dynamic_header.block_size,
            bat_entries: self.bat.len(),
            allocated_blocks: self.bat.allocated_count(),
            footer_checksum_valid: footer.verify_checksum(),
            header_checksum_valid: self.dynamic_header.verify_checksum(),
            problems: self.check(),
        }
    }

    fn bat_region_len(&self) -> u64 {
        rawvhd_core::sector_align(self.dynamic_header.max_table_entries as u64 * 4)
    }

    fn bitmap_region_len(&self) -> u64 {
        let sectors = self.dynamic_header.block_size as u64 / SECTOR_SIZE;
        rawvhd_core::sector_align(rawvhd_core::div_round_up(sectors, 8))
    }
}

/// Flattened view of a [`VhdInspection`]
#[derive(Debug, Clone, Serialize)]
pub struct InspectionSummary {
    pub file_len: u64,
    pub disk_type: &'static str,
    pub current_size: u64,
    pub original_size: u64,
    pub geometry: DiskGeometry,
    pub timestamp: u32,
    pub timestamp_utc: String,
    pub creator_app: String,
    pub creator_version: u32,
    pub unique_id: String,
    pub block_size: u32,
    pub bat_entries: usize,
    pub allocated_blocks: usize,
    pub footer_checksum_valid: bool,
    pub header_checksum_valid: bool,
    pub problems: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhd::types::{full_sector_bitmap, DEFAULT_CREATOR_APP};
    use std::io::{Cursor, Write};

    /// Hand-assemble a VHD with one allocated block out of two
    fn build_image() -> Vec<u8> {
        let size = 4 * 1024 * 1024;
        let layout = VhdLayout::for_size(size).unwrap();
        let footer = VhdFooter::dynamic(size, layout.geometry, 0, DEFAULT_CREATOR_APP, [7; 16]);
        let header = VhdDynamicHeader::new(layout.bat_entries);
        let mut bat = BlockAllocationTable::default();
        bat.push_unallocated();
        bat.push_allocated(layout.first_block_sector as u32);

        let mut out = Cursor::new(Vec::new());
        out.write_all(&footer.to_bytes()).unwrap();
        out.write_all(&header.to_bytes()).unwrap();
        out.write_all(&bat.to_bytes()).unwrap();
        out.write_all(&full_sector_bitmap()).unwrap();
        out.write_all(&vec![0xAB; VHD_BLOCK_SIZE as usize]).unwrap();
        out.write_all(&footer.to_bytes()).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_inspect_consistent_image() {
        let image = build_image();
        let inspection = VhdInspection::read(&mut Cursor::new(image)).unwrap();

        assert_eq!(inspection.bat.len(), 2);
        assert_eq!(inspection.bat.allocated_count(), 1);
        assert!(inspection.check().is_empty(), "{:?}", inspection.check());

        let summary = inspection.summary();
        assert_eq!(summary.disk_type, "dynamic");
        assert_eq!(summary.creator_app, "tap");
        assert_eq!(summary.timestamp_utc, "2000-01-01T00:00:00+00:00");
        assert_eq!(summary.unique_id, "07070707-0707-0707-0707-070707070707");
    }

    #[test]
    fn test_inspect_reports_bad_checksum() {
        let mut image = build_image();
        // Flip a byte of the dynamic header's reserved tail
        image[512 + 1000] = 1;
        let inspection = VhdInspection::read(&mut Cursor::new(image)).unwrap();
        let problems = inspection.check();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("dynamic header checksum"));
    }

    #[test]
    fn test_inspect_reports_copy_mismatch() {
        let mut image = build_image();
        image[100] = 0xEE;
        let inspection = VhdInspection::read(&mut Cursor::new(image)).unwrap();
        assert!(inspection
            .check()
            .iter()
            .any(|p| p.contains("leading footer copy differs")));
    }

    #[test]
    fn test_inspect_reports_block_out_of_range() {
        let mut image = build_image();
        // Point block 0 into the headers
        image[1536..1540].copy_from_slice(&1u32.to_be_bytes());
        let inspection = VhdInspection::read(&mut Cursor::new(image)).unwrap();
        assert!(inspection
            .check()
            .iter()
            .any(|p| p.starts_with("block 0 at sector 1")));
    }

    #[test]
    fn test_inspect_reports_block_past_end() {
        let mut image = build_image();
        image[1540..1544].copy_from_slice(&0x0010_0000u32.to_be_bytes());
        let inspection = VhdInspection::read(&mut Cursor::new(image)).unwrap();
        let problems = inspection.check();
        assert_eq!(problems.len(), 1, "{:?}", problems);
        assert!(problems[0].starts_with("block 1 at sector 1048576"));
    }

    #[test]
    fn test_inspect_rejects_non_vhd() {
        let data = vec![0u8; 8192];
        assert!(VhdInspection::read(&mut Cursor::new(data)).is_err());

        let tiny = vec![0u8; 16];
        assert!(VhdInspection::read(&mut Cursor::new(tiny)).is_err());
    }
}
