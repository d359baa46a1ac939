//! Raw-to-VHD conversion
//!
//! Produces a dynamic VHD whose virtual size is exactly the length of the
//! raw input. The input is scanned in 2 MiB blocks; blocks that are entirely
//! zero are left unallocated, every other block is stored in full behind an
//! all-ones sector bitmap.
//!
//! The body is written first, starting right after the space reserved for
//! the headers and BAT. Once the scan has produced the BAT, the trailing
//! footer goes at the write cursor and the front of the file is filled in.

use crate::error::{ConvertError, Result};
use crate::hash::{HashAlgorithm, HashResult, Hasher};
use crate::progress::{ConvertProgress, ProgressCallback};
use chrono::{DateTime, Utc};
use rawvhd_core::{is_sector_aligned, stream_len, SECTOR_SIZE};
use rawvhd_vaults::vhd::{
    full_sector_bitmap, to_vhd_timestamp, BlockAllocationTable, DiskGeometry, VhdDynamicHeader,
    VhdFooter, VhdLayout, BLOCK_PAD_SECTORS, DEFAULT_CREATOR_APP, VHD_BLOCK_SIZE,
};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Timestamp to store in the footer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VhdTimestamp {
    /// Zero, i.e. the VHD epoch itself; matches images made by earlier tooling
    #[default]
    Zero,
    /// Current time since 2000-01-01 UTC
    Now,
    /// A fixed instant
    At(DateTime<Utc>),
}

impl VhdTimestamp {
    /// The u32 value written to the footer
    pub fn resolve(&self) -> u32 {
        match self {
            VhdTimestamp::Zero => 0,
            VhdTimestamp::Now => to_vhd_timestamp(Utc::now()),
            VhdTimestamp::At(at) => to_vhd_timestamp(*at),
        }
    }
}

/// Options for VHD creation
#[derive(Debug, Clone)]
pub struct VhdOptions {
    /// Footer timestamp policy
    pub timestamp: VhdTimestamp,
    /// Unique id to store; a random v4 UUID when unset
    pub unique_id: Option<Uuid>,
    /// Creator application identifier (4 bytes)
    pub creator_app: [u8; 4],
    /// Hash algorithms to run over the source data
    pub hash_algorithms: Vec<HashAlgorithm>,
}

impl Default for VhdOptions {
    fn default() -> Self {
        Self {
            timestamp: VhdTimestamp::Zero,
            unique_id: None,
            creator_app: DEFAULT_CREATOR_APP,
            hash_algorithms: Vec::new(),
        }
    }
}

/// Result of a conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// Raw input length, also the virtual disk size
    pub input_size: u64,
    /// Length of the VHD file
    pub output_size: u64,
    /// Blocks in the image
    pub total_blocks: u32,
    /// Blocks stored in the output
    pub allocated_blocks: u32,
    /// Blocks left unallocated because they were all zero
    pub sparse_blocks: u32,
    /// CHS geometry written to the footer
    pub geometry: DiskGeometry,
    /// Footer timestamp
    pub timestamp: u32,
    /// Unique id written to the footer
    pub unique_id: Uuid,
    /// Time taken
    pub elapsed: Duration,
    /// Hashes of the source data
    pub hashes: Vec<HashResult>,
    /// Final Block Allocation Table
    #[serde(skip)]
    pub bat: BlockAllocationTable,
}

impl ConversionResult {
    /// Output size relative to the input size
    pub fn allocation_ratio(&self) -> f64 {
        if self.input_size == 0 {
            return 1.0;
        }
        self.output_size as f64 / self.input_size as f64
    }
}

/// Phases of a conversion, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConvertState {
    Scanning,
    HeaderWrite,
    Done,
}

impl ConvertState {
    fn advance(self) -> Self {
        let next = match self {
            ConvertState::Scanning => ConvertState::HeaderWrite,
            ConvertState::HeaderWrite | ConvertState::Done => ConvertState::Done,
        };
        tracing::debug!("Conversion state {:?} -> {:?}", self, next);
        next
    }
}

/// What the block scan leaves behind
struct ScanOutcome {
    bat: BlockAllocationTable,
    cursor: u64,
    allocated: u32,
    hashes: Vec<HashResult>,
}

/// Raw image to dynamic VHD converter
pub struct VhdConverter {
    options: VhdOptions,
    cancel_flag: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl VhdConverter {
    /// Create a new converter with options
    pub fn new(options: VhdOptions) -> Self {
        Self {
            options,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Report progress after every block
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Get a cancel flag that can be used to abort conversion
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Convert the raw file at `input` into a VHD at `output`
    ///
    /// The input is opened and measured before the output is touched. If
    /// anything fails after the output has been created, the partial file
    /// is removed.
    pub fn convert_file(&self, input: &Path, output: &Path) -> Result<ConversionResult> {
        let mut source = File::open(input).map_err(|source| ConvertError::Input {
            path: input.to_path_buf(),
            source,
        })?;

        let input_size = stream_len(&mut source).map_err(|source| ConvertError::Input {
            path: input.to_path_buf(),
            source,
        })?;
        if input_size == 0 {
            return Err(ConvertError::invalid_input(format!(
                "{} is empty",
                input.display()
            )));
        }

        if same_file(input, output) {
            return Err(ConvertError::invalid_input(format!(
                "input and output are the same file: {}",
                input.display()
            )));
        }

        let mut dest = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)
            .map_err(|source| ConvertError::Output {
                path: output.to_path_buf(),
                source,
            })?;

        let outcome = self
            .convert(&mut source, &mut dest)
            .and_then(|result| {
                dest.sync_all().map_err(ConvertError::Write)?;
                Ok(result)
            })
            .map_err(|e| e.at_paths(input, output));

        if outcome.is_err() {
            drop(dest);
            match fs::remove_file(output) {
                Ok(()) => tracing::warn!("Removed partial output {}", output.display()),
                Err(e) => tracing::warn!(
                    "Could not remove partial output {}: {}",
                    output.display(),
                    e
                ),
            }
        }

        outcome
    }

    /// Convert a raw image stream into a VHD stream
    ///
    /// `dest` should be empty; regions the layout leaves unwritten (the gap
    /// after each block) keep whatever it already holds.
    pub fn convert<R, W>(&self, source: &mut R, dest: &mut W) -> Result<ConversionResult>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + ?Sized,
    {
        let start_time = Instant::now();

        let input_size = stream_len(source).map_err(ConvertError::Read)?;
        if input_size == 0 {
            return Err(ConvertError::invalid_input("input image is empty"));
        }

        let layout = VhdLayout::for_size(input_size)?;
        if !layout.fits_bat() {
            return Err(ConvertError::invalid_input(format!(
                "{} bytes is too large for a dynamic VHD",
                input_size
            )));
        }

        tracing::info!(
            "Converting {} bytes: {} blocks, BAT {} sectors, data from sector {}, geometry {}",
            input_size,
            layout.bat_entries,
            layout.bat_sectors,
            layout.first_block_sector,
            layout.geometry
        );

        let mut state = ConvertState::Scanning;
        dest.seek(SeekFrom::Start(layout.first_block_offset()))
            .map_err(ConvertError::Write)?;
        let scan = self.scan_blocks(source, dest, &layout, start_time)?;

        state = state.advance();
        let unique_id = self.options.unique_id.unwrap_or_else(Uuid::new_v4);
        let timestamp = self.options.timestamp.resolve();
        let footer = VhdFooter::dynamic(
            input_size,
            layout.geometry,
            timestamp,
            self.options.creator_app,
            *unique_id.as_bytes(),
        );
        let dynamic_header = VhdDynamicHeader::new(layout.bat_entries);
        let output_size =
            self.write_metadata(dest, scan.cursor, &footer, &dynamic_header, &scan.bat)?;

        let expected = layout.output_size(scan.allocated);
        if output_size != expected {
            return Err(ConvertError::invariant(format!(
                "output is {} bytes, layout expects {}",
                output_size, expected
            )));
        }
        state = state.advance();
        debug_assert_eq!(state, ConvertState::Done);

        let elapsed = start_time.elapsed();
        tracing::info!(
            "Wrote {} byte VHD: {} of {} blocks allocated in {:.2?}",
            output_size,
            scan.allocated,
            layout.bat_entries,
            elapsed
        );

        Ok(ConversionResult {
            input_size,
            output_size,
            total_blocks: layout.bat_entries,
            allocated_blocks: scan.allocated,
            sparse_blocks: layout.bat_entries - scan.allocated,
            geometry: layout.geometry,
            timestamp,
            unique_id,
            elapsed,
            hashes: scan.hashes,
            bat: scan.bat,
        })
    }

    /// Write allocated blocks starting at the current output position
    fn scan_blocks<R, W>(
        &self,
        source: &mut R,
        dest: &mut W,
        layout: &VhdLayout,
        start_time: Instant,
    ) -> Result<ScanOutcome>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + ?Sized,
    {
        let block_size = VHD_BLOCK_SIZE as u64;
        let bitmap = full_sector_bitmap();
        let mut hasher = Hasher::new(&self.options.hash_algorithms);
        let mut bat = BlockAllocationTable::with_capacity(layout.bat_entries as usize);
        let mut buffer = vec![0u8; VHD_BLOCK_SIZE as usize];
        let mut bytes_read_total = 0u64;
        let mut allocated = 0u32;

        source.seek(SeekFrom::Start(0)).map_err(ConvertError::Read)?;

        for block_idx in 0..layout.bat_entries {
            if self.cancel_flag.load(Ordering::Relaxed) {
                return Err(ConvertError::Cancelled);
            }

            let remaining = layout.disk_size - block_idx as u64 * block_size;
            let expected = block_size.min(remaining) as usize;
            let got = read_block(source, &mut buffer[..expected]).map_err(ConvertError::Read)?;
            if got < expected {
                return Err(ConvertError::invalid_input(format!(
                    "input ended at byte {} in block {}; it was {} bytes at the start",
                    bytes_read_total + got as u64,
                    block_idx,
                    layout.disk_size
                )));
            }
            // Zero the tail so a short final block compares and stores as padded
            buffer[expected..].fill(0);
            if !hasher.is_noop() {
                hasher.update(&buffer[..expected]);
            }
            bytes_read_total += expected as u64;

            if buffer.iter().all(|&b| b == 0) {
                bat.push_unallocated();
            } else {
                let offset = dest.stream_position().map_err(ConvertError::Write)?;
                if !is_sector_aligned(offset) {
                    return Err(ConvertError::invariant(format!(
                        "block {} would start at unaligned offset {}",
                        block_idx, offset
                    )));
                }
                let sector = u32::try_from(offset / SECTOR_SIZE).map_err(|_| {
                    ConvertError::invariant(format!(
                        "block {} sector {} does not fit a BAT entry",
                        block_idx,
                        offset / SECTOR_SIZE
                    ))
                })?;

                bat.push_allocated(sector);
                dest.write_all(&bitmap).map_err(ConvertError::Write)?;
                dest.write_all(&buffer).map_err(ConvertError::Write)?;
                dest.seek(SeekFrom::Current((BLOCK_PAD_SECTORS * SECTOR_SIZE) as i64))
                    .map_err(ConvertError::Write)?;
                allocated += 1;

                tracing::debug!("Block {} stored at sector {}", block_idx, sector);
            }

            if let Some(ref callback) = self.progress {
                let progress = ConvertProgress::calculate(
                    layout.disk_size,
                    bytes_read_total,
                    (block_idx + 1, layout.bat_entries, allocated),
                    start_time,
                );
                callback(&progress);
            }
        }

        let cursor = dest.stream_position().map_err(ConvertError::Write)?;

        Ok(ScanOutcome {
            bat,
            cursor,
            allocated,
            hashes: hasher.finalize(),
        })
    }

    /// Trailing footer at `cursor`, then header copy, dynamic header and BAT
    /// at the front. Returns the final file length.
    fn write_metadata<W: Write + Seek + ?Sized>(
        &self,
        dest: &mut W,
        cursor: u64,
        footer: &VhdFooter,
        dynamic_header: &VhdDynamicHeader,
        bat: &BlockAllocationTable,
    ) -> Result<u64> {
        let footer_bytes = footer.to_bytes();

        dest.seek(SeekFrom::Start(cursor)).map_err(ConvertError::Write)?;
        dest.write_all(&footer_bytes).map_err(ConvertError::Write)?;
        let output_size = cursor + footer_bytes.len() as u64;

        dest.seek(SeekFrom::Start(0)).map_err(ConvertError::Write)?;
        dest.write_all(&footer_bytes).map_err(ConvertError::Write)?;
        dest.write_all(&dynamic_header.to_bytes())
            .map_err(ConvertError::Write)?;
        dest.write_all(&bat.to_bytes()).map_err(ConvertError::Write)?;
        dest.flush().map_err(ConvertError::Write)?;

        Ok(output_size)
    }
}

/// True when both paths resolve to the same existing file
fn same_file(input: &Path, output: &Path) -> bool {
    match (fs::canonicalize(input), fs::canonicalize(output)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Fill `buf` from `source`, stopping early only at end of input
fn read_block<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::hash::hash_reader;
    use rawvhd_core::{ReadSeek, WriteSeek};
    use rawvhd_vaults::vhd::{VhdInspection, BAT_UNALLOCATED};
    use std::io::Cursor;
    use std::sync::atomic::AtomicU32;

    const BLOCK: usize = VHD_BLOCK_SIZE as usize;

    fn pinned_options() -> VhdOptions {
        VhdOptions {
            unique_id: Some(Uuid::from_bytes([0x11; 16])),
            ..VhdOptions::default()
        }
    }

    fn convert_bytes(data: &[u8], options: VhdOptions) -> (ConversionResult, Vec<u8>) {
        let mut source = Cursor::new(data);
        let mut dest = Cursor::new(Vec::new());
        let result = VhdConverter::new(options)
            .convert(&mut source, &mut dest)
            .unwrap();
        (result, dest.into_inner())
    }

    fn be_u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    /// Rebuild the raw image by walking the BAT
    fn flatten(vhd: &[u8]) -> Vec<u8> {
        let footer = VhdFooter::parse(&vhd[vhd.len() - 512..]).unwrap();
        let header = VhdDynamicHeader::parse(&vhd[512..1536]).unwrap();
        let size = footer.current_size as usize;
        let mut raw = vec![0u8; header.max_table_entries as usize * BLOCK];

        for idx in 0..header.max_table_entries as usize {
            let entry = be_u32_at(vhd, 1536 + idx * 4);
            if entry == BAT_UNALLOCATED {
                continue;
            }
            let data_start = entry as usize * 512 + 512;
            raw[idx * BLOCK..(idx + 1) * BLOCK]
                .copy_from_slice(&vhd[data_start..data_start + BLOCK]);
        }

        raw.truncate(size);
        raw
    }

    #[test]
    fn test_scenario_all_zero() {
        let data = vec![0u8; 4 * 1024 * 1024];
        let (result, vhd) = convert_bytes(&data, pinned_options());

        assert_eq!(result.bat.entries(), &[BAT_UNALLOCATED, BAT_UNALLOCATED]);
        assert_eq!(result.allocated_blocks, 0);
        assert_eq!(result.sparse_blocks, 2);
        // header + dynamic header + one BAT sector, then the footer
        assert_eq!(vhd.len(), 4 * 512 + 512);
        assert_eq!(result.output_size, vhd.len() as u64);
        assert_eq!(&vhd[0..512], &vhd[2048..2560]);
        assert_eq!(flatten(&vhd), data);
    }

    #[test]
    fn test_scenario_three_bytes() {
        let data = [0x01u8, 0x02, 0x03];
        let (result, vhd) = convert_bytes(&data, pinned_options());

        assert_eq!(result.input_size, 3);
        assert_eq!(result.total_blocks, 1);
        assert_eq!(result.bat.entries(), &[4]);
        assert_eq!(be_u32_at(&vhd, 1536), 4);

        // bitmap sector, then the 3 bytes zero-padded to a full block
        assert!(vhd[2048..2560].iter().all(|&b| b == 0xFF));
        assert_eq!(&vhd[2560..2563], &data);
        assert!(vhd[2563..2560 + BLOCK].iter().all(|&b| b == 0));

        // 7-sector gap before the footer
        let footer_offset = 2560 + BLOCK + 7 * 512;
        assert_eq!(vhd.len(), footer_offset + 512);
        assert_eq!(&vhd[footer_offset..footer_offset + 8], b"conectix");

        let footer = VhdFooter::parse(&vhd[footer_offset..]).unwrap();
        assert_eq!(footer.original_size, 3);
        assert_eq!(footer.current_size, 3);
        assert_eq!(flatten(&vhd), data);
    }

    #[test]
    fn test_scenario_hole_between_blocks() {
        let mut data = vec![0u8; 3 * BLOCK];
        data[10] = 0xAA;
        data[2 * BLOCK + BLOCK - 1] = 0xBB;
        let (result, vhd) = convert_bytes(&data, pinned_options());

        let entries = result.bat.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1], BAT_UNALLOCATED);
        assert!(entries[0] < entries[2]);
        assert_eq!(entries[0], 4);
        // Second stored block follows the first directly: nothing for the hole
        let stride = (512 + BLOCK + 7 * 512) as u32 / 512;
        assert_eq!(entries[2], entries[0] + stride);
        assert_eq!(vhd.len(), 2048 + 2 * (stride as usize * 512) + 512);
        assert_eq!(flatten(&vhd), data);
    }

    #[test]
    fn test_convert_through_trait_objects() {
        let data = vec![0x33u8; 1000];
        let mut raw = Cursor::new(data.clone());
        let mut out = Cursor::new(Vec::new());
        let source: &mut dyn ReadSeek = &mut raw;
        let dest: &mut dyn WriteSeek = &mut out;

        let result = VhdConverter::new(pinned_options())
            .convert(source, dest)
            .unwrap();
        assert_eq!(result.output_size, out.get_ref().len() as u64);
        assert_eq!(flatten(out.get_ref()), data);
    }

    #[test]
    fn test_round_trip_dense_unaligned() {
        let data: Vec<u8> = (0..(2 * BLOCK + 777)).map(|i| (i % 251) as u8 + 1).collect();
        let (result, vhd) = convert_bytes(&data, pinned_options());
        assert_eq!(result.allocated_blocks, 3);
        assert_eq!(flatten(&vhd), data);
    }

    #[test]
    fn test_trailing_zero_partial_block_is_sparse() {
        let mut data = vec![0u8; BLOCK + 100];
        data[0] = 1;
        let (result, vhd) = convert_bytes(&data, pinned_options());
        assert_eq!(result.bat.entries()[1], BAT_UNALLOCATED);
        assert_eq!(flatten(&vhd), data);
    }

    #[test]
    fn test_headers_valid() {
        let data = vec![0x42u8; 5000];
        let (result, vhd) = convert_bytes(&data, pinned_options());

        let inspection = VhdInspection::read(&mut Cursor::new(&vhd)).unwrap();
        assert!(inspection.check().is_empty(), "{:?}", inspection.check());
        assert_eq!(inspection.footer.uuid, [0x11; 16]);
        assert_eq!(inspection.footer.timestamp, 0);
        assert_eq!(inspection.footer.geometry, result.geometry);
        assert_eq!(inspection.dynamic_header.max_table_entries, 1);
        assert_eq!(inspection.bat.entries(), result.bat.entries());
    }

    #[test]
    fn test_records_valid_across_sizes() {
        for size in [1, 511, 512, 513, 4095, BLOCK - 1, BLOCK, BLOCK + 1] {
            let data: Vec<u8> = (0..size).map(|i| (i % 13) as u8 + 1).collect();
            let (result, vhd) = convert_bytes(&data, pinned_options());

            let inspection = VhdInspection::read(&mut Cursor::new(&vhd)).unwrap();
            assert!(inspection.footer.verify_checksum(), "size {}", size);
            assert!(inspection.dynamic_header.verify_checksum(), "size {}", size);
            assert!(inspection.check().is_empty(), "size {}: {:?}", size, inspection.check());
            assert_eq!(result.output_size, vhd.len() as u64);
            assert_eq!(flatten(&vhd), data);
        }
    }

    #[test]
    fn test_rerun_differs_only_in_unique_id() {
        let data = vec![7u8; 3000];
        let (_, a) = convert_bytes(&data, pinned_options());
        let (_, b) = convert_bytes(&data, pinned_options());
        assert_eq!(a, b);

        let (ra, a) = convert_bytes(&data, VhdOptions::default());
        let (rb, b) = convert_bytes(&data, VhdOptions::default());
        assert_ne!(ra.unique_id, rb.unique_id);
        assert_eq!(a.len(), b.len());

        // Footer copies may differ only in checksum (64..68) and unique id (68..84)
        let footer_at = a.len() - 512;
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            if x != y {
                let rel = if i < 512 {
                    Some(i)
                } else {
                    i.checked_sub(footer_at)
                };
                assert!(
                    rel.map_or(false, |r| (64..84).contains(&r)),
                    "unexpected difference at byte {}",
                    i
                );
            }
        }
    }

    #[test]
    fn test_timestamp_policies() {
        let at = DateTime::parse_from_rfc3339("2015-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let options = VhdOptions {
            timestamp: VhdTimestamp::At(at),
            ..pinned_options()
        };
        let (result, vhd) = convert_bytes(&[1u8; 10], options);
        assert_eq!(result.timestamp, to_vhd_timestamp(at));
        assert_eq!(be_u32_at(&vhd, 24), result.timestamp);

        assert!(VhdTimestamp::Now.resolve() > to_vhd_timestamp(at));
        assert_eq!(VhdTimestamp::Zero.resolve(), 0);
    }

    #[test]
    fn test_source_hashes() {
        let data: Vec<u8> = (0..BLOCK + 5).map(|i| (i % 7) as u8).collect();
        let options = VhdOptions {
            hash_algorithms: vec![HashAlgorithm::Md5, HashAlgorithm::Sha256],
            ..pinned_options()
        };
        let (result, _) = convert_bytes(&data, options);

        let expected = hash_reader(
            &mut Cursor::new(&data),
            &[HashAlgorithm::Md5, HashAlgorithm::Sha256],
        )
        .unwrap();
        assert_eq!(result.hashes.len(), 2);
        assert_eq!(result.hashes[0].hex, expected[0].hex);
        assert_eq!(result.hashes[1].hex, expected[1].hex);
    }

    #[test]
    fn test_progress_reported_per_block() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let converter = VhdConverter::new(pinned_options()).with_progress(Arc::new(
            move |p: &ConvertProgress| {
                seen.fetch_add(1, Ordering::SeqCst);
                assert!(p.blocks_done <= p.blocks_total);
            },
        ));

        let data = vec![1u8; 3 * BLOCK];
        converter
            .convert(&mut Cursor::new(&data), &mut Cursor::new(Vec::new()))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel() {
        let converter = VhdConverter::new(pinned_options());
        converter.cancel_flag().store(true, Ordering::Relaxed);

        let err = converter
            .convert(&mut Cursor::new(vec![1u8; 100]), &mut Cursor::new(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
        assert_eq!(err.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = VhdConverter::new(VhdOptions::default())
            .convert(&mut Cursor::new(Vec::<u8>::new()), &mut Cursor::new(Vec::new()))
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input);
    }

    #[test]
    fn test_allocation_ratio() {
        let (result, _) = convert_bytes(&vec![0u8; 4 * BLOCK], pinned_options());
        assert!(result.allocation_ratio() < 0.01);
    }

    #[test]
    fn test_result_serializes() {
        let (result, _) = convert_bytes(&[9u8; 16], pinned_options());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["input_size"], 16);
        assert_eq!(json["allocated_blocks"], 1);
        assert_eq!(json["unique_id"], "11111111-1111-1111-1111-111111111111");
        assert!(json.get("bat").is_none());
    }

    #[test]
    fn test_convert_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("disk.raw");
        let output = dir.path().join("disk.vhd");

        let mut data = vec![0u8; BLOCK * 2];
        data[BLOCK + 1] = 0x55;
        fs::write(&input, &data).unwrap();

        let result = VhdConverter::new(pinned_options())
            .convert_file(&input, &output)
            .unwrap();
        let vhd = fs::read(&output).unwrap();
        assert_eq!(result.output_size, vhd.len() as u64);
        assert_eq!(result.bat.entries()[0], BAT_UNALLOCATED);

        let inspection = VhdInspection::open(&output).unwrap();
        assert!(inspection.check().is_empty());
        assert_eq!(flatten(&vhd), data);
    }

    #[test]
    fn test_convert_file_empty_input_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.raw");
        let output = dir.path().join("empty.vhd");
        fs::write(&input, b"").unwrap();

        let err = VhdConverter::new(VhdOptions::default())
            .convert_file(&input, &output)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input);
        assert!(!output.exists());
    }

    #[test]
    fn test_convert_file_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.raw");
        let output = dir.path().join("out.vhd");

        let err = VhdConverter::new(VhdOptions::default())
            .convert_file(&input, &output)
            .unwrap_err();
        assert!(matches!(err, ConvertError::Input { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_convert_file_same_path_keeps_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("disk.raw");
        fs::write(&input, [0xAAu8; 4096]).unwrap();

        let err = VhdConverter::new(VhdOptions::default())
            .convert_file(&input, &input)
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidInput(_)));
        assert_eq!(fs::read(&input).unwrap(), vec![0xAAu8; 4096]);

        // A different spelling of the same path is caught too
        let aliased = dir.path().join(".").join("disk.raw");
        let err = VhdConverter::new(VhdOptions::default())
            .convert_file(&input, &aliased)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input);
        assert_eq!(fs::read(&input).unwrap().len(), 4096);
    }

    #[test]
    fn test_convert_file_unwritable_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("disk.raw");
        fs::write(&input, [1u8; 64]).unwrap();
        let output = dir.path().join("no-such-dir").join("disk.vhd");

        let err = VhdConverter::new(VhdOptions::default())
            .convert_file(&input, &output)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Output);
    }

    #[test]
    fn test_convert_file_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("disk.raw");
        let output = dir.path().join("disk.vhd");
        fs::write(&input, [1u8; 64]).unwrap();

        let converter = VhdConverter::new(VhdOptions::default());
        converter.cancel_flag().store(true, Ordering::Relaxed);

        let err = converter.convert_file(&input, &output).unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
        assert!(!output.exists());
    }

    /// Reader that pretends to be longer than the data it yields
    struct ShrinkingReader {
        inner: Cursor<Vec<u8>>,
        claimed_len: u64,
    }

    impl Read for ShrinkingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for ShrinkingReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            match pos {
                SeekFrom::End(0) => Ok(self.claimed_len),
                other => self.inner.seek(other),
            }
        }
    }

    #[test]
    fn test_input_shrinking_mid_scan() {
        let mut source = ShrinkingReader {
            inner: Cursor::new(vec![1u8; BLOCK]),
            claimed_len: 2 * BLOCK as u64,
        };
        let err = VhdConverter::new(pinned_options())
            .convert(&mut source, &mut Cursor::new(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidInput(_)));
    }
}
