//! vhd-inspect - print and check the records of a dynamic VHD

use anyhow::{Context, Result};
use clap::Parser;
use rawvhd_core::format_size;
use rawvhd_vaults::vhd::{InspectionSummary, VhdInspection, BAT_UNALLOCATED};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "vhd-inspect")]
#[command(about = "Print and check the footer, dynamic header and BAT of a VHD", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// VHD file to inspect
    vhd_file: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// List every BAT entry
    #[arg(long)]
    bat: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let inspection = VhdInspection::open(&cli.vhd_file)
        .with_context(|| format!("Failed to read {}", cli.vhd_file.display()))?;
    let summary = inspection.summary();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&cli, &summary);
    }

    if cli.bat {
        print_bat(&inspection);
    }

    if !summary.problems.is_empty() {
        process::exit(1);
    }
    Ok(())
}

fn print_summary(cli: &Cli, summary: &InspectionSummary) {
    let valid = |ok: bool| if ok { "valid" } else { "INVALID" };

    println!("=== VHD Information ===");
    println!("Path:          {}", cli.vhd_file.display());
    println!(
        "File size:     {} bytes ({})",
        summary.file_len,
        format_size(summary.file_len)
    );
    println!("Type:          {}", summary.disk_type);
    println!(
        "Disk size:     {} bytes ({})",
        summary.current_size,
        format_size(summary.current_size)
    );
    println!("Original size: {} bytes", summary.original_size);
    println!("Geometry:      {} (C/H/S)", summary.geometry);
    println!(
        "Timestamp:     {} ({})",
        summary.timestamp, summary.timestamp_utc
    );
    println!(
        "Creator:       {:?} version 0x{:08X}",
        summary.creator_app, summary.creator_version
    );
    println!("Unique ID:     {}", summary.unique_id);
    println!("Footer:        checksum {}", valid(summary.footer_checksum_valid));
    println!();

    println!("=== Dynamic Header ===");
    println!("Block size:    {}", format_size(summary.block_size as u64));
    println!(
        "BAT entries:   {} ({} allocated)",
        summary.bat_entries, summary.allocated_blocks
    );
    println!("Header:        checksum {}", valid(summary.header_checksum_valid));

    if summary.problems.is_empty() {
        println!();
        println!("No problems found.");
    } else {
        println!();
        println!("=== Problems ===");
        for problem in &summary.problems {
            println!("  - {}", problem);
        }
    }
}

fn print_bat(inspection: &VhdInspection) {
    println!();
    println!("=== Block Allocation Table ===");
    println!("{:<8} {:<12} {:<14}", "Block", "Sector", "Offset");
    for (idx, &entry) in inspection.bat.entries().iter().enumerate() {
        if entry == BAT_UNALLOCATED {
            println!("{:<8} {:<12} {:<14}", idx, "-", "unallocated");
        } else {
            println!(
                "{:<8} {:<12} 0x{:<12X}",
                idx,
                entry,
                entry as u64 * rawvhd_core::SECTOR_SIZE
            );
        }
    }
}
