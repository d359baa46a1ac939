//! raw2vhd - convert a raw disk image into a dynamic VHD
//!
//! Blocks of the input that are entirely zero are left out of the output,
//! so the VHD is usually much smaller than the raw image.

use clap::{Parser, ValueEnum};
use rawvhd_acquire::{
    ConversionResult, ConvertProgress, ErrorClass, HashAlgorithm, VhdConverter, VhdOptions,
    VhdTimestamp,
};
use rawvhd_core::format_size;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Exit status for internal consistency failures (EX_SOFTWARE)
const EXIT_INVARIANT: i32 = 70;

#[derive(Parser)]
#[command(name = "raw2vhd")]
#[command(about = "Convert a raw disk image into a dynamic VHD", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Raw image to read
    raw_input_file: PathBuf,

    /// VHD file to create (overwritten if it exists)
    vhd_output_file: PathBuf,

    /// Footer timestamp
    #[arg(long, value_enum, default_value_t = TimestampArg::Zero)]
    timestamp: TimestampArg,

    /// Hash the raw input (md5, sha1, sha256); may be repeated
    #[arg(long = "hash", value_name = "ALGORITHM")]
    hashes: Vec<HashAlgorithm>,

    /// Print progress on stderr
    #[arg(long)]
    progress: bool,

    /// Print the conversion report as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TimestampArg {
    /// Store zero
    Zero,
    /// Store the current time
    Now,
}

impl From<TimestampArg> for VhdTimestamp {
    fn from(arg: TimestampArg) -> Self {
        match arg {
            TimestampArg::Zero => VhdTimestamp::Zero,
            TimestampArg::Now => VhdTimestamp::Now,
        }
    }
}

impl Cli {
    fn options(&self) -> VhdOptions {
        VhdOptions {
            timestamp: self.timestamp.into(),
            hash_algorithms: self.hashes.clone(),
            ..VhdOptions::default()
        }
    }
}

fn exit_code(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::Invariant => EXIT_INVARIANT,
        ErrorClass::Input | ErrorClass::Output | ErrorClass::Cancelled => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = cli.options();
    tracing::debug!(
        "Converting {} -> {} with {:?}",
        cli.raw_input_file.display(),
        cli.vhd_output_file.display(),
        options
    );

    let mut converter = VhdConverter::new(options);
    if cli.progress {
        converter = converter.with_progress(Arc::new(|p: &ConvertProgress| {
            eprintln!("{}", p.format());
        }));
    }

    let result = match converter.convert_file(&cli.raw_input_file, &cli.vhd_output_file) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(exit_code(e.class()));
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    } else {
        print_report(&cli, &result);
    }
}

fn print_report(cli: &Cli, result: &ConversionResult) {
    println!("=== Conversion Complete ===");
    println!("Input:      {}", cli.raw_input_file.display());
    println!("Output:     {}", cli.vhd_output_file.display());
    println!(
        "Disk size:  {} bytes ({})",
        result.input_size,
        format_size(result.input_size)
    );
    println!(
        "VHD size:   {} bytes ({}, {:.1}% of input)",
        result.output_size,
        format_size(result.output_size),
        result.allocation_ratio() * 100.0
    );
    println!(
        "Blocks:     {} total, {} allocated, {} sparse",
        result.total_blocks, result.allocated_blocks, result.sparse_blocks
    );
    println!("Geometry:   {} (C/H/S)", result.geometry);
    println!("Unique ID:  {}", result.unique_id);
    for hash in &result.hashes {
        println!("{:<11} {}", format!("{}:", hash.algorithm.name()), hash.hex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["raw2vhd", "disk.raw", "disk.vhd"]).unwrap();
        assert_eq!(cli.timestamp, TimestampArg::Zero);
        assert!(cli.hashes.is_empty());
        assert_eq!(cli.log_level, "warn");

        let options = cli.options();
        assert_eq!(options.timestamp, VhdTimestamp::Zero);
        assert!(options.unique_id.is_none());
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "raw2vhd",
            "disk.raw",
            "disk.vhd",
            "--timestamp",
            "now",
            "--hash",
            "md5",
            "--hash",
            "sha256",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.timestamp, TimestampArg::Now);
        assert_eq!(cli.hashes, vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]);
        assert!(cli.json);
    }

    #[test]
    fn test_positional_count_enforced() {
        assert!(Cli::try_parse_from(["raw2vhd", "disk.raw"]).is_err());
        assert!(Cli::try_parse_from(["raw2vhd", "a", "b", "c"]).is_err());
        assert!(Cli::try_parse_from(["raw2vhd", "a", "b", "--hash", "crc32"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(ErrorClass::Input), 1);
        assert_eq!(exit_code(ErrorClass::Output), 1);
        assert_eq!(exit_code(ErrorClass::Cancelled), 1);
        assert_eq!(exit_code(ErrorClass::Invariant), 70);
    }
}
