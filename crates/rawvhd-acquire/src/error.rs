//! Error types for raw-to-VHD conversion

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Errors that can occur while converting a raw image
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Input file could not be opened or read
    #[error("Input error: {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Read from the input stream failed
    #[error("Input error: read failed: {0}")]
    Read(#[source] io::Error),

    /// Input is not convertible (empty, too large, changed while reading)
    #[error("Input error: {0}")]
    InvalidInput(String),

    /// Output file could not be created or written
    #[error("Output error: {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Write or seek on the output stream failed
    #[error("Output error: write failed: {0}")]
    Write(#[source] io::Error),

    /// Internal consistency check failed; a bug in layout or packing
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Conversion was cancelled
    #[error("Conversion cancelled")]
    Cancelled,
}

/// Failure class of a [`ConvertError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    Output,
    Invariant,
    Cancelled,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Input => "input",
            ErrorClass::Output => "output",
            ErrorClass::Invariant => "invariant",
            ErrorClass::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl ConvertError {
    /// Create an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        ConvertError::Invariant(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        ConvertError::InvalidInput(msg.into())
    }

    /// Which failure class this error belongs to
    pub fn class(&self) -> ErrorClass {
        match self {
            ConvertError::Input { .. } | ConvertError::Read(_) | ConvertError::InvalidInput(_) => {
                ErrorClass::Input
            }
            ConvertError::Output { .. } | ConvertError::Write(_) => ErrorClass::Output,
            ConvertError::Invariant(_) => ErrorClass::Invariant,
            ConvertError::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Attach file paths to stream-level I/O errors
    pub fn at_paths(self, input: &Path, output: &Path) -> Self {
        match self {
            ConvertError::Read(source) => ConvertError::Input {
                path: input.to_path_buf(),
                source,
            },
            ConvertError::Write(source) => ConvertError::Output {
                path: output.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

impl From<rawvhd_core::Error> for ConvertError {
    fn from(err: rawvhd_core::Error) -> Self {
        match err {
            rawvhd_core::Error::Io(e) => ConvertError::Write(e),
            rawvhd_core::Error::InvalidVault(msg) | rawvhd_core::Error::Unsupported(msg) => {
                ConvertError::InvalidInput(msg)
            }
            rawvhd_core::Error::Invariant(msg) => ConvertError::Invariant(msg),
        }
    }
}
