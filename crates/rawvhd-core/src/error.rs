//! Format-level error types

use thiserror::Error;

/// Errors raised while building or reading VHD structures
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading or writing records
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid VHD structure or corrupted data
    #[error("Invalid vault format: {0}")]
    InvalidVault(String),

    /// Unsupported format or feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal consistency check failed; indicates a bug, not bad input
    #[error("Invariant violation: {0}")]
    Invariant(String),
}

/// Result type alias for rawvhd format operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid vault error
    pub fn invalid_vault(msg: impl Into<String>) -> Self {
        Error::InvalidVault(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }
}
