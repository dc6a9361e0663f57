//! Error types shared across the PDR workspace

use thiserror::Error;

/// Result type alias for common PDR operations
pub type Result<T> = std::result::Result<T, PdrError>;

/// Main error type for shared PDR utilities
#[derive(Error, Debug)]
pub enum PdrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported checksum type: {0}")]
    UnsupportedChecksum(String),

    #[error("Invalid dispatch status: {0}")]
    InvalidStatus(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
