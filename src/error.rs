//! Error types for tileblob

use thiserror::Error;

/// Result type alias for tileblob operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tileblob operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store is read-only")]
    ReadOnly,

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("offset {offset} out of range (committed size {size})")]
    OutOfRange { offset: u64, size: u64 },
}
