//! Common error types for mdx

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for mdx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store and configuration errors shared by the batch and serving processes
#[derive(Error, Debug)]
pub enum Error {
    /// Requested track, stem or artifact does not exist in any known representation
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stem name outside the fixed stem set
    #[error("Invalid stem: {0}")]
    InvalidStem(String),

    /// Identifier cannot be used as a single path segment
    #[error("Invalid track id: {0:?}")]
    InvalidTrackId(String),

    /// Stored JSON exists but failed to parse or validate
    #[error("Decode failure for {path}: {reason}")]
    DecodeFailure { path: PathBuf, reason: String },

    /// Media file became unreadable while it was being streamed
    #[error("Streaming I/O error for {path}: {reason}")]
    StreamingIo { path: PathBuf, reason: String },

    /// Atomic publish of an artifact failed
    #[error("Storage write failure for {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Requested byte range lies outside the media file
    #[error("Range not satisfiable for a {size}-byte file")]
    RangeNotSatisfiable { size: u64 },

    /// Result rejected by schema validation before it was written
    #[error("Invalid analysis result: {0}")]
    InvalidResult(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors a client should see as "does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidStem(_) | Error::InvalidTrackId(_)
        )
    }

    pub(crate) fn storage_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::StorageWrite {
            path: path.into(),
            source,
        }
    }
}
