//! Index error types
//!
//! Every failure the index layer can report. Structural and checksum problems
//! are always `Corrupt`; nothing is repaired or retried here.

use thiserror::Error;

/// Errors that can occur while building or reading an index
#[derive(Error, Debug)]
pub enum IndexError {
    /// Underlying file or mapping failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic mismatch, checksum mismatch, truncation or unsupported version
    #[error("Corrupt index: {0}")]
    Corrupt(String),

    /// Symbols or series added out of order, or a series referencing an unknown symbol
    #[error("Build order violation: {0}")]
    BuildOrder(String),

    /// Mutation attempted on a symbolizer loaded from a checkpoint or serialized stream
    #[error("symbolizer is read-only")]
    ReadOnly,

    /// Symbol, offset, series or label value absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query issued after the reader was closed
    #[error("Index reader is closed")]
    ReaderClosed,

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Caller supplied an unusable argument (bad regex, shard, oversized index)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl IndexError {
    /// Shorthand for building a corruption error
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        IndexError::Corrupt(msg.into())
    }

    /// True for any error that signals a damaged or foreign file
    pub fn is_corruption(&self) -> bool {
        matches!(self, IndexError::Corrupt(_))
    }

    /// True when the error is a routine miss rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound(_))
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
