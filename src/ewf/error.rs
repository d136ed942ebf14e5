//! Error types for the EWF chunk access core

use std::fmt;
use std::io;

/// Result type alias for EWF operations
pub type EwfResult<T> = Result<T, EwfError>;

/// Errors raised by the segment table, chunk table and their collaborators.
///
/// Every variant carries the operation that raised it, so a message reads
/// `chunk_table::get_chunk_data_by_offset: ...` without needing a backtrace.
#[derive(Debug)]
pub enum EwfError {
    /// Missing or malformed argument (caller bug, never retried)
    InvalidArgument { operation: &'static str, message: String },
    /// Index beyond the current capacity or count
    OutOfRange { operation: &'static str, message: String },
    /// Chunk index beyond the total number of chunks in the media
    OutOfBounds { operation: &'static str, chunk_index: u64, number_of_chunks: u64 },
    /// Attempt to re-assign a segment slot that is already populated
    DuplicateSegment { operation: &'static str, segment_number: u32, existing: String },
    /// Memory could not be obtained
    Allocation { operation: &'static str, message: String },
    /// Underlying read failure
    Io { operation: &'static str, source: io::Error },
    /// Corrupt compressed stream
    Decompression { operation: &'static str, chunk_index: u64, message: String },
    /// Offset not covered by any segment or chunk group
    NotFound { operation: &'static str, offset: u64 },
    /// Stored and calculated checksum differ
    ChecksumMismatch { operation: &'static str, stored: u32, calculated: u32 },
    /// Malformed on-disk structure
    InvalidFormat { operation: &'static str, message: String },
    /// Format variant this crate does not decode
    Unsupported { operation: &'static str, message: String },
}

impl EwfError {
    pub(crate) fn invalid_argument(operation: &'static str, message: impl Into<String>) -> Self {
        EwfError::InvalidArgument { operation, message: message.into() }
    }

    pub(crate) fn out_of_range(operation: &'static str, message: impl Into<String>) -> Self {
        EwfError::OutOfRange { operation, message: message.into() }
    }

    pub(crate) fn allocation(operation: &'static str, message: impl Into<String>) -> Self {
        EwfError::Allocation { operation, message: message.into() }
    }

    pub(crate) fn invalid_format(operation: &'static str, message: impl Into<String>) -> Self {
        EwfError::InvalidFormat { operation, message: message.into() }
    }

    pub(crate) fn io(operation: &'static str, source: io::Error) -> Self {
        EwfError::Io { operation, source }
    }

    /// The operation tag attached to this error
    pub fn operation(&self) -> &'static str {
        match self {
            EwfError::InvalidArgument { operation, .. }
            | EwfError::OutOfRange { operation, .. }
            | EwfError::OutOfBounds { operation, .. }
            | EwfError::DuplicateSegment { operation, .. }
            | EwfError::Allocation { operation, .. }
            | EwfError::Io { operation, .. }
            | EwfError::Decompression { operation, .. }
            | EwfError::NotFound { operation, .. }
            | EwfError::ChecksumMismatch { operation, .. }
            | EwfError::InvalidFormat { operation, .. }
            | EwfError::Unsupported { operation, .. } => operation,
        }
    }

    /// True when the error only signals that reading went past the last chunk.
    ///
    /// Callers iterating chunks use this to stop without treating the
    /// condition as a failure.
    pub fn is_end_of_chunks(&self) -> bool {
        matches!(self, EwfError::OutOfBounds { .. })
    }
}

impl fmt::Display for EwfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EwfError::InvalidArgument { operation, message } => {
                write!(f, "{}: invalid argument: {}", operation, message)
            }
            EwfError::OutOfRange { operation, message } => {
                write!(f, "{}: out of range: {}", operation, message)
            }
            EwfError::OutOfBounds { operation, chunk_index, number_of_chunks } => write!(
                f,
                "{}: chunk {} out of bounds (media has {} chunks)",
                operation, chunk_index, number_of_chunks
            ),
            EwfError::DuplicateSegment { operation, segment_number, existing } => write!(
                f,
                "{}: segment {} already set to '{}'",
                operation, segment_number, existing
            ),
            EwfError::Allocation { operation, message } => {
                write!(f, "{}: unable to allocate: {}", operation, message)
            }
            EwfError::Io { operation, source } => write!(f, "{}: I/O error: {}", operation, source),
            EwfError::Decompression { operation, chunk_index, message } => write!(
                f,
                "{}: unable to decompress chunk {}: {}",
                operation, chunk_index, message
            ),
            EwfError::NotFound { operation, offset } => {
                write!(f, "{}: no data at offset {:#x}", operation, offset)
            }
            EwfError::ChecksumMismatch { operation, stored, calculated } => write!(
                f,
                "{}: checksum mismatch (stored {:#010x}, calculated {:#010x})",
                operation, stored, calculated
            ),
            EwfError::InvalidFormat { operation, message } => {
                write!(f, "{}: invalid format: {}", operation, message)
            }
            EwfError::Unsupported { operation, message } => {
                write!(f, "{}: unsupported: {}", operation, message)
            }
        }
    }
}

impl std::error::Error for EwfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EwfError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for EwfError {
    fn from(err: io::Error) -> Self {
        EwfError::Io { operation: "io", source: err }
    }
}

impl From<serde_json::Error> for EwfError {
    fn from(err: serde_json::Error) -> Self {
        EwfError::InvalidArgument { operation: "config", message: err.to_string() }
    }
}
