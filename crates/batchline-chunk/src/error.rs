//! Chunk encoding and decoding errors.

use thiserror::Error;

use batchline_common::error::ErrorCode;

use crate::types::TypeTag;

/// Errors raised while encoding or reading a chunk.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChunkError {
    /// A column's type has no supported fixed-width encoding.
    #[error("column '{column}' has unsupported type {tag}")]
    UnsupportedColumn {
        /// Column name.
        column: String,
        /// The column's type tag.
        tag: TypeTag,
    },

    /// A value does not fit its column's encoded width.
    #[error("value {value} in column '{column}' row {row} cannot be encoded in {width} bytes")]
    ValueOutOfRange {
        /// Column name.
        column: String,
        /// Row index.
        row: usize,
        /// The rejected value.
        value: String,
        /// Encoded width in bytes.
        width: usize,
    },

    /// The chunk would not be addressable with 32-bit offsets.
    #[error("chunk of {bytes} bytes exceeds the 32-bit offset range")]
    TooLarge {
        /// Required size in bytes.
        bytes: usize,
    },

    /// The host allocator could not provide a buffer.
    #[error("host allocator refused {size} bytes: {reason}")]
    Allocation {
        /// Requested size in bytes.
        size: usize,
        /// Reason given by the allocator.
        reason: String,
    },

    /// A chunk failed layout validation.
    #[error("malformed chunk: {0}")]
    Malformed(String),
}

impl ChunkError {
    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ChunkError::UnsupportedColumn { .. } => ErrorCode::UnsupportedColumn,
            ChunkError::ValueOutOfRange { .. } => ErrorCode::ValueOutOfRange,
            ChunkError::TooLarge { .. } | ChunkError::Allocation { .. } => {
                ErrorCode::AllocationFailed
            }
            ChunkError::Malformed(_) => ErrorCode::MalformedChunk,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ChunkError::Malformed(message.into())
    }
}

/// Result type for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;
