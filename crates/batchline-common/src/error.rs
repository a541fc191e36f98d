//! Stable error codes.
//!
//! Codes are grouped by category in the high byte and are stable across
//! versions, so a consumer can branch on them without parsing messages.

use std::fmt;

/// Error codes for categorizing bridge failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation timed out.
    Timeout = 0x0004,

    // Engine errors (0x0100 - 0x01FF)
    /// No engine connection is available.
    EngineUnavailable = 0x0100,
    /// The engine failed to execute a statement.
    ExecutionFailed = 0x0101,

    // Session errors (0x0200 - 0x02FF)
    /// The query id is not registered.
    UnknownQuery = 0x0200,
    /// The query id is already registered.
    DuplicateQuery = 0x0201,
    /// The cursor has already signalled exhaustion.
    CursorExhausted = 0x0202,

    // Encoding errors (0x0300 - 0x03FF)
    /// A column type has no fixed width.
    UnsupportedColumn = 0x0300,
    /// A value cannot be represented in its column's width.
    ValueOutOfRange = 0x0301,
    /// The host allocator refused a buffer.
    AllocationFailed = 0x0302,
    /// A chunk failed layout validation.
    MalformedChunk = 0x0303,

    // Protocol errors (0x0400 - 0x04FF)
    /// An inbound message could not be classified.
    MalformedMessage = 0x0400,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Engine",
            0x02 => "Session",
            0x03 => "Encoding",
            0x04 => "Protocol",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
