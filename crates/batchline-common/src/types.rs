//! Core identifier types for Batchline.
//!
//! These types provide type-safe wrappers around the two values that cross
//! the bridge: the consumer-chosen query id and the host chunk address.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::TERMINAL_CHUNK_ADDRESS;

/// Query identifier - correlates a submission with its pagination requests.
///
/// Query ids are chosen by the consumer and treated as opaque strings.
///
/// # Example
///
/// ```rust
/// use batchline_common::types::QueryId;
///
/// let id = QueryId::from("orders_by_day");
/// assert_eq!(id.to_string(), "orders_by_day");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    /// Creates a new `QueryId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryId({})", self.0)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for QueryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Address of an encoded chunk in host memory.
///
/// Address zero is reserved as the terminal sentinel: it is never returned
/// by an allocator and signals end-of-stream to the consumer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ChunkAddress(u64);

impl ChunkAddress {
    /// The end-of-stream sentinel.
    pub const TERMINAL: Self = Self(TERMINAL_CHUNK_ADDRESS);

    /// Creates an address from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Creates an address from a pointer.
    #[inline]
    #[must_use]
    pub fn from_ptr(ptr: *const u8) -> Self {
        Self(ptr as usize as u64)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the terminal sentinel.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.0 == TERMINAL_CHUNK_ADDRESS
    }
}

impl fmt::Debug for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_terminal() {
            write!(f, "ChunkAddress(TERMINAL)")
        } else {
            write!(f, "ChunkAddress({:#x})", self.0)
        }
    }
}

impl fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_serde_is_transparent() {
        let id = QueryId::new("Q1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"Q1\"");
        let back: QueryId = serde_json::from_str("\"Q1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_chunk_address_terminal() {
        assert!(ChunkAddress::TERMINAL.is_terminal());
        assert!(!ChunkAddress::new(0x1000).is_terminal());
        assert_eq!(format!("{:?}", ChunkAddress::TERMINAL), "ChunkAddress(TERMINAL)");
        assert_eq!(ChunkAddress::new(0x1000).to_string(), "0x1000");
    }

    #[test]
    fn test_chunk_address_serializes_as_number() {
        let json = serde_json::to_string(&ChunkAddress::new(4096)).unwrap();
        assert_eq!(json, "4096");
    }
}
