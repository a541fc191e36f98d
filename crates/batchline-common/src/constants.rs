//! System-wide constants for Batchline.
//!
//! The chunk layout constants below are shared by the encoder (producer
//! side) and the reader (consumer side). Changing any of them changes the
//! wire layout.

// =============================================================================
// Chunk Layout
// =============================================================================

/// Size of one layout word in bytes.
///
/// Header fields, type tags, address table entries, and name characters are
/// all stored as native-endian `u32` words.
pub const WORD_SIZE: usize = 4;

/// Number of header words: `done`, `column_count`, `row_count`.
pub const HEADER_WORDS: usize = 3;

/// Number of words in each column sub-header: type tag, resolved width.
pub const SUBHEADER_WORDS: usize = 2;

/// Alignment of every column sub-block, in bytes.
///
/// 8-byte payloads are read through an `f64` view over the same memory, so
/// each sub-block (and therefore each payload) must start on this boundary.
pub const COLUMN_ALIGNMENT: usize = 8;

/// Alignment guaranteed for a chunk base address.
pub const CHUNK_ALIGNMENT: usize = 8;

/// Bytes reserved per row in a text column.
///
/// Each slot holds at most `TEXT_SLOT_BYTES - 1` bytes of UTF-8 followed by
/// a zero terminator, keeping a uniform row stride.
pub const TEXT_SLOT_BYTES: usize = 8;

/// Byte offset of the type-tag array.
pub const TYPE_TAGS_OFFSET: usize = HEADER_WORDS * WORD_SIZE;

// =============================================================================
// Null Sentinels
// =============================================================================

/// Null marker for 4-byte integer payloads.
pub const NULL_INT32: i32 = i32::MIN;

/// Null marker for 8-byte float payloads: a NaN with a fixed payload.
pub const NULL_F64_BITS: u64 = 0x7FF0_0000_0000_07A2;

/// Bit pattern every genuine NaN value is rewritten to before encoding.
pub const CANONICAL_NAN_BITS: u64 = 0x7FF8_0000_0000_0000;

/// First byte of a null text slot. Never a valid UTF-8 lead byte.
pub const NULL_TEXT_MARKER: u8 = 0xFF;

// =============================================================================
// Bridge Defaults
// =============================================================================

/// Raw value of the terminal chunk address.
pub const TERMINAL_CHUNK_ADDRESS: u64 = 0;

/// Default number of rows per engine batch.
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Default statement and pull timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 300;

/// Default capacity of the request and response channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Query id carried by the engine readiness acknowledgement.
pub const INSTANCE_QUERY_ID: &str = "ENGINE_READY";
