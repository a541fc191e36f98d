//! Chunk layout arithmetic and the positioned word writer.
//!
//! ```text
//! word 0            done
//! word 1            column_count (N)
//! word 2            row_count (R)
//! words 3..3+N      type tags
//! words 3+N..3+2N   column address table (byte offsets, back-patched)
//! ...               name table: one word per char, 0 terminated
//! per column        [pad to 8] tag | width | R * width payload bytes
//! ```

use batchline_common::constants::{COLUMN_ALIGNMENT, HEADER_WORDS, SUBHEADER_WORDS, WORD_SIZE};

use crate::error::{ChunkError, ChunkResult};

/// Number of name-table words for the given column names.
pub fn name_table_words<'a>(names: impl IntoIterator<Item = &'a str>) -> usize {
    names.into_iter().map(|name| name.chars().count() + 1).sum()
}

/// Byte offset of the column address table.
#[inline]
#[must_use]
pub const fn address_table_offset(column_count: usize) -> usize {
    (HEADER_WORDS + column_count) * WORD_SIZE
}

/// Byte offset of the name table.
#[inline]
#[must_use]
pub const fn name_table_offset(column_count: usize) -> usize {
    (HEADER_WORDS + 2 * column_count) * WORD_SIZE
}

/// Total buffer size for a chunk.
///
/// `widths` holds each column's payload width in bytes (0 for a column
/// whose payload is skipped). One padding word per column is reserved as
/// alignment slack.
pub fn required_bytes(name_words: usize, widths: &[usize], row_count: usize) -> ChunkResult<usize> {
    let fixed_words = HEADER_WORDS + 2 * widths.len() + name_words;
    let mut bytes = fixed_words * WORD_SIZE;
    for width in widths {
        let payload = row_count
            .checked_mul(*width)
            .ok_or(ChunkError::TooLarge { bytes: usize::MAX })?;
        bytes = bytes
            .checked_add((1 + SUBHEADER_WORDS) * WORD_SIZE + payload)
            .ok_or(ChunkError::TooLarge { bytes: usize::MAX })?;
    }
    if u32::try_from(bytes).is_err() {
        return Err(ChunkError::TooLarge { bytes });
    }
    Ok(bytes)
}

/// Sequential writer over a chunk buffer with back-patching support.
pub(crate) struct ChunkWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ChunkWriter<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte position.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) -> ChunkResult<()> {
        let end = self.pos + bytes.len();
        let dst = self.buf.get_mut(self.pos..end).ok_or_else(|| {
            ChunkError::malformed(format!("write of {} bytes past end at {}", bytes.len(), self.pos))
        })?;
        dst.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    pub(crate) fn put_u32(&mut self, value: u32) -> ChunkResult<()> {
        self.put_bytes(&value.to_ne_bytes())
    }

    pub(crate) fn put_i32(&mut self, value: i32) -> ChunkResult<()> {
        self.put_bytes(&value.to_ne_bytes())
    }

    /// Writes raw float bits so NaN payloads survive unchanged.
    pub(crate) fn put_u64(&mut self, bits: u64) -> ChunkResult<()> {
        self.put_bytes(&bits.to_ne_bytes())
    }

    /// Overwrites a previously reserved word without moving the cursor.
    pub(crate) fn patch_u32(&mut self, at: usize, value: u32) -> ChunkResult<()> {
        let dst = self
            .buf
            .get_mut(at..at + WORD_SIZE)
            .ok_or_else(|| ChunkError::malformed(format!("patch past end at {at}")))?;
        dst.copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    /// Advances to the next column boundary. Skipped bytes are left as the
    /// allocator's zero fill.
    pub(crate) fn align_column(&mut self) -> ChunkResult<()> {
        let aligned = self.pos.next_multiple_of(COLUMN_ALIGNMENT);
        if aligned > self.buf.len() {
            return Err(ChunkError::malformed("alignment past end of buffer"));
        }
        self.pos = aligned;
        Ok(())
    }
}
