//! Chunk decoding for the consumer side.
//!
//! The reader only follows the layout: header words, the address table, and
//! each column's sub-header. It never needs the engine's schema.

use std::fmt;
use std::slice;

use bytes::Buf;

use batchline_common::constants::{
    COLUMN_ALIGNMENT, NULL_F64_BITS, NULL_INT32, NULL_TEXT_MARKER, SUBHEADER_WORDS,
    TEXT_SLOT_BYTES, TYPE_TAGS_OFFSET, WORD_SIZE,
};
use batchline_common::types::ChunkAddress;

use crate::error::{ChunkError, ChunkResult};
use crate::layout::{address_table_offset, name_table_offset};
use crate::types::TypeTag;

/// A decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// 4-byte integer.
    Int(i32),
    /// 8-byte float (also used for timestamps in microseconds).
    Float(f64),
    /// Text, possibly truncated to the slot size.
    Text(String),
}

impl CellValue {
    /// Returns the value as a float if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(f64::from(*v)),
            CellValue::Float(v) => Some(*v),
            CellValue::Text(_) => None,
        }
    }

    /// Returns the text if this is a text cell.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> ChunkResult<u32> {
    let mut word = data
        .get(offset..offset + WORD_SIZE)
        .ok_or_else(|| ChunkError::malformed(format!("word at {offset} is out of bounds")))?;
    Ok(word.get_u32_ne())
}

unsafe fn raw_word(base: *const u8, offset: usize) -> u32 {
    base.add(offset).cast::<u32>().read_unaligned()
}

/// A parsed view over one encoded chunk.
///
/// # Example
///
/// ```rust,ignore
/// let chunk = host.take(address).unwrap();
/// let reader = chunk.reader()?;
/// for (index, name) in reader.names().iter().enumerate() {
///     let column = reader.column(index)?;
///     println!("{name}: {:?}", column.value(0)?);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChunkReader<'a> {
    data: &'a [u8],
    done: bool,
    column_count: usize,
    row_count: usize,
    names: Vec<String>,
}

impl<'a> ChunkReader<'a> {
    /// Parses the header and name table of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] if any part of the header lies
    /// outside `data` or a name is not valid Unicode.
    pub fn new(data: &'a [u8]) -> ChunkResult<Self> {
        let done = match read_u32(data, 0)? {
            0 => false,
            1 => true,
            other => return Err(ChunkError::malformed(format!("done flag is {other}"))),
        };
        let column_count = read_u32(data, WORD_SIZE)? as usize;
        let row_count = read_u32(data, 2 * WORD_SIZE)? as usize;

        let mut pos = name_table_offset(column_count);
        if pos > data.len() {
            return Err(ChunkError::malformed(format!(
                "{column_count} columns do not fit in {} bytes",
                data.len()
            )));
        }

        let mut names = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let mut name = String::new();
            loop {
                let word = read_u32(data, pos)?;
                pos += WORD_SIZE;
                if word == 0 {
                    break;
                }
                let ch = char::from_u32(word).ok_or_else(|| {
                    ChunkError::malformed(format!("invalid character {word:#x} in name table"))
                })?;
                name.push(ch);
            }
            names.push(name);
        }

        Ok(Self {
            data,
            done,
            column_count,
            row_count,
            names,
        })
    }

    /// Reads a chunk in place from host memory.
    ///
    /// The extent is measured by walking the header, name table, and column
    /// sub-headers.
    ///
    /// # Safety
    ///
    /// `address` must point to a fully written chunk that stays valid and
    /// unmodified for `'a`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] for the terminal address or an
    /// invalid layout.
    pub unsafe fn from_raw(address: ChunkAddress) -> ChunkResult<Self> {
        if address.is_terminal() {
            return Err(ChunkError::malformed("terminal address has no chunk"));
        }
        let base = usize::try_from(address.as_u64())
            .map_err(|_| ChunkError::malformed("address exceeds pointer width"))?
            as *const u8;

        let column_count = raw_word(base, WORD_SIZE) as usize;
        let row_count = raw_word(base, 2 * WORD_SIZE) as usize;

        let mut end = name_table_offset(column_count);
        for _ in 0..column_count {
            while raw_word(base, end) != 0 {
                end += WORD_SIZE;
            }
            end += WORD_SIZE;
        }
        let table = address_table_offset(column_count);
        for index in 0..column_count {
            let offset = raw_word(base, table + index * WORD_SIZE) as usize;
            let width = raw_word(base, offset + WORD_SIZE) as usize;
            end = end.max(offset + SUBHEADER_WORDS * WORD_SIZE + row_count * width);
        }

        Self::new(slice::from_raw_parts(base, end))
    }

    /// True if this is the final chunk of its query.
    #[must_use]
    pub fn done(&self) -> bool {
        self.done
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Number of rows in every column.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Column names in schema order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The raw bytes of the chunk.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Raw type tag of a column from the header array.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] for an out-of-range index.
    pub fn type_tag(&self, index: usize) -> ChunkResult<u32> {
        self.check_index(index)?;
        read_u32(self.data, TYPE_TAGS_OFFSET + index * WORD_SIZE)
    }

    /// All raw type tags in schema order.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] if the tag array is truncated.
    pub fn type_tags(&self) -> ChunkResult<Vec<u32>> {
        (0..self.column_count).map(|i| self.type_tag(i)).collect()
    }

    /// Byte offset of a column sub-block, from the address table.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] for an out-of-range index.
    pub fn column_offset(&self, index: usize) -> ChunkResult<usize> {
        self.check_index(index)?;
        let entry = address_table_offset(self.column_count) + index * WORD_SIZE;
        Ok(read_u32(self.data, entry)? as usize)
    }

    /// Locates and validates a column sub-block.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] if the sub-block is misaligned,
    /// out of bounds, or disagrees with the header's type tag.
    pub fn column(&self, index: usize) -> ChunkResult<ColumnView<'a>> {
        let header_tag = self.type_tag(index)?;
        let offset = self.column_offset(index)?;
        if offset % COLUMN_ALIGNMENT != 0 {
            return Err(ChunkError::malformed(format!(
                "column {index} starts at unaligned offset {offset}"
            )));
        }

        let raw_tag = read_u32(self.data, offset)?;
        if raw_tag != header_tag {
            return Err(ChunkError::malformed(format!(
                "column {index} sub-header tag {raw_tag} disagrees with header tag {header_tag}"
            )));
        }
        let width = read_u32(self.data, offset + WORD_SIZE)? as usize;
        if !matches!(width, 0 | 4 | 8) {
            return Err(ChunkError::malformed(format!(
                "column {index} has invalid width {width}"
            )));
        }

        let start = offset + SUBHEADER_WORDS * WORD_SIZE;
        let end = start + self.row_count * width;
        let payload = self.data.get(start..end).ok_or_else(|| {
            ChunkError::malformed(format!("column {index} payload ends past the chunk"))
        })?;

        Ok(ColumnView {
            raw_tag,
            width,
            offset,
            row_count: self.row_count,
            payload,
        })
    }

    /// All columns in schema order.
    ///
    /// # Errors
    ///
    /// Returns the first column validation error.
    pub fn columns(&self) -> ChunkResult<Vec<ColumnView<'a>>> {
        (0..self.column_count).map(|i| self.column(i)).collect()
    }

    fn check_index(&self, index: usize) -> ChunkResult<()> {
        if index >= self.column_count {
            return Err(ChunkError::malformed(format!(
                "column {index} out of range for {} columns",
                self.column_count
            )));
        }
        Ok(())
    }
}

/// One column sub-block.
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a> {
    raw_tag: u32,
    width: usize,
    offset: usize,
    row_count: usize,
    payload: &'a [u8],
}

impl<'a> ColumnView<'a> {
    /// The column's type tag, if recognized.
    #[must_use]
    pub fn tag(&self) -> Option<TypeTag> {
        TypeTag::from_u32(self.raw_tag)
    }

    /// The raw type tag.
    #[must_use]
    pub fn raw_tag(&self) -> u32 {
        self.raw_tag
    }

    /// Bytes per row. Zero when the payload was skipped.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Byte offset of the sub-header within the chunk.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// True if the encoder skipped this column's payload.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.width == 0
    }

    /// The raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Decodes one row. `Ok(None)` is a null.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] for an out-of-range row, a skipped
    /// column, or a text slot that is not valid UTF-8.
    pub fn value(&self, row: usize) -> ChunkResult<Option<CellValue>> {
        if row >= self.row_count {
            return Err(ChunkError::malformed(format!(
                "row {row} out of range for {} rows",
                self.row_count
            )));
        }
        if self.is_skipped() {
            return Err(ChunkError::malformed("column payload was skipped"));
        }

        let start = row * self.width;
        let mut cell = &self.payload[start..start + self.width];
        match (self.tag(), self.width) {
            (Some(TypeTag::Utf8), TEXT_SLOT_BYTES) => decode_text(cell),
            (_, 4) => {
                let v = cell.get_i32_ne();
                Ok((v != NULL_INT32).then_some(CellValue::Int(v)))
            }
            _ => {
                let bits = cell.get_u64_ne();
                Ok((bits != NULL_F64_BITS).then(|| CellValue::Float(f64::from_bits(bits))))
            }
        }
    }

    /// Decodes every row.
    ///
    /// # Errors
    ///
    /// Returns the first decoding error.
    pub fn values(&self) -> ChunkResult<Vec<Option<CellValue>>> {
        (0..self.row_count).map(|row| self.value(row)).collect()
    }
}

fn decode_text(slot: &[u8]) -> ChunkResult<Option<CellValue>> {
    if slot.first() == Some(&NULL_TEXT_MARKER) {
        return Ok(None);
    }
    let end = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
    let text = std::str::from_utf8(&slot[..end])
        .map_err(|e| ChunkError::malformed(format!("text slot is not UTF-8: {e}")))?;
    Ok(Some(CellValue::Text(text.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    /// One Int column "x" with rows [7, null].
    fn handmade_chunk() -> Vec<u8> {
        let mut data = words(&[
            1, 1, 2, // done, columns, rows
            2, // tag
            0, // address placeholder
            'x' as u32,
            0,
        ]);
        data.extend_from_slice(&[0; 4]); // pad to 8
        let offset = data.len() as u32;
        data[16..20].copy_from_slice(&offset.to_ne_bytes());
        data.extend(words(&[2, 4]));
        data.extend_from_slice(&7i32.to_ne_bytes());
        data.extend_from_slice(&NULL_INT32.to_ne_bytes());
        data
    }

    #[test]
    fn test_reads_handmade_chunk() {
        let data = handmade_chunk();
        let reader = ChunkReader::new(&data).unwrap();
        assert!(reader.done());
        assert_eq!(reader.column_count(), 1);
        assert_eq!(reader.row_count(), 2);
        assert_eq!(reader.names(), ["x"]);
        assert_eq!(reader.type_tags().unwrap(), vec![2]);

        let column = reader.column(0).unwrap();
        assert_eq!(column.offset(), 32);
        assert_eq!(column.tag(), Some(TypeTag::Int));
        assert_eq!(column.value(0).unwrap(), Some(CellValue::Int(7)));
        assert_eq!(column.value(1).unwrap(), None);
        assert!(column.value(2).is_err());
    }

    #[test]
    fn test_truncated_chunk_is_malformed() {
        let data = handmade_chunk();
        let reader = ChunkReader::new(&data[..36]).unwrap();
        assert!(matches!(reader.column(0), Err(ChunkError::Malformed(_))));
        assert!(ChunkReader::new(&data[..6]).is_err());
    }

    #[test]
    fn test_tag_mismatch_is_malformed() {
        let mut data = handmade_chunk();
        data[12..16].copy_from_slice(&3u32.to_ne_bytes());
        let reader = ChunkReader::new(&data).unwrap();
        assert!(reader.column(0).is_err());
    }

    #[test]
    fn test_bad_done_flag() {
        let mut data = handmade_chunk();
        data[0..4].copy_from_slice(&9u32.to_ne_bytes());
        assert!(ChunkReader::new(&data).is_err());
    }

    #[test]
    fn test_from_raw_measures_extent() {
        let data = handmade_chunk();
        // u64 backing keeps the base 8-byte aligned
        let mut backing = vec![0u64; data.len() / 8];
        let bytes = unsafe {
            slice::from_raw_parts_mut(backing.as_mut_ptr().cast::<u8>(), data.len())
        };
        bytes.copy_from_slice(&data);

        let address = ChunkAddress::from_ptr(backing.as_ptr().cast::<u8>());
        let reader = unsafe { ChunkReader::from_raw(address) }.unwrap();
        assert_eq!(reader.as_bytes().len(), data.len());
        assert_eq!(reader.column(0).unwrap().value(0).unwrap(), Some(CellValue::Int(7)));
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(
            decode_text(b"abc\0\0\0\0\0").unwrap(),
            Some(CellValue::Text("abc".into()))
        );
        assert_eq!(
            decode_text(&[0u8; 8]).unwrap(),
            Some(CellValue::Text(String::new()))
        );
        assert_eq!(decode_text(&[NULL_TEXT_MARKER, 0, 0, 0, 0, 0, 0, 0]).unwrap(), None);
    }
}
