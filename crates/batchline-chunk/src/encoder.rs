//! Batch encoder.
//!
//! Converts one engine record batch into a chunk inside host memory. Every
//! value is materialized and checked before the host is asked for a buffer,
//! so a rejected batch never allocates.

use std::fmt;
use std::slice;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Decimal128Type, Float16Type, Float32Type, Float64Type,
    Int16Type, Int32Type, Int64Type, Int8Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use batchline_common::constants::{
    CANONICAL_NAN_BITS, NULL_F64_BITS, NULL_INT32, NULL_TEXT_MARKER, TEXT_SLOT_BYTES, WORD_SIZE,
};
use batchline_common::types::ChunkAddress;

use crate::allocator::HostAllocator;
use crate::error::{ChunkError, ChunkResult};
use crate::layout::{name_table_words, required_bytes, ChunkWriter};
use crate::types::TypeTag;

/// One engine batch plus the end-of-stream flag.
#[derive(Debug, Clone)]
pub struct RawBatch {
    batch: RecordBatch,
    done: bool,
}

impl RawBatch {
    /// Wraps a record batch.
    pub fn new(batch: RecordBatch, done: bool) -> Self {
        Self { batch, done }
    }

    /// The underlying record batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// True if no further batches follow.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.batch.num_columns()
    }
}

/// What to do with a column that has no fixed-width encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedColumnPolicy {
    /// Fail the whole batch.
    #[default]
    Reject,
    /// Record the column with width 0 and no payload.
    Skip,
}

impl fmt::Display for UnsupportedColumnPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsupportedColumnPolicy::Reject => f.write_str("reject"),
            UnsupportedColumnPolicy::Skip => f.write_str("skip"),
        }
    }
}

/// Encoder type-mapping options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// Encode 64-bit integers as 8-byte floats instead of narrowing to 4
    /// bytes.
    #[serde(default = "default_true")]
    pub bigint_as_double: bool,

    /// Encode 128-bit decimals as 8-byte floats.
    #[serde(default = "default_true")]
    pub decimal_as_double: bool,

    /// Handling of columns without an encoding.
    #[serde(default)]
    pub unsupported_columns: UnsupportedColumnPolicy,
}

fn default_true() -> bool {
    true
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            bigint_as_double: true,
            decimal_as_double: true,
            unsupported_columns: UnsupportedColumnPolicy::Reject,
        }
    }
}

enum Payload {
    Int(Vec<i32>),
    /// f64 bit patterns.
    Wide(Vec<u64>),
    Text(Vec<[u8; TEXT_SLOT_BYTES]>),
    Skipped,
}

impl Payload {
    fn width(&self) -> usize {
        match self {
            Payload::Int(_) => 4,
            Payload::Wide(_) => 8,
            Payload::Text(_) => TEXT_SLOT_BYTES,
            Payload::Skipped => 0,
        }
    }
}

struct PreparedColumn<'a> {
    name: &'a str,
    tag: TypeTag,
    payload: Payload,
}

/// Writes record batches into host-allocated chunks.
///
/// # Example
///
/// ```rust,ignore
/// let host = Arc::new(HeapAllocator::new());
/// let encoder = ChunkEncoder::new(host.clone(), EncoderOptions::default());
/// let address = encoder.encode(&RawBatch::new(batch, false))?;
/// let chunk = host.take(address).unwrap();
/// ```
#[derive(Clone)]
pub struct ChunkEncoder {
    allocator: Arc<dyn HostAllocator>,
    options: EncoderOptions,
}

impl ChunkEncoder {
    /// Creates an encoder writing into `allocator`.
    pub fn new(allocator: Arc<dyn HostAllocator>, options: EncoderOptions) -> Self {
        Self { allocator, options }
    }

    /// Returns the encoder options.
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Encodes one batch.
    ///
    /// A `done` batch with no rows produces [`ChunkAddress::TERMINAL`]
    /// without allocating. Any other batch is written to a fresh host region
    /// whose address is returned after `notify_ready`.
    ///
    /// # Errors
    ///
    /// - [`ChunkError::UnsupportedColumn`] under the reject policy
    /// - [`ChunkError::ValueOutOfRange`] for integers that do not fit 4 bytes
    /// - [`ChunkError::TooLarge`] or [`ChunkError::Allocation`] if the host
    ///   cannot provide the buffer
    pub fn encode(&self, raw: &RawBatch) -> ChunkResult<ChunkAddress> {
        let batch = raw.batch();
        let row_count = batch.num_rows();
        if raw.done() && row_count == 0 {
            debug!("end of stream, no chunk written");
            return Ok(ChunkAddress::TERMINAL);
        }

        let columns = batch
            .schema_ref()
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| self.prepare_column(field.name(), array))
            .collect::<ChunkResult<Vec<_>>>()?;

        let name_words = name_table_words(columns.iter().map(|c| c.name));
        let widths: Vec<usize> = columns.iter().map(|c| c.payload.width()).collect();
        let total = required_bytes(name_words, &widths, row_count)?;
        // a batch without columns can carry more rows than the header holds
        let row_word =
            u32::try_from(row_count).map_err(|_| ChunkError::TooLarge { bytes: total })?;

        let address = self.allocator.allocate(total)?;
        let base = usize::try_from(address.as_u64()).map_err(|_| ChunkError::Allocation {
            size: total,
            reason: format!("address {address} exceeds pointer width"),
        })? as *mut u8;
        // SAFETY: HostAllocator guarantees `total` writable bytes at `address`
        // that nobody else touches until notify_ready or discard.
        let buf = unsafe { slice::from_raw_parts_mut(base, total) };

        match write_chunk(buf, raw.done(), row_word, &columns) {
            Ok(()) => {
                self.allocator.notify_ready(address);
                debug!(
                    %address,
                    bytes = total,
                    columns = columns.len(),
                    rows = row_count,
                    done = raw.done(),
                    "encoded chunk"
                );
                Ok(address)
            }
            Err(e) => {
                self.allocator.discard(address);
                Err(e)
            }
        }
    }

    fn prepare_column<'a>(&self, name: &'a str, array: &ArrayRef) -> ChunkResult<PreparedColumn<'a>> {
        let data_type = array.data_type();
        let tag = TypeTag::of(data_type);
        let array = array.as_ref();

        let (tag, payload) = match data_type {
            DataType::Int64 if self.options.bigint_as_double => (
                TypeTag::Float,
                Payload::Wide(wide_values::<Int64Type>(array, |v| v as f64)),
            ),
            DataType::UInt64 if self.options.bigint_as_double => (
                TypeTag::Float,
                Payload::Wide(wide_values::<UInt64Type>(array, |v| v as f64)),
            ),
            DataType::Decimal128(_, scale) if self.options.decimal_as_double => {
                let divisor = 10f64.powi(i32::from(*scale));
                (
                    TypeTag::Float,
                    Payload::Wide(wide_values::<Decimal128Type>(array, |v| v as f64 / divisor)),
                )
            }
            DataType::Int8 => (TypeTag::Int, Payload::Int(int_values::<Int8Type>(name, array)?)),
            DataType::Int16 => (TypeTag::Int, Payload::Int(int_values::<Int16Type>(name, array)?)),
            DataType::Int32 => (TypeTag::Int, Payload::Int(int_values::<Int32Type>(name, array)?)),
            DataType::Int64 => (TypeTag::Int, Payload::Int(int_values::<Int64Type>(name, array)?)),
            DataType::UInt8 => (TypeTag::Int, Payload::Int(int_values::<UInt8Type>(name, array)?)),
            DataType::UInt16 => (TypeTag::Int, Payload::Int(int_values::<UInt16Type>(name, array)?)),
            DataType::UInt32 => (TypeTag::Int, Payload::Int(int_values::<UInt32Type>(name, array)?)),
            DataType::UInt64 => (TypeTag::Int, Payload::Int(int_values::<UInt64Type>(name, array)?)),
            DataType::Float16 => (
                TypeTag::Float,
                Payload::Wide(wide_values::<Float16Type>(array, f64::from)),
            ),
            DataType::Float32 => (
                TypeTag::Float,
                Payload::Wide(wide_values::<Float32Type>(array, f64::from)),
            ),
            DataType::Float64 => (
                TypeTag::Float,
                Payload::Wide(wide_values::<Float64Type>(array, |v| v)),
            ),
            DataType::Timestamp(unit, _) => {
                (TypeTag::Timestamp, Payload::Wide(timestamp_micros(array, unit)))
            }
            DataType::Utf8 => (
                TypeTag::Utf8,
                Payload::Text(text_slots(array.as_string::<i32>().iter())),
            ),
            DataType::LargeUtf8 => (
                TypeTag::Utf8,
                Payload::Text(text_slots(array.as_string::<i64>().iter())),
            ),
            DataType::Utf8View => (
                TypeTag::Utf8,
                Payload::Text(text_slots(array.as_string_view().iter())),
            ),
            // dates resolve to 8 bytes but have no agreed payload encoding
            _ => return self.unsupported(name, tag),
        };

        Ok(PreparedColumn { name, tag, payload })
    }

    fn unsupported<'a>(&self, name: &'a str, tag: TypeTag) -> ChunkResult<PreparedColumn<'a>> {
        match self.options.unsupported_columns {
            UnsupportedColumnPolicy::Reject => Err(ChunkError::UnsupportedColumn {
                column: name.to_string(),
                tag,
            }),
            UnsupportedColumnPolicy::Skip => {
                warn!(column = name, %tag, "skipping column without a fixed-width encoding");
                Ok(PreparedColumn {
                    name,
                    tag,
                    payload: Payload::Skipped,
                })
            }
        }
    }
}

impl fmt::Debug for ChunkEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkEncoder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn int_values<T>(column: &str, array: &dyn Array) -> ChunkResult<Vec<i32>>
where
    T: ArrowPrimitiveType,
    T::Native: TryInto<i32> + fmt::Display,
{
    let values = array.as_primitive::<T>();
    let mut out = Vec::with_capacity(values.len());
    for (row, value) in values.iter().enumerate() {
        let Some(value) = value else {
            out.push(NULL_INT32);
            continue;
        };
        let narrowed: Result<i32, _> = value.try_into();
        match narrowed {
            Ok(v) if v != NULL_INT32 => out.push(v),
            _ => {
                return Err(ChunkError::ValueOutOfRange {
                    column: column.to_string(),
                    row,
                    value: value.to_string(),
                    width: 4,
                })
            }
        }
    }
    Ok(out)
}

fn wide_values<T: ArrowPrimitiveType>(
    array: &dyn Array,
    convert: impl Fn(T::Native) -> f64,
) -> Vec<u64> {
    array
        .as_primitive::<T>()
        .iter()
        .map(|value| match value {
            Some(v) => float_bits(convert(v)),
            None => NULL_F64_BITS,
        })
        .collect()
}

/// Canonicalizes NaNs so no value collides with the null marker.
fn float_bits(value: f64) -> u64 {
    if value.is_nan() {
        CANONICAL_NAN_BITS
    } else {
        value.to_bits()
    }
}

fn timestamp_micros(array: &dyn Array, unit: &TimeUnit) -> Vec<u64> {
    match unit {
        TimeUnit::Second => wide_values::<TimestampSecondType>(array, |v| v as f64 * 1e6),
        TimeUnit::Millisecond => wide_values::<TimestampMillisecondType>(array, |v| v as f64 * 1e3),
        TimeUnit::Microsecond => wide_values::<TimestampMicrosecondType>(array, |v| v as f64),
        TimeUnit::Nanosecond => wide_values::<TimestampNanosecondType>(array, |v| v as f64 / 1e3),
    }
}

fn text_slots<'s>(values: impl Iterator<Item = Option<&'s str>>) -> Vec<[u8; TEXT_SLOT_BYTES]> {
    values
        .map(|value| match value {
            Some(s) => text_slot(s),
            None => {
                let mut slot = [0u8; TEXT_SLOT_BYTES];
                slot[0] = NULL_TEXT_MARKER;
                slot
            }
        })
        .collect()
}

/// Packs text into one slot, truncating on a character boundary.
pub fn text_slot(value: &str) -> [u8; TEXT_SLOT_BYTES] {
    let mut slot = [0u8; TEXT_SLOT_BYTES];
    let mut end = value.len().min(TEXT_SLOT_BYTES - 1);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    slot[..end].copy_from_slice(&value.as_bytes()[..end]);
    slot
}

fn write_chunk(
    buf: &mut [u8],
    done: bool,
    row_count: u32,
    columns: &[PreparedColumn<'_>],
) -> ChunkResult<()> {
    let column_count = u32::try_from(columns.len())
        .map_err(|_| ChunkError::TooLarge { bytes: buf.len() })?;
    let mut w = ChunkWriter::new(buf);

    w.put_u32(u32::from(done))?;
    w.put_u32(column_count)?;
    w.put_u32(row_count)?;
    for column in columns {
        w.put_u32(column.tag.as_u32())?;
    }

    let table = w.position();
    for _ in columns {
        w.put_u32(0)?;
    }

    for column in columns {
        for ch in column.name.chars() {
            w.put_u32(u32::from(ch))?;
        }
        w.put_u32(0)?;
    }

    for (index, column) in columns.iter().enumerate() {
        w.align_column()?;
        let offset = w.position();
        let offset_word = u32::try_from(offset)
            .map_err(|_| ChunkError::TooLarge { bytes: offset })?;
        w.patch_u32(table + index * WORD_SIZE, offset_word)?;

        w.put_u32(column.tag.as_u32())?;
        w.put_u32(column.payload.width() as u32)?;
        match &column.payload {
            Payload::Int(values) => {
                for v in values {
                    w.put_i32(*v)?;
                }
            }
            Payload::Wide(values) => {
                for bits in values {
                    w.put_u64(*bits)?;
                }
            }
            Payload::Text(slots) => {
                for slot in slots {
                    w.put_bytes(slot)?;
                }
            }
            Payload::Skipped => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;
    use crate::reader::{CellValue, ChunkReader};
    use arrow::array::{
        BooleanArray, Date32Array, Decimal128Array, Float64Array, Int32Array, Int64Array,
        StringArray, TimestampMillisecondArray,
    };
    use arrow::datatypes::{Field, Schema};

    fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect();
        let arrays = columns.into_iter().map(|(_, a)| a).collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
    }

    fn sample() -> RecordBatch {
        batch(vec![
            ("id", Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef),
            ("score", Arc::new(Float64Array::from(vec![0.5, 1.5, 2.5]))),
            ("name", Arc::new(StringArray::from(vec!["a", "bb", "ccc"]))),
        ])
    }

    fn setup(options: EncoderOptions) -> (Arc<HeapAllocator>, ChunkEncoder) {
        let host = Arc::new(HeapAllocator::new());
        let encoder = ChunkEncoder::new(host.clone(), options);
        (host, encoder)
    }

    fn word(bytes: &[u8], offset: usize) -> u32 {
        u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_roundtrip_names_tags_and_values() {
        let (host, encoder) = setup(EncoderOptions::default());
        let address = encoder.encode(&RawBatch::new(sample(), false)).unwrap();
        assert!(!address.is_terminal());

        let chunk = host.take(address).unwrap();
        let reader = chunk.reader().unwrap();
        assert!(!reader.done());
        assert_eq!(reader.column_count(), 3);
        assert_eq!(reader.row_count(), 3);
        assert_eq!(reader.names(), ["id", "score", "name"]);
        assert_eq!(reader.type_tags().unwrap(), vec![2, 3, 5]);

        let name = reader.column(2).unwrap();
        assert_eq!(name.width(), 8);
        assert_eq!(name.value(2).unwrap(), Some(CellValue::Text("ccc".into())));
        assert_eq!(
            reader.column(1).unwrap().value(1).unwrap(),
            Some(CellValue::Float(1.5))
        );
    }

    #[test]
    fn test_address_table_points_at_subheaders() {
        let (host, encoder) = setup(EncoderOptions::default());
        let address = encoder.encode(&RawBatch::new(sample(), false)).unwrap();
        let chunk = host.take(address).unwrap();
        let bytes = chunk.as_bytes();
        let reader = chunk.reader().unwrap();

        let mut last = 0;
        for index in 0..reader.column_count() {
            let offset = reader.column_offset(index).unwrap();
            assert_eq!(offset % 8, 0);
            assert!(offset > last);
            assert_eq!(word(bytes, offset), reader.type_tag(index).unwrap());
            last = offset;
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let (host, encoder) = setup(EncoderOptions::default());
        let raw = RawBatch::new(sample(), false);
        let a = encoder.encode(&raw).unwrap();
        let b = encoder.encode(&raw).unwrap();
        assert_ne!(a, b);

        let first = host.take(a).unwrap();
        let second = host.take(b).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_odd_int_rows_keep_next_column_aligned() {
        let (host, encoder) = setup(EncoderOptions::default());
        let raw = RawBatch::new(
            batch(vec![
                ("n", Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef),
                ("x", Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0]))),
            ]),
            false,
        );
        let chunk = host.take(encoder.encode(&raw).unwrap()).unwrap();
        let reader = chunk.reader().unwrap();
        assert_eq!(reader.column_offset(1).unwrap() % 8, 0);
        assert_eq!(
            reader.column(1).unwrap().value(2).unwrap(),
            Some(CellValue::Float(3.0))
        );
    }

    #[test]
    fn test_null_sentinels() {
        let (host, encoder) = setup(EncoderOptions::default());
        let raw = RawBatch::new(
            batch(vec![
                ("i", Arc::new(Int32Array::from(vec![Some(0), Some(5), None])) as ArrayRef),
                ("f", Arc::new(Float64Array::from(vec![Some(0.0), Some(f64::NAN), None]))),
                ("s", Arc::new(StringArray::from(vec![Some(""), Some("x"), None]))),
            ]),
            false,
        );
        let chunk = host.take(encoder.encode(&raw).unwrap()).unwrap();
        let reader = chunk.reader().unwrap();

        for index in 0..3 {
            let column = reader.column(index).unwrap();
            assert!(column.value(0).unwrap().is_some(), "column {index} row 0");
            assert_eq!(column.value(2).unwrap(), None, "column {index} row 2");
        }

        let floats = reader.column(1).unwrap();
        let nan = &floats.payload()[8..16];
        assert_eq!(u64::from_ne_bytes(nan.try_into().unwrap()), CANONICAL_NAN_BITS);
        let null = &floats.payload()[16..24];
        assert_eq!(u64::from_ne_bytes(null.try_into().unwrap()), NULL_F64_BITS);
    }

    #[test]
    fn test_empty_done_batch_is_terminal() {
        let (host, encoder) = setup(EncoderOptions::default());
        let empty = sample().slice(0, 0);
        let address = encoder.encode(&RawBatch::new(empty, true)).unwrap();
        assert!(address.is_terminal());
        assert_eq!(host.stats().allocations, 0);
    }

    #[test]
    fn test_done_batch_with_rows_sets_flag() {
        let (host, encoder) = setup(EncoderOptions::default());
        let address = encoder.encode(&RawBatch::new(sample(), true)).unwrap();
        assert!(!address.is_terminal());
        let chunk = host.take(address).unwrap();
        assert!(chunk.reader().unwrap().done());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_columnless_row_count_beyond_header_rejected() {
        use arrow::record_batch::RecordBatchOptions;

        let (host, encoder) = setup(EncoderOptions::default());
        let rows = u32::MAX as usize + 1;
        let batch = RecordBatch::try_new_with_options(
            Arc::new(Schema::empty()),
            vec![],
            &RecordBatchOptions::new().with_row_count(Some(rows)),
        )
        .unwrap();

        let err = encoder.encode(&RawBatch::new(batch, false)).unwrap_err();
        assert!(matches!(err, ChunkError::TooLarge { .. }));
        assert_eq!(host.stats().allocations, 0);
    }

    #[test]
    fn test_empty_batch_not_done_writes_header_only_columns() {
        let (host, encoder) = setup(EncoderOptions::default());
        let address = encoder
            .encode(&RawBatch::new(sample().slice(0, 0), false))
            .unwrap();
        let chunk = host.take(address).unwrap();
        let reader = chunk.reader().unwrap();
        assert_eq!(reader.row_count(), 0);
        assert_eq!(reader.columns().unwrap().len(), 3);
    }

    #[test]
    fn test_date_column_rejected_before_allocation() {
        let (host, encoder) = setup(EncoderOptions::default());
        let raw = RawBatch::new(
            batch(vec![("d", Arc::new(Date32Array::from(vec![1, 2])) as ArrayRef)]),
            false,
        );
        let err = encoder.encode(&raw).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::UnsupportedColumn { tag: TypeTag::Date, .. }
        ));
        assert_eq!(host.stats().allocations, 0);
    }

    #[test]
    fn test_skip_policy_keeps_neighbours_addressable() {
        let (host, encoder) = setup(EncoderOptions {
            unsupported_columns: UnsupportedColumnPolicy::Skip,
            ..EncoderOptions::default()
        });
        let raw = RawBatch::new(
            batch(vec![
                ("a", Arc::new(Int32Array::from(vec![10, 20])) as ArrayRef),
                ("flag", Arc::new(BooleanArray::from(vec![true, false]))),
                ("b", Arc::new(Int32Array::from(vec![30, 40]))),
            ]),
            false,
        );
        let chunk = host.take(encoder.encode(&raw).unwrap()).unwrap();
        let reader = chunk.reader().unwrap();

        let flag = reader.column(1).unwrap();
        assert!(flag.is_skipped());
        assert_eq!(flag.tag(), Some(TypeTag::Bool));
        assert!(flag.value(0).is_err());
        assert_eq!(
            reader.column(2).unwrap().value(1).unwrap(),
            Some(CellValue::Int(40))
        );
    }

    #[test]
    fn test_text_truncates_on_char_boundary() {
        assert_eq!(&text_slot("hello world"), b"hello w\0");
        // 2-byte chars: only three fit in seven bytes
        let slot = text_slot("ééééé");
        assert_eq!(std::str::from_utf8(&slot[..6]).unwrap(), "ééé");
        assert_eq!(slot[6], 0);
        assert_eq!(&text_slot("ab"), b"ab\0\0\0\0\0\0");
    }

    #[test]
    fn test_bigint_as_double() {
        let (host, encoder) = setup(EncoderOptions::default());
        let raw = RawBatch::new(
            batch(vec![("v", Arc::new(Int64Array::from(vec![1, 1 << 40])) as ArrayRef)]),
            false,
        );
        let chunk = host.take(encoder.encode(&raw).unwrap()).unwrap();
        let reader = chunk.reader().unwrap();
        assert_eq!(reader.type_tag(0).unwrap(), TypeTag::Float.as_u32());
        assert_eq!(
            reader.column(0).unwrap().value(1).unwrap(),
            Some(CellValue::Float((1u64 << 40) as f64))
        );
    }

    #[test]
    fn test_narrowing_out_of_range_fails_before_allocation() {
        let (host, encoder) = setup(EncoderOptions {
            bigint_as_double: false,
            ..EncoderOptions::default()
        });
        let raw = RawBatch::new(
            batch(vec![("v", Arc::new(Int64Array::from(vec![1, 1 << 40])) as ArrayRef)]),
            false,
        );
        let err = encoder.encode(&raw).unwrap_err();
        assert!(matches!(err, ChunkError::ValueOutOfRange { row: 1, width: 4, .. }));
        assert_eq!(host.stats().allocations, 0);

        let raw = RawBatch::new(
            batch(vec![("v", Arc::new(Int32Array::from(vec![i32::MIN])) as ArrayRef)]),
            false,
        );
        assert!(matches!(
            encoder.encode(&raw),
            Err(ChunkError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_decimal_and_timestamp_conversion() {
        let (host, encoder) = setup(EncoderOptions::default());
        let decimals = Decimal128Array::from(vec![12345i128])
            .with_precision_and_scale(10, 2)
            .unwrap();
        let raw = RawBatch::new(
            batch(vec![
                ("price", Arc::new(decimals) as ArrayRef),
                ("at", Arc::new(TimestampMillisecondArray::from(vec![1_500]))),
            ]),
            false,
        );
        let chunk = host.take(encoder.encode(&raw).unwrap()).unwrap();
        let reader = chunk.reader().unwrap();
        assert_eq!(
            reader.column(0).unwrap().value(0).unwrap(),
            Some(CellValue::Float(123.45))
        );
        assert_eq!(reader.type_tag(1).unwrap(), TypeTag::Timestamp.as_u32());
        assert_eq!(
            reader.column(1).unwrap().value(0).unwrap(),
            Some(CellValue::Float(1_500_000.0))
        );
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let host = Arc::new(HeapAllocator::with_limit(16));
        let encoder = ChunkEncoder::new(host.clone(), EncoderOptions::default());
        let err = encoder.encode(&RawBatch::new(sample(), false)).unwrap_err();
        assert!(matches!(err, ChunkError::Allocation { .. }));
        assert_eq!(host.outstanding(), 0);
    }

    #[test]
    fn test_encoded_chunk_readable_in_place() {
        let (host, encoder) = setup(EncoderOptions::default());
        let address = encoder.encode(&RawBatch::new(sample(), false)).unwrap();
        let measured = {
            let reader = unsafe { ChunkReader::from_raw(address) }.unwrap();
            assert_eq!(reader.names(), ["id", "score", "name"]);
            reader.as_bytes().len()
        };
        let chunk = host.take(address).unwrap();
        // allocation reserves alignment slack the layout may not use
        assert!(measured <= chunk.len());
        assert!(chunk.len() - measured < 4 * 3 + 1);
    }
}
