//! Column type tags and the type-width resolver.
//!
//! Tags follow the type identifiers of the Arrow columnar format, which gives
//! the consumer a stable small-integer enumeration independent of the
//! engine's own type system.

use std::fmt;

use arrow::datatypes::DataType;

use batchline_common::constants::TEXT_SLOT_BYTES;

/// Logical column type as recorded in a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TypeTag {
    /// No type.
    None = 0,
    /// All-null column.
    Null = 1,
    /// Signed or unsigned integer of any width.
    Int = 2,
    /// Floating point of any width.
    Float = 3,
    /// Variable-length bytes.
    Binary = 4,
    /// UTF-8 text.
    Utf8 = 5,
    /// Boolean.
    Bool = 6,
    /// Fixed-point decimal.
    Decimal = 7,
    /// Calendar date.
    Date = 8,
    /// Time of day.
    Time = 9,
    /// Instant since the Unix epoch.
    Timestamp = 10,
    /// Calendar interval.
    Interval = 11,
    /// Variable-length list.
    List = 12,
    /// Struct.
    Struct = 13,
    /// Union.
    Union = 14,
    /// Fixed-size bytes.
    FixedSizeBinary = 15,
    /// Fixed-size list.
    FixedSizeList = 16,
    /// Map.
    Map = 17,
    /// Elapsed time.
    Duration = 18,
    /// Variable-length bytes with 64-bit offsets.
    LargeBinary = 19,
    /// UTF-8 text with 64-bit offsets.
    LargeUtf8 = 20,
}

impl TypeTag {
    /// Maps an Arrow data type to its logical tag.
    ///
    /// Every string representation maps to [`TypeTag::Utf8`], every integer
    /// width to [`TypeTag::Int`], and every float width to
    /// [`TypeTag::Float`].
    #[must_use]
    pub fn of(data_type: &DataType) -> Self {
        match data_type {
            DataType::Null => TypeTag::Null,
            DataType::Boolean => TypeTag::Bool,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => TypeTag::Int,
            DataType::Float16 | DataType::Float32 | DataType::Float64 => TypeTag::Float,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => TypeTag::Utf8,
            DataType::Binary | DataType::BinaryView => TypeTag::Binary,
            DataType::LargeBinary => TypeTag::LargeBinary,
            DataType::FixedSizeBinary(_) => TypeTag::FixedSizeBinary,
            DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => TypeTag::Decimal,
            DataType::Date32 | DataType::Date64 => TypeTag::Date,
            DataType::Time32(_) | DataType::Time64(_) => TypeTag::Time,
            DataType::Timestamp(_, _) => TypeTag::Timestamp,
            DataType::Interval(_) => TypeTag::Interval,
            DataType::Duration(_) => TypeTag::Duration,
            DataType::List(_) | DataType::LargeList(_) => TypeTag::List,
            DataType::FixedSizeList(_, _) => TypeTag::FixedSizeList,
            DataType::Struct(_) => TypeTag::Struct,
            DataType::Union(_, _) => TypeTag::Union,
            DataType::Map(_, _) => TypeTag::Map,
            _ => TypeTag::None,
        }
    }

    /// Converts a raw tag read from a chunk.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => TypeTag::None,
            1 => TypeTag::Null,
            2 => TypeTag::Int,
            3 => TypeTag::Float,
            4 => TypeTag::Binary,
            5 => TypeTag::Utf8,
            6 => TypeTag::Bool,
            7 => TypeTag::Decimal,
            8 => TypeTag::Date,
            9 => TypeTag::Time,
            10 => TypeTag::Timestamp,
            11 => TypeTag::Interval,
            12 => TypeTag::List,
            13 => TypeTag::Struct,
            14 => TypeTag::Union,
            15 => TypeTag::FixedSizeBinary,
            16 => TypeTag::FixedSizeList,
            17 => TypeTag::Map,
            18 => TypeTag::Duration,
            19 => TypeTag::LargeBinary,
            20 => TypeTag::LargeUtf8,
            _ => return None,
        })
    }

    /// Returns the raw tag value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns the packed byte width for this tag.
    ///
    /// `0` means the type has no fixed-width encoding.
    #[inline]
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            TypeTag::Float | TypeTag::Date | TypeTag::Timestamp => 8,
            TypeTag::Utf8 => TEXT_SLOT_BYTES,
            TypeTag::Int => 4,
            _ => 0,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u32())
    }
}

/// Resolves the packed byte width of a raw type tag.
///
/// Returns `0`, `4`, or `8`. Unrecognized tags resolve to `0`.
#[must_use]
pub const fn resolve_width(raw_tag: u32) -> usize {
    match TypeTag::from_u32(raw_tag) {
        Some(tag) => tag.width(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::TimeUnit;

    #[test]
    fn test_widths() {
        assert_eq!(resolve_width(3), 8);
        assert_eq!(resolve_width(5), 8);
        assert_eq!(resolve_width(8), 8);
        assert_eq!(resolve_width(10), 8);
        assert_eq!(resolve_width(2), 4);
        assert_eq!(resolve_width(6), 0);
        assert_eq!(resolve_width(7), 0);
        assert_eq!(resolve_width(999), 0);
    }

    #[test]
    fn test_logical_mapping() {
        assert_eq!(TypeTag::of(&DataType::Int8), TypeTag::Int);
        assert_eq!(TypeTag::of(&DataType::UInt64), TypeTag::Int);
        assert_eq!(TypeTag::of(&DataType::Float32), TypeTag::Float);
        assert_eq!(TypeTag::of(&DataType::Utf8View), TypeTag::Utf8);
        assert_eq!(TypeTag::of(&DataType::LargeUtf8), TypeTag::Utf8);
        assert_eq!(TypeTag::of(&DataType::Date64), TypeTag::Date);
        assert_eq!(
            TypeTag::of(&DataType::Timestamp(TimeUnit::Nanosecond, None)),
            TypeTag::Timestamp
        );
        assert_eq!(TypeTag::of(&DataType::Boolean), TypeTag::Bool);
    }

    #[test]
    fn test_from_u32_roundtrip() {
        for raw in 0..=20 {
            let tag = TypeTag::from_u32(raw).unwrap();
            assert_eq!(tag.as_u32(), raw);
        }
        assert!(TypeTag::from_u32(21).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TypeTag::Utf8.to_string(), "Utf8(5)");
    }
}
