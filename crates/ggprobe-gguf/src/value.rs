use num_traits::NumCast;
use serde::{Deserialize, Serialize};

/// Discriminant tag for GGUF metadata values.
///
/// Numeric values match the GGUF wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum GgufValueType {
    Uint8 = 0,
    Int8 = 1,
    Uint16 = 2,
    Int16 = 3,
    Uint32 = 4,
    Int32 = 5,
    Float32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    Uint64 = 10,
    Int64 = 11,
    Float64 = 12,
}

impl GgufValueType {
    /// Convert from the raw u32 discriminant in the file.
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uint8),
            1 => Some(Self::Int8),
            2 => Some(Self::Uint16),
            3 => Some(Self::Int16),
            4 => Some(Self::Uint32),
            5 => Some(Self::Int32),
            6 => Some(Self::Float32),
            7 => Some(Self::Bool),
            8 => Some(Self::String),
            9 => Some(Self::Array),
            10 => Some(Self::Uint64),
            11 => Some(Self::Int64),
            12 => Some(Self::Float64),
            _ => None,
        }
    }

    /// Encoded width of a fixed-size scalar; `None` for strings and arrays.
    pub const fn scalar_size(self) -> Option<u64> {
        match self {
            Self::Uint8 | Self::Int8 | Self::Bool => Some(1),
            Self::Uint16 | Self::Int16 => Some(2),
            Self::Uint32 | Self::Int32 | Self::Float32 => Some(4),
            Self::Uint64 | Self::Int64 | Self::Float64 => Some(8),
            Self::String | Self::Array => None,
        }
    }
}

/// A decoded GGUF metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GgufValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(GgufArray),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
}

impl GgufValue {
    pub fn value_type(&self) -> GgufValueType {
        match self {
            Self::Uint8(_) => GgufValueType::Uint8,
            Self::Int8(_) => GgufValueType::Int8,
            Self::Uint16(_) => GgufValueType::Uint16,
            Self::Int16(_) => GgufValueType::Int16,
            Self::Uint32(_) => GgufValueType::Uint32,
            Self::Int32(_) => GgufValueType::Int32,
            Self::Float32(_) => GgufValueType::Float32,
            Self::Bool(_) => GgufValueType::Bool,
            Self::String(_) => GgufValueType::String,
            Self::Array(_) => GgufValueType::Array,
            Self::Uint64(_) => GgufValueType::Uint64,
            Self::Int64(_) => GgufValueType::Int64,
            Self::Float64(_) => GgufValueType::Float64,
        }
    }

    /// Convert a numeric scalar to `T`.
    ///
    /// Returns `None` for non-numeric values and for values that do not fit
    /// in `T` (negative into unsigned, too large, NaN into an integer).
    /// Floats converted to integers drop their fractional part.
    pub fn to_numeric<T: NumCast>(&self) -> Option<T> {
        match *self {
            Self::Uint8(v) => T::from(v),
            Self::Int8(v) => T::from(v),
            Self::Uint16(v) => T::from(v),
            Self::Int16(v) => T::from(v),
            Self::Uint32(v) => T::from(v),
            Self::Int32(v) => T::from(v),
            Self::Float32(v) => T::from(v),
            Self::Uint64(v) => T::from(v),
            Self::Int64(v) => T::from(v),
            Self::Float64(v) => T::from(v),
            Self::Bool(_) | Self::String(_) | Self::Array(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&GgufArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// Element storage of an array value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    /// Every element was decoded.
    Materialized { values: Vec<GgufValue>, size: u64 },
    /// The decoder advanced past the elements; only the count and the encoded
    /// byte size are known.
    Skipped { len: u64, size: u64 },
}

/// A homogeneous GGUF array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GgufArray {
    pub elem_type: GgufValueType,
    pub data: ArrayData,
}

impl GgufArray {
    pub fn materialized(elem_type: GgufValueType, values: Vec<GgufValue>, size: u64) -> Self {
        Self { elem_type, data: ArrayData::Materialized { values, size } }
    }

    pub fn skipped(elem_type: GgufValueType, len: u64, size: u64) -> Self {
        Self { elem_type, data: ArrayData::Skipped { len, size } }
    }

    /// Element count, known for skipped arrays too.
    pub fn len(&self) -> u64 {
        match &self.data {
            ArrayData::Materialized { values, .. } => values.len() as u64,
            ArrayData::Skipped { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded byte size of the elements (excluding the tag and length prefix).
    pub fn size(&self) -> u64 {
        match &self.data {
            ArrayData::Materialized { size, .. } | ArrayData::Skipped { size, .. } => *size,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.data, ArrayData::Skipped { .. })
    }

    pub fn values(&self) -> Option<&[GgufValue]> {
        match &self.data {
            ArrayData::Materialized { values, .. } => Some(values),
            ArrayData::Skipped { .. } => None,
        }
    }

    /// All elements converted to `T`; `None` if skipped or any element does
    /// not convert.
    pub fn numeric_values<T: NumCast>(&self) -> Option<Vec<T>> {
        self.values()?.iter().map(GgufValue::to_numeric).collect()
    }

    /// All elements as strings; `None` if skipped or not a string array.
    pub fn strings(&self) -> Option<Vec<&str>> {
        self.values()?.iter().map(GgufValue::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_numeric_widens_and_narrows_checked() {
        assert_eq!(GgufValue::Uint8(200).to_numeric::<u64>(), Some(200));
        assert_eq!(GgufValue::Int32(-1).to_numeric::<i64>(), Some(-1));
        assert_eq!(GgufValue::Int32(-1).to_numeric::<u32>(), None);
        assert_eq!(GgufValue::Uint64(u64::MAX).to_numeric::<u32>(), None);
        assert_eq!(GgufValue::Uint32(4096).to_numeric::<f32>(), Some(4096.0));
        assert_eq!(GgufValue::Float32(2.75).to_numeric::<u32>(), Some(2));
        assert_eq!(GgufValue::Float64(f64::NAN).to_numeric::<i32>(), None);
    }

    #[test]
    fn non_numeric_values_do_not_coerce() {
        assert_eq!(GgufValue::Bool(true).to_numeric::<u8>(), None);
        assert_eq!(GgufValue::String("32".into()).to_numeric::<u32>(), None);
    }

    #[test]
    fn skipped_array_reports_len_but_no_values() {
        let a = GgufArray::skipped(GgufValueType::String, 150_000, 2_000_000);
        assert_eq!(a.len(), 150_000);
        assert_eq!(a.size(), 2_000_000);
        assert!(a.is_skipped());
        assert!(a.values().is_none());
        assert!(a.strings().is_none());
    }

    #[test]
    fn numeric_values_fails_on_any_bad_element() {
        let good = GgufArray::materialized(
            GgufValueType::Int32,
            vec![GgufValue::Int32(8), GgufValue::Int32(0)],
            8,
        );
        assert_eq!(good.numeric_values::<u64>(), Some(vec![8, 0]));

        let bad = GgufArray::materialized(
            GgufValueType::Int32,
            vec![GgufValue::Int32(8), GgufValue::Int32(-3)],
            8,
        );
        assert_eq!(bad.numeric_values::<u64>(), None);
    }

    #[test]
    fn scalar_sizes_match_wire_widths() {
        assert_eq!(GgufValueType::Bool.scalar_size(), Some(1));
        assert_eq!(GgufValueType::Float32.scalar_size(), Some(4));
        assert_eq!(GgufValueType::Int64.scalar_size(), Some(8));
        assert_eq!(GgufValueType::String.scalar_size(), None);
        assert_eq!(GgufValueType::from_u32(13), None);
    }
}
