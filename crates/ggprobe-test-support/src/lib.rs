//! In-memory GGUF writer for tests.
//!
//! Writes the header, metadata and tensor index of a GGUF container, then the
//! padding up to the tensor-data section. Tensor payloads are never written;
//! nothing in the workspace reads them.
//!
//! ```
//! use ggprobe_test_support::{GgufBuilder, ggml};
//!
//! let bytes = GgufBuilder::new()
//!     .kv_str("general.architecture", "llama")
//!     .kv_u32("llama.block_count", 2)
//!     .tensor("blk.0.attn_q.weight", &[64, 64], ggml::Q8_0)
//!     .build();
//! assert_eq!(&bytes[..4], b"GGUF");
//! ```

use std::io::Write;

/// GGML tensor type tags.
pub mod ggml {
    pub const F32: u32 = 0;
    pub const F16: u32 = 1;
    pub const Q4_0: u32 = 2;
    pub const Q4_1: u32 = 3;
    pub const Q5_0: u32 = 6;
    pub const Q5_1: u32 = 7;
    pub const Q8_0: u32 = 8;
    pub const Q2_K: u32 = 10;
    pub const Q3_K: u32 = 11;
    pub const Q4_K: u32 = 12;
    pub const Q5_K: u32 = 13;
    pub const Q6_K: u32 = 14;
    pub const IQ4_XS: u32 = 23;
    pub const BF16: u32 = 30;
    pub const MXFP4: u32 = 39;
}

/// Metadata value type tags.
pub mod tag {
    pub const UINT8: u32 = 0;
    pub const INT8: u32 = 1;
    pub const UINT16: u32 = 2;
    pub const INT16: u32 = 3;
    pub const UINT32: u32 = 4;
    pub const INT32: u32 = 5;
    pub const FLOAT32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const UINT64: u32 = 10;
    pub const INT64: u32 = 11;
    pub const FLOAT64: u32 = 12;
}

/// A metadata value to encode.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    Str(String),
    U64(u64),
    I64(i64),
    F64(f64),
    /// Element tag and elements; elements must match the tag.
    Array(u32, Vec<Value>),
    /// Arbitrary tag followed by raw payload bytes.
    Raw(u32, Vec<u8>),
}

impl Value {
    fn tag(&self) -> u32 {
        match self {
            Self::U8(_) => tag::UINT8,
            Self::I8(_) => tag::INT8,
            Self::U16(_) => tag::UINT16,
            Self::I16(_) => tag::INT16,
            Self::U32(_) => tag::UINT32,
            Self::I32(_) => tag::INT32,
            Self::F32(_) => tag::FLOAT32,
            Self::Bool(_) => tag::BOOL,
            Self::Str(_) => tag::STRING,
            Self::U64(_) => tag::UINT64,
            Self::I64(_) => tag::INT64,
            Self::F64(_) => tag::FLOAT64,
            Self::Array(..) => tag::ARRAY,
            Self::Raw(t, _) => *t,
        }
    }
}

/// Layout of the magic and multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    /// Magic written as `FUGG`, fields big-endian.
    Big,
    /// Magic kept as `GGUF`, fields (including the version) big-endian.
    BigWithLittleMagic,
}

#[derive(Debug, Clone)]
struct TensorSpec {
    name: String,
    dims: Vec<u64>,
    ggml_type: u32,
}

#[derive(Debug, Clone)]
pub struct GgufBuilder {
    version: u32,
    endian: Endian,
    kvs: Vec<(String, Value)>,
    tensors: Vec<TensorSpec>,
}

impl Default for GgufBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GgufBuilder {
    pub fn new() -> Self {
        Self { version: 3, endian: Endian::Little, kvs: Vec::new(), tensors: Vec::new() }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn kv(mut self, key: &str, value: Value) -> Self {
        self.kvs.push((key.to_owned(), value));
        self
    }

    pub fn kv_u32(self, key: &str, v: u32) -> Self {
        self.kv(key, Value::U32(v))
    }

    pub fn kv_u64(self, key: &str, v: u64) -> Self {
        self.kv(key, Value::U64(v))
    }

    pub fn kv_i32(self, key: &str, v: i32) -> Self {
        self.kv(key, Value::I32(v))
    }

    pub fn kv_f32(self, key: &str, v: f32) -> Self {
        self.kv(key, Value::F32(v))
    }

    pub fn kv_bool(self, key: &str, v: bool) -> Self {
        self.kv(key, Value::Bool(v))
    }

    pub fn kv_str(self, key: &str, v: &str) -> Self {
        self.kv(key, Value::Str(v.to_owned()))
    }

    pub fn kv_u32_array(self, key: &str, vs: &[u32]) -> Self {
        self.kv(key, Value::Array(tag::UINT32, vs.iter().copied().map(Value::U32).collect()))
    }

    pub fn kv_i32_array(self, key: &str, vs: &[i32]) -> Self {
        self.kv(key, Value::Array(tag::INT32, vs.iter().copied().map(Value::I32).collect()))
    }

    pub fn kv_f32_array(self, key: &str, vs: &[f32]) -> Self {
        self.kv(key, Value::Array(tag::FLOAT32, vs.iter().copied().map(Value::F32).collect()))
    }

    pub fn kv_str_array<S: AsRef<str>>(self, key: &str, vs: &[S]) -> Self {
        let values = vs.iter().map(|s| Value::Str(s.as_ref().to_owned())).collect();
        self.kv(key, Value::Array(tag::STRING, values))
    }

    pub fn tensor(mut self, name: &str, dims: &[u64], ggml_type: u32) -> Self {
        self.tensors.push(TensorSpec { name: name.to_owned(), dims: dims.to_vec(), ggml_type });
        self
    }

    /// Alignment the container declares, or the GGUF default of 32.
    pub fn alignment(&self) -> u64 {
        self.kvs
            .iter()
            .find(|(k, _)| k == "general.alignment")
            .and_then(|(_, v)| match v {
                Value::U32(a) => Some(u64::from(*a)),
                Value::U64(a) => Some(*a),
                _ => None,
            })
            .filter(|a| a.is_power_of_two())
            .unwrap_or(32)
    }

    /// Header, metadata and tensor index without the trailing padding.
    pub fn build_unpadded(&self) -> Vec<u8> {
        let mut w = Writer { out: Vec::new(), endian: self.endian, version: self.version };
        w.magic();
        w.u32(self.version);
        w.len(self.tensors.len() as u64);
        w.len(self.kvs.len() as u64);
        for (key, value) in &self.kvs {
            w.string(key);
            w.u32(value.tag());
            w.value(value);
        }
        let align = self.alignment();
        let mut offset = 0u64;
        for t in &self.tensors {
            w.string(&t.name);
            w.u32(t.dims.len() as u32);
            for &d in &t.dims {
                w.len(d);
            }
            w.u32(t.ggml_type);
            w.u64(offset);
            offset += align;
        }
        w.out
    }

    /// Complete container up to the start of the tensor-data section.
    pub fn build(&self) -> Vec<u8> {
        let mut out = self.build_unpadded();
        let align = self.alignment() as usize;
        let pad = (align - out.len() % align) % align;
        out.resize(out.len() + pad, 0);
        out
    }

    /// Write [`build`](Self::build) output to a temporary `.gguf` file.
    pub fn write_temp(&self) -> std::io::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile()?;
        file.write_all(&self.build())?;
        file.flush()?;
        Ok(file)
    }
}

struct Writer {
    out: Vec<u8>,
    endian: Endian,
    version: u32,
}

macro_rules! put {
    ($name:ident, $ty:ty) => {
        fn $name(&mut self, v: $ty) {
            match self.endian {
                Endian::Little => self.out.extend_from_slice(&v.to_le_bytes()),
                Endian::Big | Endian::BigWithLittleMagic => {
                    self.out.extend_from_slice(&v.to_be_bytes())
                }
            }
        }
    };
}

impl Writer {
    put!(u16, u16);
    put!(i16, i16);
    put!(u32, u32);
    put!(i32, i32);
    put!(u64, u64);
    put!(i64, i64);
    put!(f32, f32);
    put!(f64, f64);

    fn magic(&mut self) {
        match self.endian {
            Endian::Big => self.out.extend_from_slice(b"FUGG"),
            Endian::Little | Endian::BigWithLittleMagic => self.out.extend_from_slice(b"GGUF"),
        }
    }

    fn len(&mut self, n: u64) {
        if self.version == 1 { self.u32(n as u32) } else { self.u64(n) }
    }

    fn string(&mut self, s: &str) {
        self.len(s.len() as u64);
        self.out.extend_from_slice(s.as_bytes());
    }

    fn value(&mut self, value: &Value) {
        match value {
            Value::U8(v) => self.out.push(*v),
            Value::I8(v) => self.out.push(*v as u8),
            Value::U16(v) => self.u16(*v),
            Value::I16(v) => self.i16(*v),
            Value::U32(v) => self.u32(*v),
            Value::I32(v) => self.i32(*v),
            Value::F32(v) => self.f32(*v),
            Value::Bool(v) => self.out.push(u8::from(*v)),
            Value::Str(s) => self.string(s),
            Value::U64(v) => self.u64(*v),
            Value::I64(v) => self.i64(*v),
            Value::F64(v) => self.f64(*v),
            Value::Array(elem, items) => {
                self.u32(*elem);
                self.len(items.len() as u64);
                // Nested arrays write their own element tag and length.
                for item in items {
                    self.value(item);
                }
            }
            Value::Raw(_, bytes) => self.out.extend_from_slice(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_container_is_padded_header() {
        let bytes = GgufBuilder::new().build();
        // magic + version + two u64 counts = 24, padded to 32.
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], b"GGUF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);
    }

    #[test]
    fn version_one_uses_narrow_counts() {
        let bytes = GgufBuilder::new().version(1).build_unpadded();
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn big_endian_magic_variants() {
        let be = GgufBuilder::new().endian(Endian::Big).build();
        assert_eq!(&be[..4], b"FUGG");
        assert_eq!(&be[4..8], &3u32.to_be_bytes());
        let swapped = GgufBuilder::new().endian(Endian::BigWithLittleMagic).build();
        assert_eq!(&swapped[..4], b"GGUF");
        assert_eq!(&swapped[4..8], &3u32.to_be_bytes());
    }
}
