//! Sequential GGUF decoder.
//!
//! Layout: magic, version, tensor count, KV count, metadata records, tensor
//! records, padding to `general.alignment`, tensor data. Version 1 encodes
//! counts and lengths as u32; later versions use u64.

use crate::error::{GgufError, Result};
use crate::file::{ByteOrder, GgufFile, GgufHeader};
use crate::ggml::GgmlType;
use crate::kv::{GgufKv, MetadataKv};
use crate::options::ParseOptions;
use crate::source::{ByteSource, check_range};
use crate::tensor::{MAX_DIMS, TensorInfo};
use crate::value::{GgufArray, GgufValue, GgufValueType};
use crate::{DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_MAGIC_BE, GGUF_VERSION_MAX, GGUF_VERSION_MIN};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Strings longer than this are treated as corruption.
pub const MAX_STRING_LEN: u64 = 64 << 20;

macro_rules! read_num {
    ($name:ident, $ty:ty) => {
        fn $name(&mut self) -> Result<$ty> {
            let bytes = self.read_array_bytes::<{ std::mem::size_of::<$ty>() }>()?;
            Ok(match self.order {
                ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                ByteOrder::Big => <$ty>::from_be_bytes(bytes),
            })
        }
    };
}

pub(crate) struct Decoder<'a> {
    source: &'a mut dyn ByteSource,
    size: u64,
    pos: u64,
    order: ByteOrder,
    version: u32,
    skip_threshold: Option<u64>,
    approximate: bool,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(source: &'a mut dyn ByteSource, options: &ParseOptions) -> Self {
        let size = source.size();
        Self {
            source,
            size,
            pos: 0,
            order: ByteOrder::Little,
            version: GGUF_VERSION_MAX,
            skip_threshold: options.skip_threshold(),
            approximate: options.approximate,
            cancel: options.cancel.clone(),
            deadline: options.deadline.map(|d| Instant::now() + d),
        }
    }

    pub(crate) fn decode(mut self) -> Result<GgufFile> {
        debug!(size = self.size, "decoding GGUF");
        let (magic, order, version) = self.read_preamble()?;
        self.order = order;
        self.version = version;

        let tensor_count = self.read_len()?;
        let metadata_kv_count = self.read_len()?;
        trace!(version, tensor_count, metadata_kv_count, ?order, "GGUF header");

        let mut metadata = MetadataKv::new();
        for _ in 0..metadata_kv_count {
            self.check_cancelled()?;
            metadata.insert(self.read_kv()?)?;
        }

        let mut tensor_infos = Vec::with_capacity(tensor_count.min(1 << 16) as usize);
        for _ in 0..tensor_count {
            self.check_cancelled()?;
            tensor_infos.push(self.read_tensor_info()?);
        }

        let alignment = match metadata.get_numeric::<u64>("general.alignment") {
            None => DEFAULT_ALIGNMENT,
            Some(a) if a.is_power_of_two() => a,
            Some(a) => {
                warn!(alignment = a, "general.alignment is not a power of two, using default");
                DEFAULT_ALIGNMENT
            }
        };
        let padding = (alignment - self.pos % alignment) % alignment;
        let tensor_data_start = self.pos + padding;

        let model_size =
            tensor_infos.iter().map(TensorInfo::bytes).fold(0u64, u64::saturating_add);
        let model_parameters =
            tensor_infos.iter().map(TensorInfo::elements).fold(0u64, u64::saturating_add);
        let model_bits_per_weight = if model_parameters == 0 {
            0.0
        } else {
            model_size as f64 * 8.0 / model_parameters as f64
        };

        debug!(
            kvs = metadata.len(),
            tensors = tensor_infos.len(),
            tensor_data_start,
            "decoded GGUF"
        );
        Ok(GgufFile {
            header: GgufHeader {
                magic,
                byte_order: order,
                version,
                tensor_count,
                metadata_kv_count,
                metadata,
            },
            tensor_infos,
            alignment,
            padding,
            tensor_data_start,
            size: self.size,
            model_size,
            model_parameters,
            model_bits_per_weight,
        })
    }

    /// Magic and version. Big-endian files either spell the magic backwards
    /// or keep `GGUF` and byte-swap the version.
    fn read_preamble(&mut self) -> Result<([u8; 4], ByteOrder, u32)> {
        let magic = self.read_array_bytes::<4>()?;
        let raw_version = self.read_array_bytes::<4>()?;
        let supported = |v: u32| (GGUF_VERSION_MIN..=GGUF_VERSION_MAX).contains(&v);

        let (order, version) = if magic == GGUF_MAGIC {
            let le = u32::from_le_bytes(raw_version);
            let be = u32::from_be_bytes(raw_version);
            if !supported(le) && supported(be) {
                (ByteOrder::Big, be)
            } else {
                (ByteOrder::Little, le)
            }
        } else if magic == GGUF_MAGIC_BE {
            (ByteOrder::Big, u32::from_be_bytes(raw_version))
        } else {
            return Err(GgufError::BadMagic(magic));
        };

        if !supported(version) {
            return Err(GgufError::UnsupportedVersion(version));
        }
        Ok((magic, order, version))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(GgufError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(GgufError::Cancelled);
        }
        Ok(())
    }

    // ── Primitive reads ────────────────────────────────────────────────

    fn read_array_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.source.read_exact_at(self.pos, &mut buf)?;
        self.pos += N as u64;
        Ok(buf)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        check_range(self.pos, n, self.size)?;
        self.pos += n;
        Ok(())
    }

    read_num!(read_u8, u8);
    read_num!(read_i8, i8);
    read_num!(read_u16, u16);
    read_num!(read_i16, i16);
    read_num!(read_u32, u32);
    read_num!(read_i32, i32);
    read_num!(read_u64, u64);
    read_num!(read_i64, i64);
    read_num!(read_f32, f32);
    read_num!(read_f64, f64);

    /// Count or length prefix; 32-bit in version 1.
    fn read_len(&mut self) -> Result<u64> {
        if self.version == 1 { self.read_u32().map(u64::from) } else { self.read_u64() }
    }

    fn read_string_len(&mut self) -> Result<u64> {
        let len = self.read_len()?;
        if len > MAX_STRING_LEN {
            return Err(GgufError::StringTooLarge(len));
        }
        check_range(self.pos, len, self.size)?;
        Ok(len)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_string_len()?;
        let bytes = self.source.read(self.pos, len as usize)?;
        self.pos += len;
        match String::from_utf8(bytes) {
            Ok(s) => Ok(s),
            Err(e) => {
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                warn!(offset = self.pos - len, "invalid UTF-8 in string, decoded lossily");
                Ok(lossy)
            }
        }
    }

    /// Advance past a string, returning the bytes consumed including the prefix.
    fn skip_string(&mut self) -> Result<u64> {
        let start = self.pos;
        let len = self.read_string_len()?;
        self.skip(len)?;
        Ok(self.pos - start)
    }

    // ── Values ─────────────────────────────────────────────────────────

    fn read_value_type(&mut self) -> Result<GgufValueType> {
        let tag = self.read_u32()?;
        GgufValueType::from_u32(tag).ok_or(GgufError::UnsupportedValueType(tag))
    }

    fn read_value(&mut self, ty: GgufValueType) -> Result<GgufValue> {
        Ok(match ty {
            GgufValueType::Uint8 => GgufValue::Uint8(self.read_u8()?),
            GgufValueType::Int8 => GgufValue::Int8(self.read_i8()?),
            GgufValueType::Uint16 => GgufValue::Uint16(self.read_u16()?),
            GgufValueType::Int16 => GgufValue::Int16(self.read_i16()?),
            GgufValueType::Uint32 => GgufValue::Uint32(self.read_u32()?),
            GgufValueType::Int32 => GgufValue::Int32(self.read_i32()?),
            GgufValueType::Float32 => GgufValue::Float32(self.read_f32()?),
            GgufValueType::Bool => GgufValue::Bool(self.read_u8()? != 0),
            GgufValueType::String => GgufValue::String(self.read_string()?),
            GgufValueType::Array => GgufValue::Array(self.read_array()?),
            GgufValueType::Uint64 => GgufValue::Uint64(self.read_u64()?),
            GgufValueType::Int64 => GgufValue::Int64(self.read_i64()?),
            GgufValueType::Float64 => GgufValue::Float64(self.read_f64()?),
        })
    }

    fn exceeds_threshold(&self, size: u64) -> bool {
        self.skip_threshold.is_some_and(|t| size > t)
    }

    fn read_array(&mut self) -> Result<GgufArray> {
        let elem_type = self.read_value_type()?;
        let len = self.read_len()?;
        let start = self.pos;

        if let Some(width) = elem_type.scalar_size() {
            let size = len
                .checked_mul(width)
                .ok_or_else(|| GgufError::malformed(format!("array length {len} overflows")))?;
            check_range(self.pos, size, self.size)?;
            if self.exceeds_threshold(size) {
                self.skip(size)?;
                trace!(len, size, ?elem_type, "skipped large array");
                return Ok(GgufArray::skipped(elem_type, len, size));
            }
            let mut values = Vec::with_capacity(len as usize);
            for _ in 0..len {
                values.push(self.read_value(elem_type)?);
            }
            return Ok(GgufArray::materialized(elem_type, values, size));
        }

        if elem_type == GgufValueType::String {
            // Decided while streaming: keep elements until the running size
            // passes the threshold, then only advance.
            let mut kept = Some(Vec::with_capacity(len.min(1 << 16) as usize));
            for _ in 0..len {
                match kept.as_mut() {
                    Some(values) => {
                        values.push(GgufValue::String(self.read_string()?));
                        if self.exceeds_threshold(self.pos - start) {
                            kept = None;
                        }
                    }
                    None => {
                        self.skip_string()?;
                    }
                }
            }
            let size = self.pos - start;
            return Ok(match kept {
                Some(values) => GgufArray::materialized(elem_type, values, size),
                None => {
                    trace!(len, size, "skipped large string array");
                    GgufArray::skipped(elem_type, len, size)
                }
            });
        }

        // Nested arrays: each inner array decides for itself.
        let mut values = Vec::with_capacity(len.min(1 << 16) as usize);
        for _ in 0..len {
            values.push(GgufValue::Array(self.read_array()?));
        }
        Ok(GgufArray::materialized(elem_type, values, self.pos - start))
    }

    fn read_kv(&mut self) -> Result<GgufKv> {
        let key = self.read_string()?;
        let ty = self.read_value_type()?;
        let value = self.read_value(ty)?;
        trace!(key = %key, ?ty, "metadata record");
        Ok(GgufKv { key, value })
    }

    fn read_tensor_info(&mut self) -> Result<TensorInfo> {
        let name = self.read_string()?;
        let n_dims = self.read_u32()?;
        if n_dims > MAX_DIMS {
            return Err(GgufError::malformed(format!(
                "tensor {name:?} declares {n_dims} dimensions (max {MAX_DIMS})"
            )));
        }
        let mut dims = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            dims.push(self.read_len()?);
        }
        if dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d)).is_none() {
            return Err(GgufError::malformed(format!(
                "tensor {name:?} element count overflows: {dims:?}"
            )));
        }
        let tag = self.read_u32()?;
        let ggml_type = match GgmlType::from_tag(tag) {
            Some(t) => t,
            None if self.approximate => {
                warn!(tensor = %name, tag, "unknown tensor type, counted as zero bytes");
                GgmlType::Unknown(tag)
            }
            None => return Err(GgufError::UnsupportedTensorType { name, tag }),
        };
        let offset = self.read_u64()?;
        trace!(tensor = %name, ?dims, %ggml_type, offset, "tensor record");
        Ok(TensorInfo { name, dims, ggml_type, offset })
    }
}
