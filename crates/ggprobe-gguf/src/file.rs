use crate::decoder::Decoder;
use crate::error::Result;
use crate::kv::MetadataKv;
use crate::options::ParseOptions;
use crate::source::{ByteSource, FileSource, MmapSource, SliceSource};
use crate::tensor::TensorInfo;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Byte order of every multi-byte field after the magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Decoded GGUF header together with the metadata section.
#[derive(Debug, Clone, PartialEq)]
pub struct GgufHeader {
    pub magic: [u8; 4],
    pub byte_order: ByteOrder,
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
    pub metadata: MetadataKv,
}

/// A fully decoded GGUF container, minus tensor payloads.
///
/// Immutable once returned; derived views borrow from it.
#[derive(Debug, Clone, PartialEq)]
pub struct GgufFile {
    pub header: GgufHeader,
    pub tensor_infos: Vec<TensorInfo>,
    /// Effective alignment of the tensor-data section.
    pub alignment: u64,
    /// Padding bytes between the tensor-info table and the data section.
    pub padding: u64,
    /// Absolute offset of the tensor-data section.
    pub tensor_data_start: u64,
    /// Size of the whole container in bytes.
    pub size: u64,
    /// Sum of every tensor's payload size.
    pub model_size: u64,
    pub model_parameters: u64,
    pub model_bits_per_weight: f64,
}

impl GgufFile {
    pub fn metadata(&self) -> &MetadataKv {
        &self.header.metadata
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn tensor(&self, name: &str) -> Option<&TensorInfo> {
        self.tensor_infos.iter().find(|t| t.name == name)
    }

    /// Absolute file offset of a tensor's payload.
    pub fn tensor_data_offset(&self, tensor: &TensorInfo) -> u64 {
        self.tensor_data_start + tensor.offset
    }
}

/// Decode a local file, memory-mapped or buffered per `options.use_mmap`.
pub fn parse_file(path: impl AsRef<Path>, options: &ParseOptions) -> Result<GgufFile> {
    options.validate()?;
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), mmap = options.use_mmap, "parsing GGUF file");
    if options.use_mmap {
        parse_source(&mut MmapSource::open(path)?, options)
    } else {
        parse_source(&mut FileSource::open(path)?, options)
    }
}

/// Decode an in-memory container.
pub fn parse_bytes<B: AsRef<[u8]> + Send>(bytes: B, options: &ParseOptions) -> Result<GgufFile> {
    parse_source(&mut SliceSource::new(bytes), options)
}

/// Decode from any [`ByteSource`].
pub fn parse_source(source: &mut dyn ByteSource, options: &ParseOptions) -> Result<GgufFile> {
    options.validate()?;
    Decoder::new(source, options).decode()
}
