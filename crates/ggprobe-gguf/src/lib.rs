//! GGUF container decoder.
//!
//! Reads the header, the metadata key-values and the tensor index of a GGUF
//! file without touching tensor payloads. Sources can be memory-mapped or
//! buffered local files, in-memory bytes, or (with the `remote` feature) a
//! URL read through HTTP range requests.
//!
//! Interpreting the metadata (architecture, tokenizer, file type) lives in
//! `ggprobe-models`; memory estimation lives in `ggprobe-estimate`.
//!
//! # Example
//!
//! ```no_run
//! use ggprobe_gguf::{ParseOptions, parse_file};
//!
//! let file = parse_file("model.gguf", &ParseOptions::default())?;
//! println!("GGUF v{}: {} tensors", file.version(), file.tensor_infos.len());
//! if let Some(arch) = file.metadata().get_string("general.architecture") {
//!     println!("architecture: {arch}");
//! }
//! # Ok::<(), ggprobe_gguf::GgufError>(())
//! ```

mod decoder;
pub mod error;
pub mod file;
pub mod ggml;
pub mod kv;
pub mod options;
#[cfg(feature = "remote")]
pub mod remote;
pub mod source;
pub mod tensor;
pub mod value;

pub use decoder::MAX_STRING_LEN;
pub use error::{GgufError, Result};
pub use file::{ByteOrder, GgufFile, GgufHeader, parse_bytes, parse_file, parse_source};
pub use ggml::{GgmlType, GgmlTypeTraits};
pub use kv::{GgufKv, MetadataKv};
pub use options::ParseOptions;
#[cfg(feature = "remote")]
pub use remote::{RemoteSource, parse_remote};
pub use source::{ByteSource, FileSource, MmapSource, SliceSource};
pub use tensor::TensorInfo;
pub use value::{ArrayData, GgufArray, GgufValue, GgufValueType};

/// Magic of little-endian files (and of big-endian files written with a
/// byte-swapped version).
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
/// Magic of big-endian files that store the magic word itself in big-endian.
pub const GGUF_MAGIC_BE: [u8; 4] = *b"FUGG";
/// Minimum supported GGUF version.
pub const GGUF_VERSION_MIN: u32 = 1;
/// Maximum supported GGUF version (inclusive).
pub const GGUF_VERSION_MAX: u32 = 3;
/// Tensor-data alignment when `general.alignment` is absent.
pub const DEFAULT_ALIGNMENT: u64 = 32;
