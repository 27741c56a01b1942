//! Normalized architecture views.
//!
//! [`GgufArchitecture::from_file`] is the single dispatch point: diffusion
//! checkpoints are recognised by tensor names, then projector, adapter and
//! importance-matrix files by their `general.*` keys, and everything else
//! is read as a transformer keyed by `general.architecture`.

mod adapter;
mod clip;
mod diffusion;
mod overrides;
mod transformer;

pub use adapter::{AdapterArchitecture, ImatrixArchitecture};
pub use clip::{ClipArchitecture, ClipEncoder};
pub use diffusion::{DiffusionArchitecture, DiffusionComponent, detect_diffusion};
pub use overrides::{HYBRID_ARCHITECTURES, RECURRENT_ARCHITECTURES, SlidingWindowOverride};
pub use transformer::{TransformerArchitecture, TransformerFamily};

use ggprobe_gguf::{GgufFile, MetadataKv};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Architecture name used when `general.architecture` is absent.
pub const DEFAULT_ARCHITECTURE: &str = "llama";

/// Largest block count a view keeps; larger declarations are clamped to it.
pub const MAX_BLOCK_COUNT: u64 = 1 << 16;

/// One normalized architecture per file, tagged by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum GgufArchitecture {
    Transformer(TransformerArchitecture),
    Projector(ClipArchitecture),
    Adapter(AdapterArchitecture),
    ImportanceMatrix(ImatrixArchitecture),
    Diffusion(DiffusionArchitecture),
}

impl GgufArchitecture {
    pub fn from_file(file: &GgufFile) -> Self {
        if let Some(diffusion) = detect_diffusion(&file.tensor_infos) {
            return Self::Diffusion(diffusion);
        }

        let kv = file.metadata();
        let arch = kv.get_string("general.architecture").unwrap_or(DEFAULT_ARCHITECTURE);
        let kind = kv.get_string("general.type").unwrap_or("model");
        match (arch, kind) {
            ("clip", _) => Self::Projector(ClipArchitecture::from_metadata(kv)),
            ("controlvector", _) | (_, "adapter") => {
                Self::Adapter(AdapterArchitecture::from_file(file))
            }
            (_, "imatrix") => Self::ImportanceMatrix(ImatrixArchitecture::from_metadata(kv)),
            _ => Self::Transformer(TransformerArchitecture::from_file(file, arch)),
        }
    }

    /// Architecture name, e.g. `llama`, `clip`, `Stable Diffusion XL`.
    pub fn name(&self) -> &str {
        match self {
            Self::Transformer(t) => &t.architecture,
            Self::Projector(c) => &c.architecture,
            Self::Adapter(a) => &a.architecture,
            Self::ImportanceMatrix(m) => &m.architecture,
            Self::Diffusion(d) => &d.architecture,
        }
    }

    /// The `general.type` this family corresponds to.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transformer(_) | Self::Diffusion(_) => "model",
            Self::Projector(_) => "projector",
            Self::Adapter(_) => "adapter",
            Self::ImportanceMatrix(_) => "imatrix",
        }
    }

    pub fn as_transformer(&self) -> Option<&TransformerArchitecture> {
        match self {
            Self::Transformer(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_projector(&self) -> Option<&ClipArchitecture> {
        match self {
            Self::Projector(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_diffusion(&self) -> bool {
        matches!(self, Self::Diffusion(_))
    }
}

/// Reads `<prefix>.<suffix>` keys.
pub(crate) struct Keys<'a> {
    kv: &'a MetadataKv,
    prefix: &'a str,
}

impl<'a> Keys<'a> {
    pub(crate) fn new(kv: &'a MetadataKv, prefix: &'a str) -> Self {
        Self { kv, prefix }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.prefix)
    }

    pub(crate) fn num<T: NumCast>(&self, suffix: &str) -> Option<T> {
        self.kv.get_numeric(&self.key(suffix))
    }

    pub(crate) fn num_or<T: NumCast>(&self, suffix: &str, default: T) -> T {
        self.num(suffix).unwrap_or(default)
    }

    pub(crate) fn boolean(&self, suffix: &str) -> Option<bool> {
        self.kv.get_bool(&self.key(suffix))
    }

    pub(crate) fn string(&self, suffix: &str) -> Option<&'a str> {
        self.kv.get_string(&self.key(suffix))
    }

    /// `<prefix>.block_count`, clamped to [`MAX_BLOCK_COUNT`].
    pub(crate) fn block_count(&self) -> Option<u64> {
        let declared = self.num::<u64>("block_count")?;
        if declared > MAX_BLOCK_COUNT {
            warn!(prefix = self.prefix, declared, max = MAX_BLOCK_COUNT, "block count clamped");
        }
        Some(declared.min(MAX_BLOCK_COUNT))
    }

    /// A key that may hold one value for every block or a per-block array.
    ///
    /// Scalars are repeated `blocks` times. Arrays are cut or padded with
    /// their last element to `blocks` entries. `None` when the key is absent
    /// or its array was skipped.
    pub(crate) fn per_block(&self, suffix: &str, blocks: usize) -> Option<Vec<u64>> {
        let value = self.kv.get(&self.key(suffix))?;
        if let Some(v) = value.to_numeric::<u64>() {
            return Some(vec![v; blocks]);
        }
        let mut values = value.as_array()?.numeric_values::<u64>()?;
        let last = values.last().copied().unwrap_or(0);
        values.resize(blocks, last);
        Some(values)
    }
}
