//! Model-level views over a decoded GGUF container.
//!
//! Everything here is derived from an immutable [`GgufFile`] and never fails:
//! missing keys resolve to the defaults llama.cpp assumes, or to sentinel
//! values documented on each field.
//!
//! ```no_run
//! use ggprobe_gguf::{ParseOptions, parse_file};
//! use ggprobe_models::{GgufArchitecture, GgufModelExt};
//!
//! let file = parse_file("model.gguf", &ParseOptions::default())?;
//! let meta = file.model_metadata();
//! println!("{} {} ({})", meta.architecture, meta.parameters_label(), meta.file_type);
//! if let GgufArchitecture::Transformer(t) = file.architecture() {
//!     println!("{} blocks, {} KV heads", t.block_count, t.attention_head_count_kv);
//! }
//! # Ok::<(), ggprobe_gguf::GgufError>(())
//! ```

pub mod architecture;
pub mod file_type;
pub mod layers;
pub mod metadata;
pub mod tokenizer;

pub use architecture::{
    AdapterArchitecture, ClipArchitecture, ClipEncoder, DiffusionArchitecture, DiffusionComponent,
    GgufArchitecture, ImatrixArchitecture, MAX_BLOCK_COUNT, TransformerArchitecture,
    TransformerFamily,
};
pub use file_type::{GgufFileType, classify_histogram, guess_file_type};
pub use layers::LayerGroups;
pub use metadata::GgufMetadata;
pub use tokenizer::GgufTokenizer;

use ggprobe_gguf::GgufFile;

/// Derived views of a [`GgufFile`].
///
/// Each call recomputes its view from the file.
pub trait GgufModelExt {
    /// Descriptive fields and model totals.
    fn model_metadata(&self) -> GgufMetadata;
    fn architecture(&self) -> GgufArchitecture;
    fn tokenizer(&self) -> GgufTokenizer;
    /// Declared `general.file_type`, else a guess from the tensor types.
    fn file_type(&self) -> GgufFileType;
    fn layers(&self) -> LayerGroups<'_>;
}

impl GgufModelExt for GgufFile {
    fn model_metadata(&self) -> GgufMetadata {
        let arch = self.architecture();
        GgufMetadata::new(self, &arch, file_type_of(self, &arch))
    }

    fn architecture(&self) -> GgufArchitecture {
        GgufArchitecture::from_file(self)
    }

    fn tokenizer(&self) -> GgufTokenizer {
        GgufTokenizer::from_metadata(self.metadata())
    }

    fn file_type(&self) -> GgufFileType {
        file_type_of(self, &self.architecture())
    }

    fn layers(&self) -> LayerGroups<'_> {
        LayerGroups::from_tensors(&self.tensor_infos)
    }
}

fn file_type_of(file: &GgufFile, arch: &GgufArchitecture) -> GgufFileType {
    match file.metadata().get_numeric::<u32>("general.file_type") {
        Some(declared) => GgufFileType::from_declared(declared),
        None => guess_file_type(&file.tensor_infos, arch.is_diffusion()),
    }
}
