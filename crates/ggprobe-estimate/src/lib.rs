//! Memory estimates for running GGUF models the way llama.cpp runs them.
//!
//! An estimate is computed from the normalized architecture of a file and a
//! validated [`RunConfig`]. It reports, per device (the host first), the
//! model weights, the KV cache and the compute buffers a run needs.
//! [`RunEstimate::summarize`] reduces that to RAM and VRAM totals.
//!
//! ```no_run
//! use ggprobe_estimate::{EstimateRunExt, RunConfig};
//! use ggprobe_gguf::{ParseOptions, parse_file};
//!
//! let file = parse_file("model.gguf", &ParseOptions::default())?;
//! let config = RunConfig::builder().context_size(8192).offload_layers(20).build()?;
//! let summary = file.estimate_run(&config).summarize(true, 0, 0);
//! println!("RAM {} B, VRAM {:?}", summary.ram.non_uma, summary.vrams);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapter;
pub mod config;
pub mod estimate;
pub mod ggml_overhead;
mod placement;
pub mod projector;
pub mod summary;
pub mod transformer;
pub mod usage;

pub use adapter::{estimate_adapter, estimate_host_weights};
pub use config::{
    CACHE_TYPES, ConfigError, MAX_CONTEXT_SIZE, MAX_IMAGE_SIZE, MAX_PARALLEL_SIZE, RunConfig,
    RunConfigBuilder, SplitMode,
};
pub use estimate::RunEstimate;
pub use placement::HOST;
pub use projector::estimate_projector;
pub use summary::{MemoryUsage, RunSummary};
pub use transformer::{WeightLayout, effective_context, estimate_transformer};
pub use usage::{ComputationUsage, DeviceUsage, KvCacheUsage, WeightUsage};

use ggprobe_gguf::GgufFile;
use ggprobe_models::{GgufArchitecture, GgufModelExt};

/// Estimates straight from a decoded file.
pub trait EstimateRunExt {
    fn estimate_run(&self, config: &RunConfig) -> RunEstimate;
}

impl EstimateRunExt for GgufFile {
    fn estimate_run(&self, config: &RunConfig) -> RunEstimate {
        let layers = self.layers();
        match self.architecture() {
            GgufArchitecture::Transformer(arch) => {
                let weights = WeightLayout::from_layers(&layers, arch.block_count);
                estimate_transformer(&arch, &self.tokenizer(), &weights, config)
            }
            GgufArchitecture::Projector(clip) => estimate_projector(&clip, &layers, config),
            GgufArchitecture::Adapter(adapter) => {
                estimate_adapter(&adapter, &layers, layers.block_count() as u64, config)
            }
            GgufArchitecture::ImportanceMatrix(imatrix) => {
                estimate_host_weights("imatrix", &imatrix.architecture, &layers, config)
            }
            GgufArchitecture::Diffusion(diffusion) => {
                estimate_host_weights("model", &diffusion.architecture, &layers, config)
            }
        }
    }
}
