//! Run configuration, validated once when built.

use ggprobe_gguf::GgmlType;
use serde::Serialize;
use thiserror::Error;

/// How offloaded layers are spread over several devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Everything on the main device.
    None,
    /// Whole blocks per device, in tensor-split proportions.
    #[default]
    Layer,
    /// Every block's weights split across devices; KV cache and compute
    /// buffers stay on the main device.
    Row,
}

/// Element types llama.cpp accepts for the KV cache.
pub const CACHE_TYPES: [GgmlType; 9] = [
    GgmlType::F32,
    GgmlType::F16,
    GgmlType::BF16,
    GgmlType::Q8_0,
    GgmlType::Q4_0,
    GgmlType::Q4_1,
    GgmlType::IQ4_NL,
    GgmlType::Q5_0,
    GgmlType::Q5_1,
];

/// Largest context (and batch) size a configuration accepts.
pub const MAX_CONTEXT_SIZE: u64 = 1 << 26;
/// Largest number of parallel sequences a configuration accepts.
pub const MAX_PARALLEL_SIZE: u64 = 1 << 16;
/// Largest image side, in pixels, a configuration accepts.
pub const MAX_IMAGE_SIZE: u64 = 1 << 16;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be at least 1")]
    ZeroSize { name: &'static str },
    #[error("{name} {value} exceeds the maximum of {max}")]
    TooLarge { name: &'static str, value: u64, max: u64 },
    #[error("tensor split must be non-decreasing within [0, 1] and end at 1, got {0:?}")]
    InvalidTensorSplit(Vec<f64>),
    #[error("tensor split proportions must be non-negative with a positive sum, got {0:?}")]
    InvalidProportions(Vec<f64>),
    #[error("main GPU index {index} is out of range for {devices} device(s)")]
    MainGpuOutOfRange { index: usize, devices: usize },
    #[error("{servers} RPC server(s) given for {devices} device(s)")]
    TooManyRpcServers { servers: usize, devices: usize },
    #[error("unsupported KV cache type {0}")]
    UnsupportedCacheType(GgmlType),
}

/// Parameters of one estimated run.
///
/// Built through [`RunConfig::builder`]; every value is valid by
/// construction. Defaults mirror llama.cpp's.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    context_size: Option<u64>,
    in_max_context_size: bool,
    logical_batch_size: u64,
    physical_batch_size: u64,
    parallel_size: u64,
    cache_key_type: GgmlType,
    cache_value_type: GgmlType,
    offload_kv_cache: bool,
    offload_layers: Option<u64>,
    split_mode: SplitMode,
    tensor_split_fraction: Vec<f64>,
    main_gpu_index: usize,
    flash_attention: bool,
    rpc_servers: Vec<String>,
    embedding_only: bool,
    max_image_size: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            context_size: None,
            in_max_context_size: false,
            logical_batch_size: 2048,
            physical_batch_size: 512,
            parallel_size: 1,
            cache_key_type: GgmlType::F16,
            cache_value_type: GgmlType::F16,
            offload_kv_cache: true,
            offload_layers: None,
            split_mode: SplitMode::Layer,
            tensor_split_fraction: vec![1.0],
            main_gpu_index: 0,
            flash_attention: false,
            rpc_servers: Vec::new(),
            embedding_only: false,
            max_image_size: None,
        }
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Requested context; `None` uses the model's trained maximum.
    pub fn context_size(&self) -> Option<u64> {
        self.context_size
    }

    /// Whether the context is clamped to the model's trained maximum.
    pub fn in_max_context_size(&self) -> bool {
        self.in_max_context_size
    }

    pub fn logical_batch_size(&self) -> u64 {
        self.logical_batch_size
    }

    /// Never larger than the logical batch size.
    pub fn physical_batch_size(&self) -> u64 {
        self.physical_batch_size
    }

    pub fn parallel_size(&self) -> u64 {
        self.parallel_size
    }

    pub fn cache_key_type(&self) -> GgmlType {
        self.cache_key_type
    }

    pub fn cache_value_type(&self) -> GgmlType {
        self.cache_value_type
    }

    pub fn offload_kv_cache(&self) -> bool {
        self.offload_kv_cache
    }

    /// Blocks to offload; `None` offloads all of them.
    pub fn offload_layers(&self) -> Option<u64> {
        self.offload_layers
    }

    pub fn split_mode(&self) -> SplitMode {
        self.split_mode
    }

    /// Cumulative share of each device, the last one being 1.
    pub fn tensor_split_fraction(&self) -> &[f64] {
        &self.tensor_split_fraction
    }

    pub fn main_gpu_index(&self) -> usize {
        self.main_gpu_index
    }

    pub fn flash_attention(&self) -> bool {
        self.flash_attention
    }

    /// Endpoints of the devices served over RPC, in device order.
    pub fn rpc_servers(&self) -> &[String] {
        &self.rpc_servers
    }

    pub fn embedding_only(&self) -> bool {
        self.embedding_only
    }

    /// Largest image side in pixels for projector estimates; `None` uses the
    /// projector's own image size.
    pub fn max_image_size(&self) -> Option<u64> {
        self.max_image_size
    }

    /// Number of non-host devices.
    pub fn device_count(&self) -> usize {
        self.tensor_split_fraction.len()
    }

    /// The same configuration with an already clamped offload count.
    pub(crate) fn with_offload_layers(&self, layers: u64) -> Self {
        Self { offload_layers: Some(layers), ..self.clone() }
    }
}

/// Fluent builder for [`RunConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
    proportions: Option<Vec<f64>>,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Context and batching ─────────────────────────────────────────────

    pub fn context_size(mut self, size: u64) -> Self {
        self.config.context_size = Some(size);
        self
    }

    pub fn in_max_context_size(mut self, clamp: bool) -> Self {
        self.config.in_max_context_size = clamp;
        self
    }

    pub fn logical_batch_size(mut self, size: u64) -> Self {
        self.config.logical_batch_size = size;
        self
    }

    pub fn physical_batch_size(mut self, size: u64) -> Self {
        self.config.physical_batch_size = size;
        self
    }

    pub fn parallel_size(mut self, size: u64) -> Self {
        self.config.parallel_size = size;
        self
    }

    // ── Cache ────────────────────────────────────────────────────────────

    pub fn cache_key_type(mut self, ty: GgmlType) -> Self {
        self.config.cache_key_type = ty;
        self
    }

    pub fn cache_value_type(mut self, ty: GgmlType) -> Self {
        self.config.cache_value_type = ty;
        self
    }

    pub fn offload_kv_cache(mut self, offload: bool) -> Self {
        self.config.offload_kv_cache = offload;
        self
    }

    // ── Devices ──────────────────────────────────────────────────────────

    pub fn offload_layers(mut self, layers: u64) -> Self {
        self.config.offload_layers = Some(layers);
        self
    }

    pub fn split_mode(mut self, mode: SplitMode) -> Self {
        self.config.split_mode = mode;
        self
    }

    /// Per-device proportions, e.g. `[3.0, 1.0]`; converted to cumulative
    /// fractions on build.
    pub fn tensor_split(mut self, proportions: &[f64]) -> Self {
        self.proportions = Some(proportions.to_vec());
        self
    }

    /// Cumulative fractions, e.g. `[0.75, 1.0]`, used as given.
    pub fn tensor_split_fraction(mut self, fractions: Vec<f64>) -> Self {
        self.proportions = None;
        self.config.tensor_split_fraction = fractions;
        self
    }

    pub fn main_gpu_index(mut self, index: usize) -> Self {
        self.config.main_gpu_index = index;
        self
    }

    pub fn rpc_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.rpc_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    // ── Features ─────────────────────────────────────────────────────────

    pub fn flash_attention(mut self, enabled: bool) -> Self {
        self.config.flash_attention = enabled;
        self
    }

    pub fn embedding_only(mut self, enabled: bool) -> Self {
        self.config.embedding_only = enabled;
        self
    }

    pub fn max_image_size(mut self, size: u64) -> Self {
        self.config.max_image_size = Some(size);
        self
    }

    // ── Build ────────────────────────────────────────────────────────────

    /// Validate and build; the physical batch is clamped to the logical one.
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let mut config = self.config;
        if let Some(proportions) = self.proportions {
            config.tensor_split_fraction = cumulative_fractions(&proportions)?;
        }

        for (name, value) in [
            ("logical batch size", config.logical_batch_size),
            ("physical batch size", config.physical_batch_size),
            ("parallel size", config.parallel_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSize { name });
            }
        }
        for (name, value, max) in [
            ("context size", config.context_size.unwrap_or(0), MAX_CONTEXT_SIZE),
            ("logical batch size", config.logical_batch_size, MAX_CONTEXT_SIZE),
            ("physical batch size", config.physical_batch_size, MAX_CONTEXT_SIZE),
            ("parallel size", config.parallel_size, MAX_PARALLEL_SIZE),
            ("max image size", config.max_image_size.unwrap_or(0), MAX_IMAGE_SIZE),
        ] {
            if value > max {
                return Err(ConfigError::TooLarge { name, value, max });
            }
        }
        config.physical_batch_size = config.physical_batch_size.min(config.logical_batch_size);

        let fractions = &config.tensor_split_fraction;
        let in_range = fractions.iter().all(|f| (0.0..=1.0).contains(f));
        let sorted = fractions.windows(2).all(|w| w[0] <= w[1]);
        if fractions.last() != Some(&1.0) || !in_range || !sorted {
            return Err(ConfigError::InvalidTensorSplit(fractions.clone()));
        }

        let devices = fractions.len();
        if config.main_gpu_index >= devices {
            return Err(ConfigError::MainGpuOutOfRange { index: config.main_gpu_index, devices });
        }
        if config.rpc_servers.len() > devices {
            return Err(ConfigError::TooManyRpcServers {
                servers: config.rpc_servers.len(),
                devices,
            });
        }
        for ty in [config.cache_key_type, config.cache_value_type] {
            if !CACHE_TYPES.contains(&ty) {
                return Err(ConfigError::UnsupportedCacheType(ty));
            }
        }
        Ok(config)
    }
}

fn cumulative_fractions(proportions: &[f64]) -> Result<Vec<f64>, ConfigError> {
    let total: f64 = proportions.iter().sum();
    if proportions.is_empty() || proportions.iter().any(|p| *p < 0.0) || total <= 0.0 {
        return Err(ConfigError::InvalidProportions(proportions.to_vec()));
    }
    let mut running = 0.0;
    let mut fractions: Vec<f64> = proportions
        .iter()
        .map(|p| {
            running += p;
            running / total
        })
        .collect();
    // Rounding may leave the last entry a hair off 1.
    if let Some(last) = fractions.last_mut() {
        *last = 1.0;
    }
    Ok(fractions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(RunConfig::builder().build().unwrap(), RunConfig::default());
    }

    #[test]
    fn proportions_become_cumulative() {
        let config = RunConfig::builder().tensor_split(&[3.0, 1.0]).build().unwrap();
        assert_eq!(config.tensor_split_fraction(), [0.75, 1.0]);
        assert_eq!(config.device_count(), 2);
    }

    #[test]
    fn physical_batch_is_clamped() {
        let config =
            RunConfig::builder().logical_batch_size(256).physical_batch_size(512).build().unwrap();
        assert_eq!(config.physical_batch_size(), 256);
    }

    #[test]
    fn sizes_are_bounded() {
        let err = RunConfig::builder().context_size(u64::MAX).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::TooLarge { name: "context size", value: u64::MAX, max: MAX_CONTEXT_SIZE }
        );
        let err = RunConfig::builder().parallel_size(MAX_PARALLEL_SIZE + 1).build().unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge { name: "parallel size", .. }));
        let err = RunConfig::builder().max_image_size(u64::MAX).build().unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge { name: "max image size", .. }));
        let config = RunConfig::builder()
            .context_size(MAX_CONTEXT_SIZE)
            .logical_batch_size(MAX_CONTEXT_SIZE)
            .parallel_size(MAX_PARALLEL_SIZE)
            .build()
            .unwrap();
        assert_eq!(config.context_size(), Some(MAX_CONTEXT_SIZE));
    }
}
