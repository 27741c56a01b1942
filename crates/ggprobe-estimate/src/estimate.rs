use crate::config::RunConfig;
use crate::usage::DeviceUsage;
use serde::Serialize;

/// Memory needed to run one model under one [`RunConfig`].
///
/// Sub-models (multimodal projector, speculative drafter, adapters) keep
/// their own estimates; [`summarize`](Self::summarize) adds them per device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEstimate {
    /// `model`, `projector`, `adapter` or `imatrix`.
    pub kind: String,
    pub architecture: String,
    /// Effective (padded) context; 0 for models without a KV cache.
    pub context_size: u64,
    pub logical_batch_size: u64,
    pub physical_batch_size: u64,
    /// Blocks actually offloaded after clamping to the block count.
    pub offload_layers: u64,
    pub full_offloaded: bool,
    pub flash_attention: bool,
    pub embedding_only: bool,
    /// Whether the model can be spread over RPC devices.
    pub distributable: bool,
    /// Host first, then one entry per device.
    pub devices: Vec<DeviceUsage>,
    /// The configuration used, with `offload_layers` clamped.
    pub config: RunConfig,
    pub drafter: Option<Box<RunEstimate>>,
    pub projector: Option<Box<RunEstimate>>,
    pub adapters: Vec<RunEstimate>,
}

impl RunEstimate {
    pub fn with_drafter(mut self, drafter: RunEstimate) -> Self {
        self.drafter = Some(Box::new(drafter));
        self
    }

    pub fn with_projector(mut self, projector: RunEstimate) -> Self {
        self.projector = Some(Box::new(projector));
        self
    }

    pub fn with_adapters(mut self, adapters: impl IntoIterator<Item = RunEstimate>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    pub fn host(&self) -> &DeviceUsage {
        &self.devices[crate::placement::HOST]
    }

    /// This estimate followed by every attached sub-estimate, depth first.
    pub fn parts(&self) -> Vec<&RunEstimate> {
        let mut parts = vec![self];
        for sub in self.drafter.iter().chain(self.projector.iter()) {
            parts.extend(sub.parts());
        }
        for adapter in &self.adapters {
            parts.extend(adapter.parts());
        }
        parts
    }
}
