//! Per-device memory usage.

use serde::{Deserialize, Serialize};

/// Bytes of model weights held by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightUsage {
    /// Token and position embeddings and other non-block tensors.
    pub input: u64,
    /// Repeating blocks.
    pub compute: u64,
    /// Output norm and projection.
    pub output: u64,
}

impl WeightUsage {
    pub fn sum(&self) -> u64 {
        self.input.saturating_add(self.compute).saturating_add(self.output)
    }
}

/// Bytes of KV cache (or recurrent state) held by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCacheUsage {
    pub key: u64,
    pub value: u64,
}

impl KvCacheUsage {
    pub fn sum(&self) -> u64 {
        self.key.saturating_add(self.value)
    }
}

/// Bytes of compute buffers held by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationUsage {
    /// Graph metadata, scheduler and context overhead (host only).
    pub footprint: u64,
    /// Input tensors of the graph.
    pub input: u64,
    /// Largest per-block intermediate buffer.
    pub compute: u64,
    /// Logits (or embeddings) of the output layer.
    pub output: u64,
}

impl ComputationUsage {
    /// The compute and output buffers are reused, so only the larger counts.
    pub fn sum(&self) -> u64 {
        self.footprint.saturating_add(self.input).saturating_add(self.compute.max(self.output))
    }
}

/// Usage of one device. Index 0 of an estimate is always the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceUsage {
    /// Number of blocks this device runs.
    pub handle_layers: u64,
    /// Index of the last block it runs.
    pub handle_last_layer: Option<u64>,
    pub handle_output_layer: bool,
    /// Served over RPC.
    pub remote: bool,
    /// Position among the non-host devices; 0 for the host.
    pub position: usize,
    pub endpoint: Option<String>,
    pub weight: WeightUsage,
    pub kv_cache: KvCacheUsage,
    pub computation: ComputationUsage,
}

impl DeviceUsage {
    pub fn host() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.weight.sum().saturating_add(self.kv_cache.sum()).saturating_add(self.computation.sum())
    }

    pub(crate) fn handle_block(&mut self, block: u64) {
        self.handle_layers += 1;
        self.handle_last_layer = Some(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_and_output_share_a_buffer() {
        let c = ComputationUsage { footprint: 10, input: 5, compute: 100, output: 40 };
        assert_eq!(c.sum(), 115);
        let c = ComputationUsage { output: 400, ..c };
        assert_eq!(c.sum(), 415);
    }

    #[test]
    fn device_total() {
        let d = DeviceUsage {
            weight: WeightUsage { input: 1, compute: 2, output: 3 },
            kv_cache: KvCacheUsage { key: 4, value: 5 },
            computation: ComputationUsage { footprint: 6, input: 7, compute: 8, output: 0 },
            ..DeviceUsage::host()
        };
        assert_eq!(d.total(), 6 + 9 + 21);
    }
}
