//! Estimates for files that carry weights but no runnable graph of their
//! own: LoRA adapters, control vectors, importance matrices and diffusion
//! checkpoints.

use crate::config::RunConfig;
use crate::estimate::RunEstimate;
use crate::ggml_overhead::tensor_overhead;
use crate::placement::{HOST, Placement};
use ggprobe_models::{AdapterArchitecture, LayerGroups};
use tracing::debug;

fn tensor_count(layers: &LayerGroups<'_>) -> u64 {
    (layers.input.len()
        + layers.output.len()
        + layers.others.len()
        + layers.blocks.iter().map(Vec::len).sum::<usize>()) as u64
}

fn bare_estimate(kind: &str, architecture: &str, config: &RunConfig) -> RunEstimate {
    RunEstimate {
        kind: kind.to_owned(),
        architecture: architecture.to_owned(),
        context_size: 0,
        logical_batch_size: config.logical_batch_size(),
        physical_batch_size: config.physical_batch_size(),
        offload_layers: 0,
        full_offloaded: false,
        flash_attention: config.flash_attention(),
        embedding_only: false,
        distributable: false,
        devices: Placement::devices(config),
        config: config.with_offload_layers(0),
        drafter: None,
        projector: None,
        adapters: Vec::new(),
    }
}

/// Estimate an adapter applied to a model with `block_count` blocks.
///
/// Each block's adapter tensors land on the device running that block of
/// the base model under the same configuration.
pub fn estimate_adapter(
    adapter: &AdapterArchitecture,
    layers: &LayerGroups<'_>,
    block_count: u64,
    config: &RunConfig,
) -> RunEstimate {
    let placement = Placement::new(block_count, config);
    let mut estimate = bare_estimate("adapter", &adapter.architecture, config);
    let devices = &mut estimate.devices;

    devices[HOST].weight.input = layers.input_bytes().saturating_add(layers.others_bytes());
    devices[HOST].computation.footprint = tensor_overhead() * tensor_count(layers);
    for block in 0..layers.block_count() {
        placement.place_block_weight(block, layers.block_bytes(block), devices);
    }
    devices[placement.output_device()].weight.output = layers.output_bytes();

    debug!(
        architecture = %adapter.architecture,
        adapter_type = %adapter.adapter_type,
        blocks = layers.block_count(),
        "estimated adapter"
    );
    estimate.offload_layers = placement.n_offload;
    estimate.full_offloaded = placement.full_offloaded;
    estimate.config = config.with_offload_layers(placement.n_offload);
    estimate
}

/// Estimate a file whose tensors are only loaded into host memory.
pub fn estimate_host_weights(
    kind: &str,
    architecture: &str,
    layers: &LayerGroups<'_>,
    config: &RunConfig,
) -> RunEstimate {
    let mut estimate = bare_estimate(kind, architecture, config);
    let host = &mut estimate.devices[HOST];
    host.weight.input = layers.input_bytes().saturating_add(layers.others_bytes());
    host.weight.compute =
        (0..layers.block_count()).map(|i| layers.block_bytes(i)).fold(0, u64::saturating_add);
    host.weight.output = layers.output_bytes();
    host.computation.footprint = tensor_overhead() * tensor_count(layers);
    debug!(kind, architecture, "estimated host-only weights");
    estimate
}
