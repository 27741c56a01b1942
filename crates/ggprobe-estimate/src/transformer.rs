//! Estimates for language models: weights, KV cache and compute buffers.

use crate::config::{MAX_CONTEXT_SIZE, RunConfig};
use crate::estimate::RunEstimate;
use crate::ggml_overhead::compute_footprint;
use crate::placement::{HOST, Placement};
use crate::usage::ComputationUsage;
use ggprobe_gguf::GgmlType;
use ggprobe_models::{GgufTokenizer, LayerGroups, MAX_BLOCK_COUNT, TransformerArchitecture};
use tracing::debug;

/// Context used when neither the caller nor the model gives one.
pub const FALLBACK_CONTEXT_SIZE: u64 = 4096;

/// Weight bytes of a model by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightLayout {
    /// Embeddings and every tensor outside the blocks and the output layer.
    pub input: u64,
    /// One entry per block.
    pub blocks: Vec<u64>,
    /// Output norm and projection; the token embedding again when the model
    /// ties them, since an offloaded output layer needs its own copy.
    pub output: u64,
    pub tensor_count: u64,
}

impl WeightLayout {
    pub fn from_layers(layers: &LayerGroups<'_>, block_count: u64) -> Self {
        let mut output = layers.output_bytes();
        if !layers.has_output_projection() {
            output = layers
                .input
                .iter()
                .filter(|t| t.name == "token_embd.weight")
                .map(|t| t.bytes())
                .fold(output, u64::saturating_add);
        }
        let tensor_count = layers.input.len()
            + layers.output.len()
            + layers.others.len()
            + layers.blocks.iter().map(Vec::len).sum::<usize>();
        Self {
            input: layers.input_bytes().saturating_add(layers.others_bytes()),
            blocks: (0..block_count.min(MAX_BLOCK_COUNT) as usize)
                .map(|i| layers.block_bytes(i))
                .collect(),
            output,
            tensor_count: tensor_count as u64,
        }
    }

    /// Layout of a model known only by its size: `parameters × bits / 8`
    /// spread evenly over the blocks.
    pub fn uniform(parameters: u64, bits_per_weight: f64, block_count: u64) -> Self {
        let block_count = block_count.min(MAX_BLOCK_COUNT);
        let total = (parameters as f64 * bits_per_weight / 8.0) as u64;
        let per_block = total.checked_div(block_count).unwrap_or(0);
        Self {
            input: total - per_block * block_count,
            blocks: vec![per_block; block_count as usize],
            output: 0,
            tensor_count: 0,
        }
    }
}

fn f32_bytes(dims: &[u64]) -> u64 {
    GgmlType::F32.row_size(dims)
}

fn i32_bytes(elements: u64) -> u64 {
    GgmlType::I32.row_size(&[elements])
}

/// Context size actually allocated, padded the way llama.cpp pads it.
///
/// Never exceeds [`MAX_CONTEXT_SIZE`], whatever the model declares.
pub fn effective_context(arch: &TransformerArchitecture, config: &RunConfig) -> u64 {
    let maximum = arch.maximum_context_length;
    let mut n_ctx = config
        .context_size()
        .filter(|&c| c > 0)
        .or(Some(maximum).filter(|&m| m > 0))
        .unwrap_or(FALLBACK_CONTEXT_SIZE);
    if config.in_max_context_size() && maximum > 0 {
        n_ctx = n_ctx.min(maximum);
    }
    let pad = if config.flash_attention() { 256 } else { 32 };
    n_ctx.min(MAX_CONTEXT_SIZE).next_multiple_of(pad)
}

struct Shape {
    n_ctx: u64,
    n_batch: u64,
    n_ubatch: u64,
    parallel: u64,
}

impl Shape {
    /// Cached positions of block `block`; sliding-window blocks keep only
    /// the window of every sequence plus one micro-batch.
    fn kv_length(&self, arch: &TransformerArchitecture, block: usize) -> u64 {
        if arch.is_swa_block(block) {
            let window = arch
                .attention_sliding_window
                .saturating_mul(self.parallel)
                .saturating_add(self.n_ubatch);
            self.n_ctx.min(window.min(self.n_ctx).next_multiple_of(256))
        } else {
            self.n_ctx
        }
    }
}

/// Per-block attention, recurrent and FFN buffers; the block's compute need
/// is the larger of the sequence-mixing part and the FFN.
fn block_compute(
    arch: &TransformerArchitecture,
    shape: &Shape,
    block: usize,
    flash_attention: bool,
) -> u64 {
    let n_ubatch = shape.n_ubatch;
    let mut mixing = 0u64;
    if arch.block_has_attention(block) {
        let heads = arch.head_count_at(block);
        let qkv = arch
            .attention_key_length
            .saturating_mul(heads)
            .saturating_add(arch.key_gqa_at(block))
            .saturating_add(arch.value_gqa_at(block));
        mixing = mixing.saturating_add(f32_bytes(&[qkv, n_ubatch]));
        mixing = mixing.saturating_add(if flash_attention {
            f32_bytes(&[arch.attention_value_length.saturating_mul(heads), n_ubatch])
        } else {
            f32_bytes(&[shape.kv_length(arch, block), n_ubatch, heads])
        });
    }
    if arch.block_has_recurrent_state(block) {
        let inner = arch.ssm_inner_size.max(arch.embedding_length);
        let states = arch.recurrent_r_length.saturating_add(arch.recurrent_s_length);
        mixing = mixing
            .saturating_add(f32_bytes(&[inner.saturating_mul(2), n_ubatch]))
            .saturating_add(f32_bytes(&[states, shape.parallel]));
    }

    let ffn = if arch.is_mixture_of_experts() {
        let experts = f32_bytes(&[
            arch.expert_feed_forward_length,
            u64::from(arch.expert_used_count),
            n_ubatch,
        ]);
        let router = f32_bytes(&[u64::from(arch.expert_count), n_ubatch]);
        let shared = f32_bytes(&[
            arch.expert_shared_feed_forward_length
                .saturating_mul(u64::from(arch.expert_shared_count.max(1))),
            n_ubatch,
        ]);
        experts.saturating_mul(2).saturating_add(router).saturating_add(shared.saturating_mul(2))
    } else {
        f32_bytes(&[arch.feed_forward_length_at(block), n_ubatch]).saturating_mul(2)
    };
    mixing.max(ffn)
}

/// Graph inputs: tokens, embeddings, positions, output ids, the attention
/// mask and, for recurrent models, the state copy/mask vectors.
fn input_bytes(arch: &TransformerArchitecture, shape: &Shape, flash_attention: bool) -> u64 {
    let n_ubatch = shape.n_ubatch;
    let mask_type = if flash_attention { GgmlType::F16 } else { GgmlType::F32 };
    let mut bytes = (i32_bytes(n_ubatch) * 3)
        .saturating_add(f32_bytes(&[arch.embedding_length, n_ubatch]))
        .saturating_add(mask_type.row_size(&[shape.n_ctx, n_ubatch.next_multiple_of(64)]));
    if arch.attention_recurrent {
        bytes = bytes
            .saturating_add(i32_bytes(shape.parallel))
            .saturating_add(f32_bytes(&[1, shape.parallel]));
    }
    bytes
}

/// Estimate a language model from its normalized architecture and weight
/// layout.
pub fn estimate_transformer(
    arch: &TransformerArchitecture,
    tokenizer: &GgufTokenizer,
    weights: &WeightLayout,
    config: &RunConfig,
) -> RunEstimate {
    let n_ctx = effective_context(arch, config);
    let n_batch = config.logical_batch_size().min(n_ctx);
    let shape = Shape {
        n_ctx,
        n_batch,
        n_ubatch: config.physical_batch_size().min(n_batch),
        parallel: config.parallel_size(),
    };

    let block_count = arch.block_count.min(MAX_BLOCK_COUNT);
    let placement = Placement::new(block_count, config);
    let mut devices = Placement::devices(config);
    let flash = config.flash_attention();

    devices[HOST].weight.input = weights.input;
    let input = input_bytes(arch, &shape, flash);
    devices[HOST].computation = ComputationUsage {
        footprint: compute_footprint(weights.tensor_count, block_count),
        input,
        ..ComputationUsage::default()
    };

    let parallel_states = shape.parallel.max(1);
    for block in 0..block_count as usize {
        let device = placement.block_device(block);
        let block_weight = weights.blocks.get(block).copied().unwrap_or(0);
        placement.place_block_weight(block, block_weight, &mut devices);

        let mut key = 0u64;
        let mut value = 0u64;
        if arch.block_has_attention(block) {
            let n_kv = shape.kv_length(arch, block);
            let key_elements = arch.key_gqa_at(block).saturating_mul(n_kv);
            let value_elements = arch.value_gqa_at(block).saturating_mul(n_kv);
            key = config.cache_key_type().row_size(&[key_elements]);
            value = config.cache_value_type().row_size(&[value_elements]);
        }
        if arch.block_has_recurrent_state(block) {
            let r = arch.recurrent_r_length.saturating_mul(parallel_states);
            let s = arch.recurrent_s_length.saturating_mul(parallel_states);
            key = key.saturating_add(f32_bytes(&[r]));
            value = value.saturating_add(f32_bytes(&[s]));
        }
        let kv_device = if config.offload_kv_cache() { device } else { HOST };
        let kv_cache = &mut devices[kv_device].kv_cache;
        kv_cache.key = kv_cache.key.saturating_add(key);
        kv_cache.value = kv_cache.value.saturating_add(value);

        let usage = &mut devices[device];
        usage.handle_block(block as u64);
        usage.computation.compute =
            usage.computation.compute.max(block_compute(arch, &shape, block, flash));
        if device != HOST && usage.computation.input == 0 {
            usage.computation.input = input;
        }
    }

    let vocabulary = if arch.vocabulary_length > 0 {
        arch.vocabulary_length
    } else {
        tokenizer.tokens_length
    };
    let output_width = if config.embedding_only() { arch.embedding_length } else { vocabulary };
    let output = &mut devices[placement.output_device()];
    output.handle_output_layer = true;
    output.weight.output = weights.output;
    output.computation.output = f32_bytes(&[output_width, shape.n_ubatch])
        .saturating_add(f32_bytes(&[arch.embedding_length, shape.n_ubatch]));

    debug!(
        architecture = %arch.architecture,
        n_ctx,
        offload_layers = placement.n_offload,
        full_offloaded = placement.full_offloaded,
        "estimated transformer run"
    );

    RunEstimate {
        kind: "model".to_owned(),
        architecture: arch.architecture.clone(),
        context_size: n_ctx,
        logical_batch_size: shape.n_batch,
        physical_batch_size: shape.n_ubatch,
        offload_layers: placement.n_offload,
        full_offloaded: placement.full_offloaded,
        flash_attention: flash,
        embedding_only: config.embedding_only(),
        distributable: !arch.attention_recurrent,
        devices,
        config: config.with_offload_layers(placement.n_offload),
        drafter: None,
        projector: None,
        adapters: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch() -> TransformerArchitecture {
        TransformerArchitecture {
            architecture: "llama".into(),
            maximum_context_length: 8192,
            embedding_length: 512,
            block_count: 2,
            ..TransformerArchitecture::default()
        }
    }

    #[test]
    fn context_defaults_to_model_maximum_and_is_padded() {
        let a = arch();
        assert_eq!(effective_context(&a, &RunConfig::default()), 8192);
        let config = RunConfig::builder().context_size(1000).build().unwrap();
        assert_eq!(effective_context(&a, &config), 1024);
        let config = RunConfig::builder().context_size(1000).flash_attention(true).build().unwrap();
        assert_eq!(effective_context(&a, &config), 1024);
        let config = RunConfig::builder().context_size(1025).flash_attention(true).build().unwrap();
        assert_eq!(effective_context(&a, &config), 1280);
    }

    #[test]
    fn context_can_be_clamped_to_maximum() {
        let config =
            RunConfig::builder().context_size(100_000).in_max_context_size(true).build().unwrap();
        assert_eq!(effective_context(&arch(), &config), 8192);
        let unknown = TransformerArchitecture::default();
        assert_eq!(effective_context(&unknown, &RunConfig::default()), FALLBACK_CONTEXT_SIZE);
    }

    #[test]
    fn uniform_layout_keeps_every_byte() {
        let layout = WeightLayout::uniform(1_000_003, 8.0, 4);
        assert_eq!(layout.blocks, vec![250_000; 4]);
        assert_eq!(layout.input + layout.blocks.iter().sum::<u64>(), 1_000_003);
    }
}
