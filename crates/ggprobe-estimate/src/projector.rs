//! Estimates for multimodal projectors.

use crate::config::RunConfig;
use crate::estimate::RunEstimate;
use crate::ggml_overhead::compute_footprint;
use crate::placement::{HOST, Placement};
use crate::usage::{ComputationUsage, WeightUsage};
use ggprobe_gguf::GgmlType;
use ggprobe_models::{ClipArchitecture, ClipEncoder, LayerGroups};
use tracing::debug;

/// Mel frames of one 30 s audio window.
const AUDIO_FRAMES: u64 = 3000;

fn f32_bytes(dims: &[u64]) -> u64 {
    GgmlType::F32.row_size(dims)
}

/// Largest per-block buffer of an encoder attending over `positions`.
fn encoder_compute(encoder: &ClipEncoder, positions: u64) -> u64 {
    let heads = encoder.attention_head_count.max(1);
    let emb = encoder.embedding_length;
    let attention = f32_bytes(&[emb.saturating_mul(3), positions])
        .saturating_add(f32_bytes(&[positions, positions, heads]));
    let ffn = encoder
        .feed_forward_length
        .iter()
        .map(|&ff| f32_bytes(&[ff, positions]).saturating_mul(2))
        .max()
        .unwrap_or(0);
    attention.max(ffn)
}

/// Estimate the projector that turns one image (and/or one audio window)
/// into embeddings for the language model.
pub fn estimate_projector(
    clip: &ClipArchitecture,
    layers: &LayerGroups<'_>,
    config: &RunConfig,
) -> RunEstimate {
    let mut devices = Placement::devices(config);
    let device = if config.offload_layers() == Some(0) {
        HOST
    } else {
        1 + config.main_gpu_index()
    };

    let block_count = layers.block_count() as u64;
    let tensor_count = (layers.input.len()
        + layers.output.len()
        + layers.others.len()
        + layers.blocks.iter().map(Vec::len).sum::<usize>()) as u64;
    devices[device].weight = WeightUsage {
        input: layers.input_bytes().saturating_add(layers.others_bytes()),
        compute: (0..layers.block_count())
            .map(|i| layers.block_bytes(i))
            .fold(0, u64::saturating_add),
        output: layers.output_bytes(),
    };

    let mut input = 0u64;
    let mut compute = 0u64;
    let mut output = 0u64;
    if let Some(vision) = &clip.vision {
        let image_size = config.max_image_size().unwrap_or(clip.vision_image_size);
        let per_side = image_size.checked_div(clip.vision_patch_size).unwrap_or(0);
        let patches = per_side.saturating_mul(per_side);
        input = f32_bytes(&[image_size, image_size, 3])
            .saturating_add(GgmlType::I32.row_size(&[patches]));
        compute = encoder_compute(vision, patches.saturating_add(1));
        let width = vision.projection_dim.max(vision.embedding_length);
        output = f32_bytes(&[width, clip.image_tokens(image_size)]);
    }
    if let Some(audio) = &clip.audio {
        let positions = AUDIO_FRAMES / 2;
        input = input.saturating_add(f32_bytes(&[AUDIO_FRAMES, clip.audio_mel_bins]));
        compute = compute.max(encoder_compute(audio, positions));
        let width = audio.projection_dim.max(audio.embedding_length);
        let tokens = positions / clip.audio_projector_stack_factor.max(1);
        output = output.saturating_add(f32_bytes(&[width, tokens]));
    }

    devices[HOST].computation.footprint = compute_footprint(tensor_count, block_count);
    let buffers = &mut devices[device].computation;
    *buffers = ComputationUsage { input, compute, output, footprint: buffers.footprint };
    devices[device].handle_layers = block_count;
    devices[device].handle_last_layer = block_count.checked_sub(1);
    devices[device].handle_output_layer = true;

    debug!(projector = %clip.projector_type, device, "estimated projector run");

    RunEstimate {
        kind: "projector".to_owned(),
        architecture: clip.architecture.clone(),
        context_size: 0,
        logical_batch_size: config.logical_batch_size(),
        physical_batch_size: config.physical_batch_size(),
        offload_layers: if device == HOST { 0 } else { block_count },
        full_offloaded: device != HOST,
        flash_attention: config.flash_attention(),
        embedding_only: true,
        distributable: false,
        devices,
        config: config.clone(),
        drafter: None,
        projector: None,
        adapters: Vec::new(),
    }
}
