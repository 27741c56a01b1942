use super::Keys;
use ggprobe_gguf::MetadataKv;
use serde::{Deserialize, Serialize};

/// One encoder tower of a multimodal projector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipEncoder {
    pub embedding_length: u64,
    pub block_count: u64,
    /// One entry per block.
    pub feed_forward_length: Vec<u64>,
    pub attention_head_count: u64,
    pub attention_layer_norm_epsilon: f32,
    /// Width the projector maps the encoder output to.
    pub projection_dim: u64,
}

impl ClipEncoder {
    fn from_keys(keys: &Keys<'_>) -> Self {
        let block_count = keys.block_count().unwrap_or(0);
        let blocks = block_count as usize;
        Self {
            embedding_length: keys.num_or("embedding_length", 0),
            block_count,
            feed_forward_length: keys
                .per_block("feed_forward_length", blocks)
                .unwrap_or_else(|| vec![0; blocks]),
            attention_head_count: keys.num_or("attention.head_count", 0),
            attention_layer_norm_epsilon: keys.num_or("attention.layer_norm_epsilon", 0.0),
            projection_dim: keys.num_or("projection_dim", 0),
        }
    }
}

/// A multimodal projector (`general.architecture == "clip"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipArchitecture {
    pub architecture: String,
    pub projector_type: String,
    pub has_text_encoder: bool,
    pub has_vision_encoder: bool,
    pub has_audio_encoder: bool,
    pub minicpmv_version: u32,

    pub vision: Option<ClipEncoder>,
    pub vision_image_size: u64,
    pub vision_patch_size: u64,
    pub vision_projector_scale_factor: u64,
    pub vision_spatial_merge_size: u64,
    pub vision_window_attention_pattern: u64,

    pub audio: Option<ClipEncoder>,
    pub audio_mel_bins: u64,
    pub audio_projector_stack_factor: u64,
}

/// Projector used when the file names none, inferred from the legacy
/// `clip.has_*_projector` flags.
fn legacy_projector_type(kv: &MetadataKv) -> &'static str {
    let flag = |key: &str| kv.get_bool(key).unwrap_or(false);
    if flag("clip.has_minicpmv_projector") {
        "resampler"
    } else if flag("clip.has_glm_projector") {
        "adapter"
    } else if flag("clip.has_qwen2vl_merger") {
        "qwen2vl_merger"
    } else {
        "mlp"
    }
}

impl ClipArchitecture {
    pub fn from_metadata(kv: &MetadataKv) -> Self {
        let projector_type = kv
            .get_string("clip.vision.projector_type")
            .or_else(|| kv.get_string("clip.projector_type"))
            .unwrap_or_else(|| legacy_projector_type(kv))
            .to_owned();

        let vision_keys = Keys::new(kv, "clip.vision");
        let audio_keys = Keys::new(kv, "clip.audio");
        let has_vision_encoder = kv.get_bool("clip.has_vision_encoder").unwrap_or(false);
        let has_audio_encoder = kv.get_bool("clip.has_audio_encoder").unwrap_or(false);

        let default_scale = if projector_type == "gemma3" { 4 } else { 1 };
        Self {
            architecture: "clip".to_owned(),
            has_text_encoder: kv.get_bool("clip.has_text_encoder").unwrap_or(false),
            has_vision_encoder,
            has_audio_encoder,
            minicpmv_version: kv.get_numeric("clip.minicpmv_version").unwrap_or(0),

            vision: has_vision_encoder.then(|| ClipEncoder::from_keys(&vision_keys)),
            vision_image_size: vision_keys.num_or("image_size", 0),
            vision_patch_size: vision_keys.num_or("patch_size", 0),
            vision_projector_scale_factor: vision_keys
                .num_or("projector.scale_factor", default_scale),
            vision_spatial_merge_size: vision_keys.num_or("spatial_merge_size", 0),
            vision_window_attention_pattern: vision_keys.num_or("n_wa_pattern", 0),

            audio: has_audio_encoder.then(|| ClipEncoder::from_keys(&audio_keys)),
            audio_mel_bins: audio_keys.num_or("num_mel_bins", 0),
            audio_projector_stack_factor: audio_keys.num_or("projector.stack_factor", 0),

            projector_type,
        }
    }

    /// Image tokens produced per image of `image_size` pixels a side.
    pub fn image_tokens(&self, image_size: u64) -> u64 {
        if self.vision_patch_size == 0 {
            return 0;
        }
        let per_side = image_size / self.vision_patch_size;
        let merge = self
            .vision_projector_scale_factor
            .max(1)
            .saturating_mul(self.vision_spatial_merge_size.max(1));
        (per_side / merge).max(1).saturating_pow(2)
    }
}
