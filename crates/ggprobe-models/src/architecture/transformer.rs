use super::overrides::{SlidingWindowOverride, is_hybrid, is_recurrent};
use super::{Keys, MAX_BLOCK_COUNT};
use crate::layers::LayerGroups;
use ggprobe_gguf::GgufFile;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Broad shape of a transformer-family model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformerFamily {
    Dense,
    MixtureOfExperts,
    StateSpace,
    Rwkv,
    Hybrid,
}

/// Hyperparameters of a language model, read from `<architecture>.*` keys.
///
/// Absent keys resolve to the defaults llama.cpp assumes. Lengths are in
/// elements, not bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformerArchitecture {
    pub architecture: String,
    pub maximum_context_length: u64,
    pub embedding_length: u64,
    pub block_count: u64,
    /// One entry per block.
    pub feed_forward_length: Vec<u64>,

    pub expert_count: u32,
    pub expert_used_count: u32,
    pub expert_shared_count: u32,
    pub expert_feed_forward_length: u64,
    pub expert_shared_feed_forward_length: u64,

    /// Largest head count of any block.
    pub attention_head_count: u64,
    pub attention_head_count_per_block: Vec<u64>,
    /// Largest KV head count of any block.
    pub attention_head_count_kv: u64,
    /// Zero entries mark blocks without attention in hybrid models.
    pub attention_head_count_kv_per_block: Vec<u64>,
    pub attention_max_alibi_bias: f32,
    pub attention_clamp_kqv: f32,
    pub attention_layer_norm_epsilon: f32,
    pub attention_layer_norm_rms_epsilon: f32,
    pub attention_key_length: u64,
    pub attention_value_length: u64,
    pub attention_sliding_window: u64,
    pub attention_sliding_window_pattern: u64,
    pub attention_causal: bool,
    pub attention_recurrent: bool,
    pub attention_hybrid: bool,

    pub rope_dimension_count: u64,
    pub rope_frequency_base: f32,
    pub rope_frequency_scale: f32,
    pub rope_scaling_type: String,
    pub rope_scaling_factor: f32,
    pub rope_scaling_original_context_length: u64,
    pub rope_scaling_finetuned: bool,

    pub ssm_convolution_kernel: u64,
    pub ssm_inner_size: u64,
    pub ssm_state_size: u64,
    pub ssm_time_step_rank: u64,
    pub ssm_group_count: u64,

    pub rwkv_head_size: u64,
    pub rwkv_rescale_every_n_layers: u64,
    pub rwkv_time_mix_extra_dimension: u64,
    pub rwkv_time_decay_extra_dimension: u64,
    pub rwkv_token_shift_count: u64,

    pub vocabulary_length: u64,
    /// Query heads per KV head.
    pub embedding_gqa: u64,
    /// Width of one cached key row; the r-state width for pure recurrent
    /// models.
    pub embedding_key_gqa: u64,
    /// Width of one cached value row; the s-state width for pure recurrent
    /// models.
    pub embedding_value_gqa: u64,
    /// Convolution/token-shift state per sequence.
    pub recurrent_r_length: u64,
    /// SSM/WKV state per sequence.
    pub recurrent_s_length: u64,
}

impl TransformerArchitecture {
    pub fn from_file(file: &GgufFile, architecture: &str) -> Self {
        let kv = file.metadata();
        let keys = Keys::new(kv, architecture);

        let block_count = keys.block_count().unwrap_or_else(|| {
            let grouped = LayerGroups::from_tensors(&file.tensor_infos).block_count() as u64;
            grouped.min(MAX_BLOCK_COUNT)
        });
        let blocks = block_count as usize;
        let embedding_length = keys.num_or("embedding_length", 0u64);

        let head_count_per_block = keys.per_block("attention.head_count", blocks).unwrap_or_default();
        let attention_head_count = keys
            .num::<u64>("attention.head_count")
            .or_else(|| head_count_per_block.iter().max().copied())
            .unwrap_or(0);
        let head_count_kv_per_block = keys
            .per_block("attention.head_count_kv", blocks)
            .unwrap_or_else(|| head_count_per_block.clone());
        let attention_head_count_kv = keys
            .num::<u64>("attention.head_count_kv")
            .or_else(|| head_count_kv_per_block.iter().max().copied())
            .unwrap_or(attention_head_count);

        let head_dim = embedding_length.checked_div(attention_head_count).unwrap_or(0);

        let mut arch = Self {
            architecture: architecture.to_owned(),
            maximum_context_length: keys.num_or("context_length", 0),
            embedding_length,
            block_count,
            feed_forward_length: keys
                .per_block("feed_forward_length", blocks)
                .unwrap_or_else(|| vec![0; blocks]),

            expert_count: keys.num_or("expert_count", 0),
            expert_used_count: keys.num_or("expert_used_count", 0),
            expert_shared_count: keys.num_or("expert_shared_count", 0),
            expert_feed_forward_length: keys.num_or("expert_feed_forward_length", 0),
            expert_shared_feed_forward_length: keys.num_or("expert_shared_feed_forward_length", 0),

            attention_head_count,
            attention_head_count_per_block: head_count_per_block,
            attention_head_count_kv,
            attention_head_count_kv_per_block: head_count_kv_per_block,
            attention_max_alibi_bias: keys.num_or("attention.max_alibi_bias", 0.0),
            attention_clamp_kqv: keys.num_or("attention.clamp_kqv", 0.0),
            attention_layer_norm_epsilon: keys.num_or("attention.layer_norm_epsilon", 0.0),
            attention_layer_norm_rms_epsilon: keys.num_or("attention.layer_norm_rms_epsilon", 0.0),
            attention_key_length: keys.num_or("attention.key_length", head_dim),
            attention_value_length: keys.num_or("attention.value_length", head_dim),
            attention_sliding_window: keys.num_or("attention.sliding_window", 0),
            attention_sliding_window_pattern: keys.num_or("attention.sliding_window_pattern", 0),
            attention_causal: keys.boolean("attention.causal").unwrap_or(true),
            attention_recurrent: is_recurrent(architecture),
            attention_hybrid: is_hybrid(architecture),

            rope_dimension_count: keys.num_or("rope.dimension_count", 0),
            rope_frequency_base: keys.num_or("rope.freq_base", 10_000.0),
            rope_frequency_scale: 1.0,
            rope_scaling_type: keys.string("rope.scaling.type").unwrap_or_default().to_owned(),
            rope_scaling_factor: keys.num_or("rope.scaling.factor", 0.0),
            rope_scaling_original_context_length: keys
                .num_or("rope.scaling.original_context_length", 0),
            rope_scaling_finetuned: keys.boolean("rope.scaling.finetuned").unwrap_or(false),

            ssm_convolution_kernel: keys.num_or("ssm.conv_kernel", 0),
            ssm_inner_size: keys.num_or("ssm.inner_size", 0),
            ssm_state_size: keys.num_or("ssm.state_size", 0),
            ssm_time_step_rank: keys.num_or("ssm.time_step_rank", 0),
            ssm_group_count: keys.num_or("ssm.group_count", 0),

            rwkv_head_size: keys.num_or("wkv.head_size", 0),
            rwkv_rescale_every_n_layers: keys.num_or("rescale_every_n_layers", 0),
            rwkv_time_mix_extra_dimension: keys.num_or("time_mix_extra_dim", 0),
            rwkv_time_decay_extra_dimension: keys.num_or("time_decay_extra_dim", 0),
            rwkv_token_shift_count: keys.num_or("token_shift_count", 2),

            vocabulary_length: keys
                .num("vocab_size")
                .or_else(|| kv.get_array("tokenizer.ggml.tokens").map(|a| a.len()))
                .unwrap_or(0),
            ..Self::default()
        };

        if let Some(f) = keys.num::<f32>("rope.scale_linear") {
            arch.rope_scaling_type = "linear".to_owned();
            arch.rope_scaling_factor = f;
        }
        if arch.rope_scaling_type == "linear" && arch.rope_scaling_factor != 0.0 {
            arch.rope_frequency_scale = 1.0 / arch.rope_scaling_factor;
        }

        let declared_pattern = keys.num::<u64>("attention.sliding_window_pattern");
        if let Some(o) = SlidingWindowOverride::lookup(architecture) {
            if o.disable {
                arch.attention_sliding_window = 0;
            } else {
                if declared_pattern.is_none() {
                    arch.attention_sliding_window_pattern = o.pattern;
                }
                if arch.attention_sliding_window == 0 {
                    arch.attention_sliding_window = o.default_window.unwrap_or(0);
                }
            }
        }

        arch.derive_sizes();
        trace!(architecture, block_count, family = ?arch.family(), "normalized transformer");
        arch
    }

    fn derive_sizes(&mut self) {
        if self.attention_recurrent {
            let (r, s) = if self.is_rwkv() {
                (
                    self.rwkv_token_shift_count.saturating_mul(self.embedding_length),
                    self.embedding_length.saturating_mul(self.rwkv_head_size),
                )
            } else {
                let group_states =
                    self.ssm_group_count.saturating_mul(self.ssm_state_size).saturating_mul(2);
                let conv_channels = self.ssm_inner_size.saturating_add(group_states);
                (
                    self.ssm_convolution_kernel.saturating_sub(1).saturating_mul(conv_channels),
                    self.ssm_state_size.saturating_mul(self.ssm_inner_size),
                )
            };
            self.recurrent_r_length = r;
            self.recurrent_s_length = s;
        }

        self.embedding_gqa =
            self.attention_head_count.checked_div(self.attention_head_count_kv).unwrap_or(0);
        if self.attention_recurrent && !self.attention_hybrid {
            self.embedding_key_gqa = self.recurrent_r_length;
            self.embedding_value_gqa = self.recurrent_s_length;
        } else {
            self.embedding_key_gqa =
                self.attention_key_length.saturating_mul(self.attention_head_count_kv);
            self.embedding_value_gqa =
                self.attention_value_length.saturating_mul(self.attention_head_count_kv);
        }
    }

    fn is_rwkv(&self) -> bool {
        self.architecture.contains("rwkv")
    }

    pub fn family(&self) -> TransformerFamily {
        if self.attention_hybrid {
            TransformerFamily::Hybrid
        } else if self.attention_recurrent && self.is_rwkv() {
            TransformerFamily::Rwkv
        } else if self.attention_recurrent {
            TransformerFamily::StateSpace
        } else if self.expert_count > 0 {
            TransformerFamily::MixtureOfExperts
        } else {
            TransformerFamily::Dense
        }
    }

    pub fn head_count_at(&self, block: usize) -> u64 {
        self.attention_head_count_per_block.get(block).copied().unwrap_or(self.attention_head_count)
    }

    pub fn head_count_kv_at(&self, block: usize) -> u64 {
        self.attention_head_count_kv_per_block
            .get(block)
            .copied()
            .unwrap_or(self.attention_head_count_kv)
    }

    pub fn feed_forward_length_at(&self, block: usize) -> u64 {
        self.feed_forward_length.get(block).copied().unwrap_or(0)
    }

    /// Key row width of block `block` in elements.
    pub fn key_gqa_at(&self, block: usize) -> u64 {
        self.attention_key_length.saturating_mul(self.head_count_kv_at(block))
    }

    pub fn value_gqa_at(&self, block: usize) -> u64 {
        self.attention_value_length.saturating_mul(self.head_count_kv_at(block))
    }

    /// Whether block `block` attends within the sliding window only.
    ///
    /// Needs both a window and a pattern; in each group of `pattern` blocks
    /// the last one uses full attention.
    pub fn is_swa_block(&self, block: usize) -> bool {
        let pattern = self.attention_sliding_window_pattern;
        self.attention_sliding_window > 0
            && pattern > 0
            && (block as u64) % pattern < pattern - 1
    }

    fn kv_heads_mark_recurrent_blocks(&self) -> bool {
        self.attention_head_count_kv_per_block.contains(&0)
    }

    pub fn block_has_attention(&self, block: usize) -> bool {
        match (self.attention_recurrent, self.attention_hybrid) {
            (false, _) => true,
            (true, false) => false,
            (true, true) => self.head_count_kv_at(block) > 0,
        }
    }

    /// Whether block `block` keeps a recurrent state.
    ///
    /// Hybrids that mark recurrent blocks with zero KV heads have exactly
    /// those; hybrids that do not are assumed to run both in every block.
    pub fn block_has_recurrent_state(&self, block: usize) -> bool {
        match (self.attention_recurrent, self.attention_hybrid) {
            (false, _) => false,
            (true, false) => true,
            (true, true) if self.kv_heads_mark_recurrent_blocks() => {
                self.head_count_kv_at(block) == 0
            }
            (true, true) => true,
        }
    }

    pub fn is_mixture_of_experts(&self) -> bool {
        self.expert_count > 0
    }
}
