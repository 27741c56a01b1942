//! Recognition of stable-diffusion.cpp checkpoints by tensor names.
//!
//! These files carry no `general.*` metadata, so every decision is made from
//! the presence (and sometimes the shape) of fixed signature tensors.

use crate::file_type::{GgufFileType, guess_file_type};
use ggprobe_gguf::TensorInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A sub-model of a diffusion checkpoint (text encoder or autoencoder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffusionComponent {
    pub architecture: String,
    pub file_type: GgufFileType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffusionArchitecture {
    /// e.g. `Stable Diffusion XL`, `FLUX.1 Fill`.
    pub architecture: String,
    /// Diffusion transformer (MMDiT/FLUX) rather than a UNet.
    pub transformer: bool,
    /// File type of the denoiser alone.
    pub file_type: GgufFileType,
    pub conditioners: Vec<DiffusionComponent>,
    pub autoencoder: Option<DiffusionComponent>,
}

struct Signature {
    /// Tensor whose presence identifies the component.
    key: &'static str,
    /// Name prefix shared by all tensors of the component.
    prefix: &'static str,
}

const fn sig(key: &'static str, prefix: &'static str) -> Signature {
    Signature { key, prefix }
}

const UNET: &str = "model.diffusion_model.";

const SD_1: Signature =
    sig("model.diffusion_model.output_blocks.11.1.transformer_blocks.0.attn2.to_k.weight", UNET);
const SD_XL: Signature =
    sig("model.diffusion_model.output_blocks.5.1.transformer_blocks.1.attn1.to_v.weight", UNET);
const SD_XL_REFINER: Signature =
    sig("model.diffusion_model.output_blocks.8.1.transformer_blocks.1.attn1.to_v.weight", UNET);
const SD_3: Signature = sig("model.diffusion_model.joint_blocks.23.x_block.attn.proj.weight", UNET);
const SD_INPUT: &str = "model.diffusion_model.input_blocks.0.0.weight";
const FLUX: &[Signature] = &[
    sig("model.diffusion_model.double_blocks.0.txt_attn.proj.weight", UNET),
    sig("double_blocks.0.txt_attn.proj.weight", ""),
];

const CLIP_L: &[Signature] = &[
    sig(
        "cond_stage_model.transformer.text_model.encoder.layers.11.self_attn.k_proj.weight",
        "cond_stage_model.transformer.",
    ),
    sig(
        "text_encoders.clip_l.transformer.text_model.encoder.layers.11.self_attn.k_proj.weight",
        "text_encoders.clip_l.",
    ),
];
const CLIP_H: &[Signature] = &[sig(
    "cond_stage_model.transformer.text_model.encoder.layers.22.self_attn.k_proj.weight",
    "cond_stage_model.transformer.",
)];
const CLIP_BIG_G: &[Signature] = &[
    sig(
        "cond_stage_model.1.transformer.text_model.encoder.layers.31.self_attn.k_proj.weight",
        "cond_stage_model.1.",
    ),
    sig(
        "text_encoders.clip_g.transformer.text_model.encoder.layers.31.self_attn.k_proj.weight",
        "text_encoders.clip_g.",
    ),
];
const T5_XXL: &[Signature] = &[
    sig(
        "cond_stage_model.1.transformer.encoder.block.23.layer.0.SelfAttention.k.weight",
        "cond_stage_model.1.",
    ),
    sig(
        "cond_stage_model.2.transformer.encoder.block.23.layer.0.SelfAttention.k.weight",
        "cond_stage_model.2.",
    ),
    sig(
        "text_encoders.t5xxl.transformer.encoder.block.23.layer.0.SelfAttention.k.weight",
        "text_encoders.t5xxl.",
    ),
];
const VAE: &[Signature] = &[
    sig("first_stage_model.decoder.conv_in.weight", "first_stage_model."),
    sig("vae.decoder.conv_in.weight", "vae."),
];

struct Index<'a> {
    tensors: &'a [TensorInfo],
    by_name: HashMap<&'a str, &'a TensorInfo>,
}

impl<'a> Index<'a> {
    fn new(tensors: &'a [TensorInfo]) -> Self {
        Self { tensors, by_name: tensors.iter().map(|t| (t.name.as_str(), t)).collect() }
    }

    fn get(&self, name: &str) -> Option<&'a TensorInfo> {
        self.by_name.get(name).copied()
    }

    fn find(&self, signatures: &'static [Signature]) -> Option<&'static Signature> {
        signatures.iter().find(|s| self.by_name.contains_key(s.key))
    }

    fn file_type(&self, prefix: &str) -> GgufFileType {
        guess_file_type(self.tensors.iter().filter(|t| t.name.starts_with(prefix)), true)
    }

    fn component(&self, label: &str, signatures: &'static [Signature]) -> Option<DiffusionComponent> {
        let s = self.find(signatures)?;
        Some(DiffusionComponent { architecture: label.to_owned(), file_type: self.file_type(s.prefix) })
    }
}

/// Recognise a diffusion checkpoint, `None` for anything else.
pub fn detect_diffusion(tensors: &[TensorInfo]) -> Option<DiffusionArchitecture> {
    let index = Index::new(tensors);

    let (mut architecture, transformer, prefix) = if index.get(SD_3.key).is_some() {
        ("Stable Diffusion 3.x".to_owned(), true, SD_3.prefix)
    } else if let Some(s) = index.find(FLUX) {
        let img_in = index.get(&format!("{}img_in.weight", s.prefix));
        let name = if img_in.is_some_and(|t| t.ne(0) == 384) { "FLUX.1 Fill" } else { "FLUX.1" };
        (name.to_owned(), true, s.prefix)
    } else if index.get(SD_XL_REFINER.key).is_some() {
        ("Stable Diffusion XL Refiner".to_owned(), false, SD_XL_REFINER.prefix)
    } else if index.get(SD_XL.key).is_some() {
        ("Stable Diffusion XL".to_owned(), false, SD_XL.prefix)
    } else if let Some(t) = index.get(SD_1.key) {
        let name = if t.ne(0) == 1024 { "Stable Diffusion 2.x" } else { "Stable Diffusion 1.x" };
        (name.to_owned(), false, SD_1.prefix)
    } else {
        return None;
    };
    if !transformer && index.get(SD_INPUT).is_some_and(|t| t.ne(2) == 9) {
        architecture.push_str(" InPaint");
    }

    let mut conditioners = Vec::new();
    let clip = index
        .component("OpenCLIP ViT-H/14", CLIP_H)
        .or_else(|| index.component("OpenAI CLIP ViT-L/14", CLIP_L));
    conditioners.extend(clip);
    conditioners.extend(index.component("OpenCLIP ViT-bigG/14", CLIP_BIG_G));
    conditioners.extend(index.component("Google T5-xxl", T5_XXL));

    Some(DiffusionArchitecture {
        architecture,
        transformer,
        file_type: index.file_type(prefix),
        conditioners,
        autoencoder: index.component("VAE", VAE),
    })
}
