//! Views over containers whose metadata or tensor index declares sizes no
//! real model has.

use ggprobe_gguf::{GgufError, GgufFile, ParseOptions, parse_bytes};
use ggprobe_models::{GgufArchitecture, GgufModelExt, MAX_BLOCK_COUNT, TransformerArchitecture};
use ggprobe_test_support::{GgufBuilder, ggml};
use proptest::prelude::*;

fn parse(builder: GgufBuilder) -> anyhow::Result<GgufFile> {
    Ok(parse_bytes(builder.build(), &ParseOptions::default())?)
}

fn transformer(file: &GgufFile) -> anyhow::Result<TransformerArchitecture> {
    match file.architecture() {
        GgufArchitecture::Transformer(t) => Ok(t),
        other => anyhow::bail!("expected a transformer, got {}", other.name()),
    }
}

// ── Block counts ────────────────────────────────────────────────────────────

#[test]
fn huge_block_count_is_clamped() -> anyhow::Result<()> {
    for declared in [u64::MAX, u64::from(u32::MAX), MAX_BLOCK_COUNT + 1] {
        let file = parse(
            GgufBuilder::new()
                .kv_str("general.architecture", "llama")
                .kv_u64("llama.block_count", declared)
                .kv_u32("llama.feed_forward_length", 11008)
                .kv_u32("llama.attention.head_count", 32)
                .tensor("blk.0.attn_q.weight", &[64, 64], ggml::F16),
        )?;
        let t = transformer(&file)?;
        assert_eq!(t.block_count, MAX_BLOCK_COUNT);
        assert_eq!(t.feed_forward_length.len() as u64, MAX_BLOCK_COUNT);
        assert_eq!(t.attention_head_count_per_block.len() as u64, MAX_BLOCK_COUNT);
    }
    Ok(())
}

#[test]
fn block_count_at_the_limit_is_kept() -> anyhow::Result<()> {
    let file = parse(
        GgufBuilder::new()
            .kv_str("general.architecture", "llama")
            .kv_u64("llama.block_count", MAX_BLOCK_COUNT),
    )?;
    assert_eq!(transformer(&file)?.block_count, MAX_BLOCK_COUNT);
    Ok(())
}

#[test]
fn huge_encoder_block_count_is_clamped() -> anyhow::Result<()> {
    let file = parse(
        GgufBuilder::new()
            .kv_str("general.architecture", "clip")
            .kv_bool("clip.has_vision_encoder", true)
            .kv_u64("clip.vision.block_count", u64::MAX)
            .kv_u32("clip.vision.feed_forward_length", 4096),
    )?;
    let vision = file
        .architecture()
        .as_projector()
        .and_then(|c| c.vision.clone())
        .ok_or_else(|| anyhow::anyhow!("no vision encoder"))?;
    assert_eq!(vision.block_count, MAX_BLOCK_COUNT);
    assert_eq!(vision.feed_forward_length.len() as u64, MAX_BLOCK_COUNT);
    Ok(())
}

// ── Tensor names ────────────────────────────────────────────────────────────

#[test]
fn out_of_range_block_name_is_not_a_block() -> anyhow::Result<()> {
    let file = parse(
        GgufBuilder::new()
            .kv_str("general.architecture", "llama")
            .tensor("token_embd.weight", &[64, 100], ggml::F16)
            .tensor("blk.18446744073709551615.attn_q.weight", &[64, 64], ggml::F16),
    )?;
    let layers = file.layers();
    assert_eq!(layers.block_count(), 0);
    assert_eq!(layers.others.len(), 1);
    assert_eq!(transformer(&file)?.block_count, 0);
    Ok(())
}

// ── Hyperparameters ─────────────────────────────────────────────────────────

#[test]
fn huge_hyperparameters_saturate() -> anyhow::Result<()> {
    let file = parse(
        GgufBuilder::new()
            .kv_str("general.architecture", "llama")
            .kv_u32("llama.block_count", 2)
            .kv_u64("llama.embedding_length", u64::MAX)
            .kv_u64("llama.attention.head_count", 1)
            .kv_u64("llama.attention.head_count_kv", u64::MAX),
    )?;
    let t = transformer(&file)?;
    assert_eq!(t.attention_key_length, u64::MAX);
    assert_eq!(t.embedding_key_gqa, u64::MAX);
    assert_eq!(t.key_gqa_at(1), u64::MAX);
    Ok(())
}

#[test]
fn huge_recurrent_sizes_saturate() -> anyhow::Result<()> {
    let file = parse(
        GgufBuilder::new()
            .kv_str("general.architecture", "mamba")
            .kv_u32("mamba.block_count", 2)
            .kv_u64("mamba.embedding_length", u64::MAX)
            .kv_u64("mamba.ssm.conv_kernel", u64::MAX)
            .kv_u64("mamba.ssm.inner_size", u64::MAX)
            .kv_u64("mamba.ssm.state_size", u64::MAX)
            .kv_u64("mamba.ssm.group_count", u64::MAX),
    )?;
    let t = transformer(&file)?;
    assert_eq!(t.recurrent_r_length, u64::MAX);
    assert_eq!(t.recurrent_s_length, u64::MAX);
    Ok(())
}

// ── Arbitrary declarations ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn arbitrary_declarations_never_panic(
        block_count in prop_oneof![any::<u64>(), 0u64..64],
        index in prop_oneof![any::<u64>(), 0u64..8],
        dims in proptest::collection::vec(prop_oneof![any::<u64>(), 0u64..4096], 1..=4),
        embedding in any::<u64>(),
    ) {
        let builder = GgufBuilder::new()
            .kv_str("general.architecture", "llama")
            .kv_u64("llama.block_count", block_count)
            .kv_u64("llama.embedding_length", embedding)
            .kv_u32("llama.attention.head_count", 8)
            .tensor(&format!("blk.{index}.attn_q.weight"), &dims, ggml::Q4_K)
            .tensor("token_embd.weight", &dims, ggml::F32);
        let file = match parse_bytes(builder.build(), &ParseOptions::default()) {
            Ok(file) => file,
            Err(err) => {
                prop_assert!(matches!(err, GgufError::Malformed(_)), "{err}");
                return Ok(());
            }
        };
        let layers = file.layers();
        prop_assert!(layers.block_count() <= file.tensor_infos.len());
        let arch = file.architecture();
        let t = arch.as_transformer().ok_or_else(|| TestCaseError::fail("not a transformer"))?;
        prop_assert_eq!(t.block_count, block_count.min(MAX_BLOCK_COUNT));
        prop_assert_eq!(t.feed_forward_length.len() as u64, t.block_count);
    }
}
