use ggprobe_estimate::{
    EstimateRunExt, MAX_CONTEXT_SIZE, RunConfig, RunEstimate, WeightLayout, estimate_transformer,
};
use ggprobe_gguf::{ParseOptions, parse_bytes};
use ggprobe_models::{GgufTokenizer, MAX_BLOCK_COUNT, TransformerArchitecture};
use ggprobe_test_support::{GgufBuilder, ggml};
use proptest::prelude::*;

fn arch(blocks: u64, window: u64) -> TransformerArchitecture {
    TransformerArchitecture {
        architecture: "test".into(),
        maximum_context_length: 131072,
        embedding_length: 1024,
        block_count: blocks,
        feed_forward_length: vec![4096; blocks as usize],
        attention_head_count: 8,
        attention_head_count_kv: 2,
        attention_key_length: 128,
        attention_value_length: 128,
        attention_sliding_window: window,
        attention_sliding_window_pattern: if window > 0 { 2 } else { 0 },
        vocabulary_length: 32000,
        ..TransformerArchitecture::default()
    }
}

fn run(arch: &TransformerArchitecture, config: &RunConfig) -> RunEstimate {
    let weights = WeightLayout::uniform(1_000_000, 4.5, arch.block_count);
    estimate_transformer(arch, &GgufTokenizer::default(), &weights, config)
}

fn kv(estimate: &RunEstimate) -> u64 {
    estimate.devices.iter().map(|d| d.kv_cache.sum()).sum()
}

proptest! {
    #[test]
    fn kv_cache_grows_with_context(
        blocks in 1u64..48,
        window in prop_oneof![Just(0u64), 1u64..8192],
        a in 1u64..65536,
        b in 1u64..65536,
    ) {
        let (small, large) = (a.min(b), a.max(b));
        let arch = arch(blocks, window);
        let at = |ctx| run(&arch, &RunConfig::builder().context_size(ctx).build().unwrap());
        prop_assert!(kv(&at(small)) <= kv(&at(large)));
    }

    #[test]
    fn offload_only_moves_memory(blocks in 1u64..48, offload in 0u64..64) {
        let arch = arch(blocks, 0);
        let all = run(&arch, &RunConfig::default());
        let partial = run(&arch, &RunConfig::builder().offload_layers(offload).build().unwrap());
        prop_assert_eq!(kv(&all), kv(&partial));
        let weights = |e: &RunEstimate| e.devices.iter().map(|d| d.weight.sum()).sum::<u64>();
        prop_assert_eq!(weights(&all), weights(&partial));
        prop_assert_eq!(partial.offload_layers, offload.min(blocks));
        let handled: u64 = partial.devices.iter().map(|d| d.handle_layers).sum();
        prop_assert_eq!(handled, blocks);
    }

    #[test]
    fn physical_batch_never_exceeds_context(ctx in 1u64..4096, ubatch in 1u64..8192) {
        let config = RunConfig::builder()
            .context_size(ctx)
            .logical_batch_size(ubatch.max(1))
            .physical_batch_size(ubatch)
            .build()
            .unwrap();
        let estimate = run(&arch(2, 0), &config);
        prop_assert!(estimate.physical_batch_size <= estimate.logical_batch_size);
        prop_assert!(estimate.logical_batch_size <= estimate.context_size);
        prop_assert_eq!(estimate.context_size % 32, 0);
    }

    #[test]
    fn arbitrary_hyperparameters_never_panic(
        blocks in any::<u64>(),
        context in any::<u64>(),
        embedding in any::<u64>(),
        heads in any::<u64>(),
        kv_heads in any::<u64>(),
        window in any::<u64>(),
        parallel in 1u64..=1024,
    ) {
        let arch = TransformerArchitecture {
            architecture: "test".into(),
            maximum_context_length: context,
            embedding_length: embedding,
            block_count: blocks.min(4096),
            feed_forward_length: vec![embedding; 4],
            attention_head_count: heads,
            attention_head_count_kv: kv_heads,
            attention_key_length: embedding.checked_div(heads).unwrap_or(0),
            attention_value_length: embedding.checked_div(heads).unwrap_or(0),
            attention_sliding_window: window,
            attention_sliding_window_pattern: 4,
            vocabulary_length: embedding,
            ..TransformerArchitecture::default()
        };
        let config = RunConfig::builder().parallel_size(parallel).build().unwrap();
        let estimate = run(&arch, &config);
        prop_assert!(estimate.context_size <= MAX_CONTEXT_SIZE);
        prop_assert_eq!(estimate.offload_layers, arch.block_count);
        let summary = estimate.summarize(false, 0, 0);
        prop_assert!(summary.vrams[0].uma <= summary.vrams[0].non_uma);
    }

    #[test]
    fn arbitrary_files_estimate(
        block_count in prop_oneof![1u64..64, any::<u64>().prop_map(|n| n.max(1))],
        index in prop_oneof![any::<u64>(), 0u64..4],
        dims in proptest::collection::vec(1u64..=u64::from(u32::MAX), 1..=2),
    ) {
        let builder = GgufBuilder::new()
            .kv_str("general.architecture", "llama")
            .kv_u64("llama.block_count", block_count)
            .tensor(&format!("blk.{index}.attn_q.weight"), &dims, ggml::Q8_0);
        let file = parse_bytes(builder.build(), &ParseOptions::default()).unwrap();
        let estimate = file.estimate_run(&RunConfig::default());
        prop_assert_eq!(estimate.offload_layers, block_count.min(MAX_BLOCK_COUNT));
        let weights =
            estimate.devices.iter().map(|d| d.weight.sum()).fold(0, u64::saturating_add);
        prop_assert_eq!(weights, file.model_size);
    }
}
