//! Property-based tests for decoder robustness.

use ggprobe_gguf::{GgufError, ParseOptions, parse_bytes};
use ggprobe_test_support::{GgufBuilder, ggml};
use proptest::prelude::*;

fn sample(block_count: u32, tokens: &[String]) -> Vec<u8> {
    GgufBuilder::new()
        .kv_str("general.architecture", "llama")
        .kv_u32("llama.block_count", block_count)
        .kv_str_array("tokenizer.ggml.tokens", tokens)
        .tensor("blk.0.attn_k.weight", &[128, 32], ggml::Q6_K)
        .build()
}

proptest! {
    /// Arbitrary bytes never panic the decoder.
    #[test]
    fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = parse_bytes(data, &ParseOptions::default());
    }

    /// Arbitrary bytes behind a valid magic and version never panic either.
    #[test]
    fn arbitrary_body_never_panics(
        version in 1u32..=3,
        body in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut data = b"GGUF".to_vec();
        data.extend_from_slice(&version.to_le_bytes());
        data.extend_from_slice(&body);
        let _ = parse_bytes(data, &ParseOptions { approximate: true, ..Default::default() });
    }

    /// Tensor shapes of any size either decode or fail as malformed; the
    /// derived sizes never wrap.
    #[test]
    fn arbitrary_tensor_shapes_decode_or_fail_cleanly(
        shapes in proptest::collection::vec(
            proptest::collection::vec(prop_oneof![any::<u64>(), 0u64..1024], 0..=4),
            1..4,
        ),
        ggml_type in prop_oneof![Just(ggml::F32), Just(ggml::Q4_K), Just(ggml::MXFP4)],
    ) {
        let mut builder = GgufBuilder::new();
        for (i, dims) in shapes.iter().enumerate() {
            builder = builder.tensor(&format!("blk.{i}.ffn_up.weight"), dims, ggml_type);
        }
        let file = match parse_bytes(builder.build(), &ParseOptions::default()) {
            Ok(file) => file,
            Err(err) => {
                prop_assert!(matches!(err, GgufError::Malformed(_)), "{}", err);
                return Ok(());
            }
        };
        for t in &file.tensor_infos {
            let exact = t.dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d));
            prop_assert_eq!(Some(t.elements()), exact);
            prop_assert!(file.model_size >= t.bytes());
            prop_assert!(file.model_parameters >= t.elements());
        }
    }

    /// Any strict prefix of a valid container fails with a truncation error.
    #[test]
    fn every_prefix_is_truncated(
        block_count in 1u32..200,
        tokens in proptest::collection::vec("[a-z]{0,12}", 0..20),
        cut_frac in 0.0f64..1.0,
    ) {
        let full = GgufBuilder::new()
            .kv_str("general.architecture", "llama")
            .kv_u32("llama.block_count", block_count)
            .kv_str_array("tokenizer.ggml.tokens", &tokens)
            .tensor("blk.0.attn_k.weight", &[128, 32], ggml::Q6_K)
            .build_unpadded();
        let cut = ((full.len() as f64) * cut_frac) as usize;
        let err = parse_bytes(&full[..cut], &ParseOptions::default()).unwrap_err();
        prop_assert!(matches!(err, GgufError::Truncated { .. }), "cut {}: {}", cut, err);
    }

    /// Decoded values match what was written.
    #[test]
    fn written_values_are_read_back(
        block_count in any::<u32>(),
        tokens in proptest::collection::vec("\\PC{0,8}", 0..16),
    ) {
        let file = parse_bytes(sample(block_count, &tokens), &ParseOptions::default()).unwrap();
        prop_assert_eq!(file.metadata().get_numeric::<u32>("llama.block_count"), Some(block_count));
        let decoded = file.metadata().get_array("tokenizer.ggml.tokens").unwrap().strings().unwrap();
        prop_assert_eq!(decoded, tokens.iter().map(String::as_str).collect::<Vec<_>>());
        prop_assert_eq!(file.tensor_data_start % 32, 0);
    }
}
