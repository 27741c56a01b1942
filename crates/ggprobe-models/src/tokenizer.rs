//! Tokenizer summary from the `tokenizer.ggml.*` keys.

use ggprobe_gguf::MetadataKv;
use serde::{Deserialize, Serialize};

/// Token id reported when a special token is not declared.
pub const NO_TOKEN: i64 = -1;

/// Sizes and special tokens of the embedded tokenizer.
///
/// Counts and byte sizes are available even when the decoder skipped the
/// arrays themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgufTokenizer {
    /// `tokenizer.ggml.model`, e.g. `llama` or `gpt2`; empty when absent.
    pub model: String,
    /// `tokenizer.ggml.pre`; empty when absent.
    pub pre_tokenizer: String,
    pub tokens_length: u64,
    /// Encoded size of the token array in bytes.
    pub tokens_size: u64,
    pub merges_length: u64,
    pub merges_size: u64,
    pub added_tokens_length: u64,
    pub added_tokens_size: u64,
    pub bos_token_id: i64,
    pub eos_token_id: i64,
    pub eot_token_id: i64,
    pub eom_token_id: i64,
    pub unknown_token_id: i64,
    pub separator_token_id: i64,
    pub padding_token_id: i64,
    pub has_chat_template: bool,
}

impl Default for GgufTokenizer {
    fn default() -> Self {
        Self {
            model: String::new(),
            pre_tokenizer: String::new(),
            tokens_length: 0,
            tokens_size: 0,
            merges_length: 0,
            merges_size: 0,
            added_tokens_length: 0,
            added_tokens_size: 0,
            bos_token_id: NO_TOKEN,
            eos_token_id: NO_TOKEN,
            eot_token_id: NO_TOKEN,
            eom_token_id: NO_TOKEN,
            unknown_token_id: NO_TOKEN,
            separator_token_id: NO_TOKEN,
            padding_token_id: NO_TOKEN,
            has_chat_template: false,
        }
    }
}

fn token_id(kv: &MetadataKv, keys: &[&str]) -> i64 {
    keys.iter().find_map(|k| kv.get_numeric::<i64>(k)).unwrap_or(NO_TOKEN)
}

fn array_extent(kv: &MetadataKv, key: &str) -> (u64, u64) {
    kv.get_array(key).map(|a| (a.len(), a.size())).unwrap_or_default()
}

impl GgufTokenizer {
    pub fn from_metadata(kv: &MetadataKv) -> Self {
        let (tokens_length, tokens_size) = array_extent(kv, "tokenizer.ggml.tokens");
        let (merges_length, merges_size) = array_extent(kv, "tokenizer.ggml.merges");
        let (added_tokens_length, added_tokens_size) =
            array_extent(kv, "tokenizer.ggml.added_tokens");
        Self {
            model: kv.get_string("tokenizer.ggml.model").unwrap_or_default().to_owned(),
            pre_tokenizer: kv.get_string("tokenizer.ggml.pre").unwrap_or_default().to_owned(),
            tokens_length,
            tokens_size,
            merges_length,
            merges_size,
            added_tokens_length,
            added_tokens_size,
            bos_token_id: token_id(kv, &["tokenizer.ggml.bos_token_id"]),
            eos_token_id: token_id(kv, &["tokenizer.ggml.eos_token_id"]),
            eot_token_id: token_id(kv, &["tokenizer.ggml.eot_token_id"]),
            eom_token_id: token_id(kv, &["tokenizer.ggml.eom_token_id"]),
            unknown_token_id: token_id(kv, &["tokenizer.ggml.unknown_token_id"]),
            // llama.cpp writes the misspelled key.
            separator_token_id: token_id(
                kv,
                &["tokenizer.ggml.seperator_token_id", "tokenizer.ggml.separator_token_id"],
            ),
            padding_token_id: token_id(kv, &["tokenizer.ggml.padding_token_id"]),
            has_chat_template: kv.contains("tokenizer.chat_template"),
        }
    }

    /// Whether the file embeds a vocabulary at all.
    pub fn is_present(&self) -> bool {
        self.tokens_length > 0
    }
}
