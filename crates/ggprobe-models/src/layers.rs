//! Grouping of the tensor index into input, repeating blocks and output.

use ggprobe_gguf::TensorInfo;
use tracing::warn;

const INPUT_TENSORS: &[&str] =
    &["token_embd", "token_embd_norm", "token_types", "position_embd", "per_layer_token_embd"];
const OUTPUT_TENSORS: &[&str] = &["output", "output_norm", "cls", "cls_out", "cls.output"];

/// Tensors of a file sorted by the layer they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerGroups<'a> {
    /// Token and position embeddings.
    pub input: Vec<&'a TensorInfo>,
    /// `blocks[i]` holds every tensor of repeating block `i`.
    pub blocks: Vec<Vec<&'a TensorInfo>>,
    /// Final norm and the output (logits) projection.
    pub output: Vec<&'a TensorInfo>,
    /// Everything else (rope tables, projector stems, diffusion weights).
    pub others: Vec<&'a TensorInfo>,
}

/// Stem of a tensor name, i.e. the name without its `.weight`/`.bias` style
/// suffix.
fn stem(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// Repeating-block index encoded in a tensor name.
///
/// `blk.N.*` (also under the `v.`/`a.` encoder prefixes of projectors), and
/// control-vector `direction.N` tensors, which are numbered from 1.
pub fn block_index(name: &str) -> Option<usize> {
    let rest = name.strip_prefix("v.").or_else(|| name.strip_prefix("a.")).unwrap_or(name);
    if let Some(rest) = rest.strip_prefix("blk.") {
        let digits = rest.split('.').next()?;
        return digits.parse().ok();
    }
    let n: usize = name.strip_prefix("direction.")?.parse().ok()?;
    n.checked_sub(1)
}

impl<'a> LayerGroups<'a> {
    /// Group `tensors` by role.
    ///
    /// A block index can never exceed the number of tensors in a well-formed
    /// file; tensors claiming a larger one land in `others`.
    pub fn from_tensors(tensors: &'a [TensorInfo]) -> Self {
        let mut groups = Self::default();
        for t in tensors {
            let block = block_index(&t.name);
            if let Some(i) = block.filter(|&i| i >= tensors.len()) {
                warn!(tensor = %t.name, index = i, "block index out of range, not grouped");
                groups.others.push(t);
            } else if let Some(i) = block {
                if groups.blocks.len() <= i {
                    groups.blocks.resize_with(i + 1, Vec::new);
                }
                groups.blocks[i].push(t);
            } else if INPUT_TENSORS.contains(&stem(&t.name)) {
                groups.input.push(t);
            } else if OUTPUT_TENSORS.contains(&stem(&t.name)) {
                groups.output.push(t);
            } else {
                groups.others.push(t);
            }
        }
        groups
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn input_bytes(&self) -> u64 {
        sum_bytes(&self.input)
    }

    pub fn output_bytes(&self) -> u64 {
        sum_bytes(&self.output)
    }

    pub fn others_bytes(&self) -> u64 {
        sum_bytes(&self.others)
    }

    /// Bytes of block `i`, zero past the last block.
    pub fn block_bytes(&self, i: usize) -> u64 {
        self.blocks.get(i).map_or(0, |b| sum_bytes(b))
    }

    pub fn total_bytes(&self) -> u64 {
        (0..self.blocks.len())
            .map(|i| self.block_bytes(i))
            .chain([self.input_bytes(), self.output_bytes(), self.others_bytes()])
            .fold(0, u64::saturating_add)
    }

    /// Whether the file carries its own output projection; tied-embedding
    /// models reuse `token_embd` instead.
    pub fn has_output_projection(&self) -> bool {
        self.output.iter().any(|t| t.name == "output.weight")
    }
}

fn sum_bytes(tensors: &[&TensorInfo]) -> u64 {
    tensors.iter().map(|t| t.bytes()).fold(0, u64::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ggprobe_gguf::GgmlType;

    fn t(name: &str) -> TensorInfo {
        TensorInfo { name: name.into(), dims: vec![32, 4], ggml_type: GgmlType::F16, offset: 0 }
    }

    #[test]
    fn block_indices() {
        assert_eq!(block_index("blk.12.attn_q.weight"), Some(12));
        assert_eq!(block_index("v.blk.3.ffn_up.weight"), Some(3));
        assert_eq!(block_index("direction.1"), Some(0));
        assert_eq!(block_index("direction.0"), None);
        assert_eq!(block_index("blk.x.attn_q.weight"), None);
        assert_eq!(block_index("token_embd.weight"), None);
    }

    #[test]
    fn groups_by_role() {
        let tensors = vec![
            t("token_embd.weight"),
            t("blk.1.attn_q.weight"),
            t("blk.0.attn_q.weight"),
            t("blk.0.ffn_up.weight"),
            t("output_norm.weight"),
            t("output.weight"),
            t("rope_freqs.weight"),
        ];
        let g = LayerGroups::from_tensors(&tensors);
        assert_eq!(g.input.len(), 1);
        assert_eq!(g.block_count(), 2);
        assert_eq!(g.blocks[0].len(), 2);
        assert_eq!(g.output.len(), 2);
        assert_eq!(g.others.len(), 1);
        assert!(g.has_output_projection());
        assert_eq!(g.block_bytes(0), 2 * 32 * 4 * 2);
        assert_eq!(g.block_bytes(9), 0);
        assert_eq!(g.total_bytes(), 7 * 32 * 4 * 2);
    }

    #[test]
    fn out_of_range_block_index_is_not_grouped() {
        let tensors = vec![
            t("blk.0.attn_q.weight"),
            t("blk.18446744073709551615.attn_q.weight"),
            t("blk.3.attn_q.weight"),
        ];
        let g = LayerGroups::from_tensors(&tensors);
        assert_eq!(g.block_count(), 1);
        assert_eq!(g.others.len(), 2);
        assert_eq!(g.total_bytes(), 3 * 32 * 4 * 2);
    }
}
